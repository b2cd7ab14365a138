//! Per-kind change classification.
//!
//! Every watched kind has a classifier that turns one [`RawEvent`] into the
//! ordered list of [`Emit`]s it is worth. Classifiers are pure: they never
//! touch the sink themselves, and the only collaborator they consult is the
//! ingress class predicate.
//!
//! | Kind      | Added           | Updated                         | Deleted                 |
//! |-----------|-----------------|---------------------------------|-------------------------|
//! | Ingress   | audit + notify  | class transition, audit + notify | audit + notify if valid |
//! | Endpoints | notify          | notify if subsets changed       | notify                  |
//! | Service   | -               | -                               | -                       |
//! | Secret    | -               | update_secret if changed        | delete_secret           |
//! | ConfigMap | add_config_map  | update_config_map if changed    | -                       |
//! | Pod       | -               | notify if deletion timestamp changed | notify             |
//! | Node      | -               | -                               | -                       |

use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::IdentityRecoveryFailure;
use crate::event::RawEvent;
use crate::kind::{ResourceKind, object_key};
use crate::sink::{AuditEvent, AuditReason, Emit, IngressClass, NotificationSignal};

/// Decision table for one resource kind.
pub trait ChangeClassifier: Send + Sync + 'static {
    /// Object type the classifier handles
    type Object: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Kind the classifier handles
    const KIND: ResourceKind;

    /// Classifies one raw event.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityRecoveryFailure`] when a delete carries a
    /// tombstone that cannot be turned back into `Self::Object`. The event
    /// must then be dropped.
    fn classify<C>(
        event: &RawEvent<Self::Object>,
        class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized;
}

fn notify() -> Emit {
    Emit::Signal(NotificationSignal::GenericChange)
}

fn audit(reason: AuditReason, ingress: &Ingress) -> Vec<Emit> {
    vec![Emit::Audit(AuditEvent::ingress(reason, ingress)), notify()]
}

/// Ingresses of this controller's class; records audit events.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngressClassifier;

impl ChangeClassifier for IngressClassifier {
    type Object = Ingress;
    const KIND: ResourceKind = ResourceKind::Ingress;

    fn classify<C>(
        event: &RawEvent<Ingress>,
        class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        let emits = match event {
            RawEvent::Added(ing) if class.is_valid_class(ing) => audit(AuditReason::Create, ing),
            RawEvent::Added(_) => Vec::new(),
            RawEvent::Updated { old, new } => {
                if old == new {
                    return Ok(Vec::new());
                }
                match (class.is_valid_class(old), class.is_valid_class(new)) {
                    (false, false) => Vec::new(),
                    (false, true) => audit(AuditReason::Create, new),
                    (true, false) => audit(AuditReason::Delete, new),
                    (true, true) => audit(AuditReason::Update, new),
                }
            }
            RawEvent::Deleted(deleted) => {
                let ing = deleted.recover()?;
                if class.is_valid_class(&ing) {
                    audit(AuditReason::Delete, &ing)
                } else {
                    Vec::new()
                }
            }
        };
        Ok(emits)
    }
}

/// Endpoints: only the routing data (subsets) matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointsClassifier;

impl ChangeClassifier for EndpointsClassifier {
    type Object = Endpoints;
    const KIND: ResourceKind = ResourceKind::Endpoints;

    fn classify<C>(
        event: &RawEvent<Endpoints>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        let changed = match event {
            RawEvent::Added(_) | RawEvent::Deleted(_) => true,
            RawEvent::Updated { old, new } => old.subsets != new.subsets,
        };
        Ok(if changed { vec![notify()] } else { Vec::new() })
    }
}

/// Services are cached for lookups only and never signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceClassifier;

impl ChangeClassifier for ServiceClassifier {
    type Object = Service;
    const KIND: ResourceKind = ResourceKind::Service;

    fn classify<C>(
        _event: &RawEvent<Service>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        Ok(Vec::new())
    }
}

/// Secrets are tracked by key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretClassifier;

impl ChangeClassifier for SecretClassifier {
    type Object = Secret;
    const KIND: ResourceKind = ResourceKind::Secret;

    fn classify<C>(
        event: &RawEvent<Secret>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        let emits = match event {
            RawEvent::Added(_) => Vec::new(),
            RawEvent::Updated { old, new } if old == new => Vec::new(),
            RawEvent::Updated { new, .. } => {
                vec![Emit::Signal(NotificationSignal::SecretUpdated(object_key(&**new)))]
            }
            RawEvent::Deleted(deleted) => {
                let secret = deleted.recover()?;
                vec![Emit::Signal(NotificationSignal::SecretDeleted(object_key(&*secret)))]
            }
        };
        Ok(emits)
    }
}

/// Config maps are passed to the sink whole; deletes are not handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMapClassifier;

impl ChangeClassifier for ConfigMapClassifier {
    type Object = ConfigMap;
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    fn classify<C>(
        event: &RawEvent<ConfigMap>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        let emits = match event {
            RawEvent::Added(cm) => {
                vec![Emit::Signal(NotificationSignal::ConfigMapAdded(Arc::clone(cm)))]
            }
            RawEvent::Updated { old, new } if old != new => {
                vec![Emit::Signal(NotificationSignal::ConfigMapUpdated(Arc::clone(new)))]
            }
            RawEvent::Updated { .. } | RawEvent::Deleted(_) => Vec::new(),
        };
        Ok(emits)
    }
}

/// Pods matter when they start or finish terminating.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodClassifier;

impl ChangeClassifier for PodClassifier {
    type Object = Pod;
    const KIND: ResourceKind = ResourceKind::Pod;

    fn classify<C>(
        event: &RawEvent<Pod>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        let changed = match event {
            RawEvent::Added(_) => false,
            RawEvent::Updated { old, new } => {
                old.metadata.deletion_timestamp != new.metadata.deletion_timestamp
            }
            RawEvent::Deleted(_) => true,
        };
        Ok(if changed { vec![notify()] } else { Vec::new() })
    }
}

/// Nodes populate the cache only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeClassifier;

impl ChangeClassifier for NodeClassifier {
    type Object = Node;
    const KIND: ResourceKind = ResourceKind::Node;

    fn classify<C>(
        _event: &RawEvent<Node>,
        _class: &C,
    ) -> Result<Vec<Emit>, IdentityRecoveryFailure>
    where
        C: IngressClass + ?Sized,
    {
        Ok(Vec::new())
    }
}

//! Contracts towards the reconciler and the audit trail.
//!
//! The coordinator calls into these from up to seven informer tasks at the
//! same time and holds no lock around the calls. Implementations must be
//! non-blocking or serialize internally, and must not rely on any ordering
//! between calls coming from different kinds.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use tracing::info;

/// Ingress class policy: decides which ingresses belong to this controller.
pub trait IngressClass {
    /// Whether `ingress` is handled by this controller.
    ///
    /// Must be a pure function of its argument; it is called for both the
    /// old and the new state of an update.
    fn is_valid_class(&self, ingress: &Ingress) -> bool;
}

/// Receiver of the classified notifications.
pub trait ListerEvents: IngressClass + Send + Sync {
    /// Something reconcile-relevant changed. Debouncing is up to the receiver.
    fn notify(&self);

    /// A secret changed; `key` is `<namespace>/<name>`.
    fn update_secret(&self, key: &str);

    /// A secret was removed; `key` is `<namespace>/<name>`.
    fn delete_secret(&self, key: &str);

    /// A config map was added.
    fn add_config_map(&self, config_map: Arc<ConfigMap>);

    /// A config map changed.
    fn update_config_map(&self, config_map: Arc<ConfigMap>);
}

/// Reason attached to an ingress audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditReason {
    /// The ingress started being handled by this controller
    Create,
    /// A handled ingress changed
    Update,
    /// The ingress stopped being handled by this controller
    Delete,
}

impl AuditReason {
    /// Reason string as published to the cluster.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditReason::Create => "CREATE",
            AuditReason::Update => "UPDATE",
            AuditReason::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human readable record of an ingress transition, severity Normal.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// CREATE, UPDATE or DELETE
    pub reason: AuditReason,
    /// The ingress the event is about
    pub regarding: ObjectReference,
    /// `Ingress <namespace>/<name>`
    pub note: String,
}

impl AuditEvent {
    /// Builds the audit event for an ingress transition.
    pub fn ingress(reason: AuditReason, ingress: &Ingress) -> Self {
        Self {
            reason,
            regarding: ingress.object_ref(&()),
            note: format!(
                "Ingress {}/{}",
                ingress.namespace().unwrap_or_default(),
                ingress.name_any()
            ),
        }
    }
}

/// Writes audit events somewhere operators can see them.
pub trait AuditRecorder: Send + Sync {
    /// Records one event. Must not block.
    fn record(&self, event: AuditEvent);
}

/// Recorder used when none is configured: audit events go to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRecorder;

impl AuditRecorder for LogRecorder {
    fn record(&self, event: AuditEvent) {
        info!(reason = %event.reason, note = %event.note, "audit event");
    }
}

/// A classified, reconcile-relevant notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationSignal {
    /// Maps to [`ListerEvents::notify`]
    GenericChange,
    /// Maps to [`ListerEvents::update_secret`]
    SecretUpdated(String),
    /// Maps to [`ListerEvents::delete_secret`]
    SecretDeleted(String),
    /// Maps to [`ListerEvents::add_config_map`]
    ConfigMapAdded(Arc<ConfigMap>),
    /// Maps to [`ListerEvents::update_config_map`]
    ConfigMapUpdated(Arc<ConfigMap>),
}

/// One output item of a classifier, delivered in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    /// Goes to the [`AuditRecorder`]
    Audit(AuditEvent),
    /// Goes to the [`ListerEvents`] sink
    Signal(NotificationSignal),
}

impl Emit {
    /// Delivers this item to its collaborator.
    pub fn deliver(self, events: &dyn ListerEvents, recorder: &dyn AuditRecorder) {
        match self {
            Emit::Audit(event) => recorder.record(event),
            Emit::Signal(NotificationSignal::GenericChange) => events.notify(),
            Emit::Signal(NotificationSignal::SecretUpdated(key)) => events.update_secret(&key),
            Emit::Signal(NotificationSignal::SecretDeleted(key)) => events.delete_secret(&key),
            Emit::Signal(NotificationSignal::ConfigMapAdded(cm)) => events.add_config_map(cm),
            Emit::Signal(NotificationSignal::ConfigMapUpdated(cm)) => events.update_config_map(cm),
        }
    }
}

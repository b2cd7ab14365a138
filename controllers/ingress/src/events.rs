//! Channel-backed listers sink.
//!
//! Every notification becomes a [`ListerEvent`] message for the single
//! consumer loop in the controller. Sending never blocks the informers.

use std::sync::Arc;

use cluster_listers::{IngressClass, ListerEvents};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::Ingress;
use tokio::sync::mpsc;
use tracing::debug;

/// Annotation carrying the legacy ingress class.
pub const CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// A notification from the listers.
#[derive(Debug, Clone)]
pub enum ListerEvent {
    /// Something reconcile-relevant changed
    Notify,
    /// A secret's content changed
    SecretUpdated(String),
    /// A secret was deleted
    SecretDeleted(String),
    /// A config map appeared
    ConfigMapAdded(Arc<ConfigMap>),
    /// A config map changed
    ConfigMapUpdated(Arc<ConfigMap>),
}

/// Decides which ingresses belong to this controller.
#[derive(Debug, Clone)]
pub struct ClassPolicy {
    class: String,
    watch_without_class: bool,
}

impl ClassPolicy {
    /// Creates a policy accepting `class`, and optionally class-less ingresses.
    pub fn new(class: impl Into<String>, watch_without_class: bool) -> Self {
        Self {
            class: class.into(),
            watch_without_class,
        }
    }

    /// The annotation wins over `spec.ingressClassName`.
    pub fn accepts(&self, ingress: &Ingress) -> bool {
        let annotated = ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(CLASS_ANNOTATION));
        let class_name = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.as_ref());

        match annotated.or(class_name) {
            Some(class) => *class == self.class,
            None => self.watch_without_class,
        }
    }
}

/// [`ListerEvents`] implementation forwarding to an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<ListerEvent>,
    policy: ClassPolicy,
}

impl ChannelEvents {
    /// Creates the sink and the receiving end for the consumer.
    pub fn new(policy: ClassPolicy) -> (Self, mpsc::UnboundedReceiver<ListerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, policy }, rx)
    }

    fn send(&self, event: ListerEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = ?e.0, "consumer gone, dropping lister event");
        }
    }
}

impl IngressClass for ChannelEvents {
    fn is_valid_class(&self, ingress: &Ingress) -> bool {
        self.policy.accepts(ingress)
    }
}

impl ListerEvents for ChannelEvents {
    fn notify(&self) {
        self.send(ListerEvent::Notify);
    }

    fn update_secret(&self, key: &str) {
        self.send(ListerEvent::SecretUpdated(key.to_string()));
    }

    fn delete_secret(&self, key: &str) {
        self.send(ListerEvent::SecretDeleted(key.to_string()));
    }

    fn add_config_map(&self, config_map: Arc<ConfigMap>) {
        self.send(ListerEvent::ConfigMapAdded(config_map));
    }

    fn update_config_map(&self, config_map: Arc<ConfigMap>) {
        self.send(ListerEvent::ConfigMapUpdated(config_map));
    }
}

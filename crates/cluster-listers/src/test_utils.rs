//! Test utilities for unit testing classifiers, informers and the coordinator
//!
//! This module provides builders for cluster objects and an in-memory sink
//! that records every call it receives.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointSubset, Endpoints, Node, Pod, Secret, Service,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::kind::object_key;
use crate::sink::{AuditEvent, AuditReason, AuditRecorder, IngressClass, ListerEvents};

/// Annotation the recording sink checks for the ingress class.
pub const CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Helper to create a test Ingress, optionally annotated with a class
pub fn ingress(namespace: &str, name: &str, class: Option<&str>) -> Ingress {
    let mut metadata = meta(namespace, name);
    if let Some(class) = class {
        metadata.annotations = Some(string_map(&[(CLASS_ANNOTATION, class)]));
    }
    Ingress {
        metadata,
        spec: Some(IngressSpec::default()),
        status: None,
    }
}

/// Helper to create a test Secret with string data
pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        string_data: Some(string_map(data)),
        ..Default::default()
    }
}

/// Helper to create a test ConfigMap
pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(string_map(data)),
        ..Default::default()
    }
}

/// Helper to create test Endpoints with one subset holding `ips`
pub fn endpoints(namespace: &str, name: &str, ips: &[&str]) -> Endpoints {
    let addresses = ips
        .iter()
        .map(|ip| EndpointAddress {
            ip: (*ip).to_string(),
            ..Default::default()
        })
        .collect();
    Endpoints {
        metadata: meta(namespace, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(addresses),
            ..Default::default()
        }]),
    }
}

/// Helper to create a test Pod
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: meta(namespace, name),
        ..Default::default()
    }
}

/// Helper to create a test Service
pub fn service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: meta(namespace, name),
        ..Default::default()
    }
}

/// Helper to create a test Node
pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Returns a copy of `obj` with its labels replaced
pub fn with_labels<K: kube::Resource + Clone>(obj: &K, labels: &[(&str, &str)]) -> K {
    let mut obj = obj.clone();
    obj.meta_mut().labels = Some(string_map(labels));
    obj
}

/// One call observed by [`RecordingEvents`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Notify,
    UpdateSecret(String),
    DeleteSecret(String),
    AddConfigMap(String),
    UpdateConfigMap(String),
    Audit(AuditReason, String),
}

/// In-memory sink and recorder
///
/// Ingresses are valid when annotated with the `haproxy` class.
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingEvents {
    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl IngressClass for RecordingEvents {
    fn is_valid_class(&self, ingress: &Ingress) -> bool {
        ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CLASS_ANNOTATION))
            .is_some_and(|class| class == "haproxy")
    }
}

impl ListerEvents for RecordingEvents {
    fn notify(&self) {
        self.push(SinkCall::Notify);
    }

    fn update_secret(&self, key: &str) {
        self.push(SinkCall::UpdateSecret(key.to_string()));
    }

    fn delete_secret(&self, key: &str) {
        self.push(SinkCall::DeleteSecret(key.to_string()));
    }

    fn add_config_map(&self, config_map: Arc<ConfigMap>) {
        self.push(SinkCall::AddConfigMap(object_key(&*config_map)));
    }

    fn update_config_map(&self, config_map: Arc<ConfigMap>) {
        self.push(SinkCall::UpdateConfigMap(object_key(&*config_map)));
    }
}

impl AuditRecorder for RecordingEvents {
    fn record(&self, event: AuditEvent) {
        self.push(SinkCall::Audit(event.reason, event.note));
    }
}

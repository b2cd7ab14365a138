//! Resource kinds watched by the controller and the cache key format.

use std::fmt;

use kube::Resource;

/// The seven kinds of cluster object the controller keeps a cache of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// networking.k8s.io/v1 Ingress
    Ingress,
    /// v1 Endpoints
    Endpoints,
    /// v1 Service
    Service,
    /// v1 Secret
    Secret,
    /// v1 ConfigMap
    ConfigMap,
    /// v1 Pod
    Pod,
    /// v1 Node (cluster scoped)
    Node,
}

impl ResourceKind {
    /// Every kind, in the order informers are started.
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Ingress,
        ResourceKind::Endpoints,
        ResourceKind::Service,
        ResourceKind::Secret,
        ResourceKind::ConfigMap,
        ResourceKind::Pod,
        ResourceKind::Node,
    ];

    /// API kind name, as found in `TypeMeta::kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Endpoints => "Endpoints",
            ResourceKind::Service => "Service",
            ResourceKind::Secret => "Secret",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key of an object: `<namespace>/<name>`, or `<name>` when the object
/// is cluster scoped.
pub fn object_key<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

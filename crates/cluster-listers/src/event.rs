//! Raw change events as delivered by an informer.
//!
//! A delete can arrive without the deleted object: when the informer misses
//! the final state of an object (the watch was down while it was removed) it
//! only learns about the removal on the next relist. Such deletes carry a
//! [`Tombstone`] with the key, the declared kind and the last state the cache
//! held.

use std::sync::Arc;

use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::IdentityRecoveryFailure;
use crate::kind::object_key;

/// One change observed on a watched collection.
#[derive(Debug, Clone)]
pub enum RawEvent<K> {
    /// The object appeared in the cache
    Added(Arc<K>),
    /// The object was replaced; `old` is the cached state before the change
    Updated {
        /// State before the change
        old: Arc<K>,
        /// State after the change
        new: Arc<K>,
    },
    /// The object left the cache
    Deleted(DeletedObject<K>),
}

/// Payload of a delete event.
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// The full object as last seen by the watch
    Full(Arc<K>),
    /// Identity-only record for a delete whose final state was missed
    Placeholder(Tombstone),
}

impl<K> DeletedObject<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    /// Recovers the deleted object, decoding it from the tombstone if needed.
    ///
    /// # Errors
    ///
    /// Fails when the tombstone declares another kind than `K` or when its
    /// last known state does not decode as `K`.
    pub fn recover(&self) -> Result<Arc<K>, IdentityRecoveryFailure> {
        match self {
            DeletedObject::Full(obj) => Ok(Arc::clone(obj)),
            DeletedObject::Placeholder(tombstone) => tombstone.recover().map(Arc::new),
        }
    }
}

/// Identity of an object whose delete was observed without its final state.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    key: String,
    kind: String,
    state: serde_json::Value,
}

impl Tombstone {
    /// Creates a tombstone from its raw parts.
    pub fn new(key: impl Into<String>, kind: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            state,
        }
    }

    /// Creates a tombstone from the last cached state of an object.
    ///
    /// # Errors
    ///
    /// Fails if the object cannot be serialized.
    pub fn from_object<K>(obj: &K) -> Result<Self, serde_json::Error>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        Ok(Self {
            key: object_key(obj),
            kind: K::kind(&()).into_owned(),
            state: serde_json::to_value(obj)?,
        })
    }

    /// Cache key of the deleted object.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Kind the tombstone was recorded for.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Decodes the last known state as `K`.
    ///
    /// # Errors
    ///
    /// See [`DeletedObject::recover`].
    pub fn recover<K>(&self) -> Result<K, IdentityRecoveryFailure>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let expected = K::kind(&());
        if self.kind != expected {
            return Err(IdentityRecoveryFailure::KindMismatch {
                key: self.key.clone(),
                expected: expected.into_owned(),
                found: self.kind.clone(),
            });
        }
        serde_json::from_value(self.state.clone()).map_err(|source| {
            IdentityRecoveryFailure::Undecodable {
                key: self.key.clone(),
                kind: self.kind.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ingress, secret};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::api::networking::v1::Ingress;

    #[test]
    fn test_recover_full_object() {
        let obj = Arc::new(secret("default", "tls", &[("tls.crt", "abc")]));
        let deleted = DeletedObject::Full(Arc::clone(&obj));
        let recovered = deleted.recover().unwrap();
        assert!(Arc::ptr_eq(&obj, &recovered));
    }

    #[test]
    fn test_recover_from_tombstone() {
        let obj = ingress("web", "shop", Some("haproxy"));
        let tombstone = Tombstone::from_object(&obj).unwrap();
        assert_eq!(tombstone.key(), "web/shop");
        assert_eq!(tombstone.kind(), "Ingress");

        let deleted: DeletedObject<Ingress> = DeletedObject::Placeholder(tombstone);
        let recovered = deleted.recover().unwrap();
        assert_eq!(*recovered, obj);
    }

    #[test]
    fn test_tombstone_kind_mismatch() {
        let tombstone = Tombstone::from_object(&secret("web", "shop", &[])).unwrap();
        let deleted: DeletedObject<Ingress> = DeletedObject::Placeholder(tombstone);

        match deleted.recover() {
            Err(IdentityRecoveryFailure::KindMismatch { key, expected, found }) => {
                assert_eq!(key, "web/shop");
                assert_eq!(expected, "Ingress");
                assert_eq!(found, "Secret");
            }
            other => panic!("expected kind mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_tombstone_undecodable_state() {
        let tombstone = Tombstone::new(
            "default/tls",
            "Secret",
            serde_json::json!({ "metadata": "not an object" }),
        );
        let deleted: DeletedObject<Secret> = DeletedObject::Placeholder(tombstone);
        assert!(matches!(
            deleted.recover(),
            Err(IdentityRecoveryFailure::Undecodable { .. })
        ));
    }
}

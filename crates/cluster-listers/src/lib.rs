//! Cluster Listers
//!
//! Change detection and notification core of the ingress controller.
//!
//! Seven informers (Ingress, Endpoints, Service, Secret, ConfigMap, Pod and
//! Node) keep local caches of the cluster in sync. Their raw add, update and
//! delete events run through one classifier per kind, and only the
//! reconcile-relevant ones reach the [`ListerEvents`] sink.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cluster_listers::{Coordinator, ListerEvents, SyncOutcome, WatchScope, WatchSources};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(events: Arc<dyn ListerEvents>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let sources = WatchSources::live(&client, &WatchScope::AllNamespaces);
//!
//! let mut coordinator = Coordinator::builder()
//!     .events(events)
//!     .resync_interval(Duration::from_secs(600))
//!     .build(sources)?;
//!
//! let shutdown = CancellationToken::new();
//! if coordinator.start(&shutdown).await? == SyncOutcome::Synced {
//!     let ingresses = coordinator.listers().ingresses.list();
//!     println!("{} ingresses cached", ingresses.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod informer;
pub mod kind;
pub mod sink;
pub mod sync;
#[cfg(test)]
mod test_utils;

pub use classifier::{
    ChangeClassifier, ConfigMapClassifier, EndpointsClassifier, IngressClassifier,
    NodeClassifier, PodClassifier, SecretClassifier, ServiceClassifier,
};
pub use coordinator::{Coordinator, CoordinatorBuilder, Listers, WatchScope, WatchSources};
pub use error::{IdentityRecoveryFailure, ListerError};
pub use event::{DeletedObject, RawEvent, Tombstone};
pub use informer::{EventHandler, Informer, Lister, WatchSource};
pub use kind::{ResourceKind, object_key};
pub use sink::{
    AuditEvent, AuditReason, AuditRecorder, Emit, IngressClass, ListerEvents, LogRecorder,
    NotificationSignal,
};
pub use sync::{SyncBarrier, SyncFlag, SyncOutcome, SyncSignal, sync_flag};

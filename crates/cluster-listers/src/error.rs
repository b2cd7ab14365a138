//! Error types for the listers core.
//!
//! Setup problems surface as [`ListerError`]. Per-event problems surface as
//! [`IdentityRecoveryFailure`]; those are logged by the dispatch loop and the
//! offending event is dropped, they never stop the watch.

use thiserror::Error;

/// Errors that can occur while configuring or running the coordinator.
#[derive(Debug, Error)]
pub enum ListerError {
    /// A required collaborator was not supplied at setup
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// `start` was called on a coordinator whose informers already run
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// An informer task panicked or was aborted
    #[error("Informer task failed: {0}")]
    Task(String),
}

/// A delete event whose payload cannot be turned back into the expected object.
#[derive(Debug, Error)]
pub enum IdentityRecoveryFailure {
    /// The tombstone was recorded for another kind of object
    #[error("tombstone {key} contained object of kind {found}, expected {expected}")]
    KindMismatch {
        /// Key carried by the tombstone
        key: String,
        /// Kind the classifier handles
        expected: String,
        /// Kind declared by the tombstone
        found: String,
    },

    /// The last known state could not be decoded as the expected kind
    #[error("couldn't decode {kind} {key} from tombstone: {source}")]
    Undecodable {
        /// Key carried by the tombstone
        key: String,
        /// Kind declared by the tombstone
        kind: String,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },
}

//! Controller-specific error types.
//!
//! This module defines error types specific to the ingress controller
//! bootstrap that are not covered by upstream library errors.

use cluster_listers::ListerError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ingress controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listers setup or informer failure
    #[error("Listers error: {0}")]
    Listers(#[from] ListerError),

    /// A background task panicked
    #[error("Background task failed: {0}")]
    Task(String),
}

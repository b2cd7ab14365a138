//! Ingress Controller
//!
//! Watches Ingress, Endpoints, Service, Secret, ConfigMap, Pod and Node
//! objects, keeps local caches of them and turns the changes that matter
//! into reconcile requests, secret and config map notifications and
//! Kubernetes events for ingress transitions.

mod config;
mod controller;
mod error;
mod events;
mod recorder;

use controller::Controller;
use crate::config::Config;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // kube's rustls backend needs a process-wide crypto provider; ignore a second install
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Ingress Controller");

    // Load configuration from environment variables
    let config = Config::from_env()?;
    config.log();

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

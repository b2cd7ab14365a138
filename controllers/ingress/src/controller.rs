//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the listers
//! coordinator to the channel sink and the event recorder, and runs the
//! consumer loop until shutdown.

use std::sync::Arc;
use std::time::Duration;

use cluster_listers::{Coordinator, SyncOutcome, WatchScope, WatchSources, object_key};
use kube::Client;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ControllerError;
use crate::events::{ChannelEvents, ClassPolicy, ListerEvent};
use crate::recorder::KubeRecorder;

/// Main controller for the ingress listers.
pub struct Controller {
    config: Config,
    client: Client,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Ingress Controller");
        let client = Client::try_default().await?;
        Ok(Self { config, client })
    }

    /// Runs the controller until Ctrl-C.
    pub async fn run(self) -> Result<(), ControllerError> {
        let shutdown = CancellationToken::new();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
                }
                shutdown.cancel();
            });
        }

        let policy = ClassPolicy::new(&self.config.ingress_class, self.config.watch_without_class);
        let (events, rx) = ChannelEvents::new(policy);
        let (recorder, recorder_task) = KubeRecorder::spawn(
            self.client.clone(),
            &self.config.controller_name,
            shutdown.clone(),
        );

        let scope = WatchScope::from_namespace(self.config.namespace.as_deref());
        let mut coordinator = Coordinator::builder()
            .events(Arc::new(events))
            .recorder(Arc::new(recorder))
            .resync_interval(self.config.resync)
            .build(WatchSources::live(&self.client, &scope))?;

        let outcome = match self.config.cache_sync_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, coordinator.start(&shutdown)).await {
                    Ok(outcome) => Some(outcome?),
                    Err(_) => {
                        // informers keep running, the caches fill in later
                        error!(
                            ?timeout,
                            "initial cache sync has timed out or shutdown has requested"
                        );
                        None
                    }
                }
            }
            None => Some(coordinator.start(&shutdown).await?),
        };

        if outcome != Some(SyncOutcome::Cancelled) {
            info!("Ingress Controller running");
            let requested = consume(rx, self.config.notify_debounce, shutdown.clone()).await;
            info!(requested, "consumer stopped");
        }

        shutdown.cancel();
        coordinator.wait().await?;
        recorder_task
            .await
            .map_err(|e| ControllerError::Task(format!("event recorder panicked: {e}")))?;
        info!("Ingress Controller stopped");
        Ok(())
    }
}

/// Drains lister events until shutdown or until every sender is gone.
///
/// `Notify` bursts within `debounce` collapse into one reconcile request.
/// Returns how many reconciles were requested.
pub async fn consume(
    mut rx: mpsc::UnboundedReceiver<ListerEvent>,
    debounce: Duration,
    shutdown: CancellationToken,
) -> u64 {
    let mut requested = 0;
    let mut pending: Option<(Instant, u64)> = None;

    loop {
        let deadline = pending.map(|(deadline, _)| deadline);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = sleep_until(deadline) => {
                if let Some((_, coalesced)) = pending.take() {
                    requested += 1;
                    info!(coalesced, "reconcile requested");
                }
            }
            event = rx.recv() => match event {
                Some(ListerEvent::Notify) => {
                    let (_, coalesced) =
                        pending.get_or_insert_with(|| (Instant::now() + debounce, 0));
                    *coalesced += 1;
                }
                Some(ListerEvent::SecretUpdated(key)) => info!(secret = %key, "secret updated"),
                Some(ListerEvent::SecretDeleted(key)) => info!(secret = %key, "secret deleted"),
                Some(ListerEvent::ConfigMapAdded(cm)) => {
                    debug!(config_map = %object_key(&*cm), "config map added");
                }
                Some(ListerEvent::ConfigMapUpdated(cm)) => {
                    info!(config_map = %object_key(&*cm), "config map updated");
                }
                None => break,
            },
        }
    }

    if let Some((_, coalesced)) = pending {
        requested += 1;
        info!(coalesced, "reconcile requested");
    }
    requested
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

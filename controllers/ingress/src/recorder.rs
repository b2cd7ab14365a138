//! Audit recorder publishing Kubernetes events.

use cluster_listers::{AuditEvent, AuditRecorder};
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Publishes audit events from a background task.
///
/// `record` only enqueues, so informers are never held up by the API server.
#[derive(Debug, Clone)]
pub struct KubeRecorder {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl KubeRecorder {
    /// Starts the publishing task. It stops once `shutdown` fires.
    pub fn spawn(
        client: Client,
        controller: &str,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: None,
        };
        let recorder = Recorder::new(client, reporter);

        let task = tokio::spawn(async move {
            loop {
                let audit = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    audit = rx.recv() => match audit {
                        Some(audit) => audit,
                        None => break,
                    },
                };
                if let Err(e) = recorder.publish(&kube_event(&audit), &audit.regarding).await {
                    warn!(error = %e, note = %audit.note, "failed to publish event");
                }
            }
            debug!("event recorder stopped");
        });

        (Self { tx }, task)
    }
}

impl AuditRecorder for KubeRecorder {
    fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            debug!("event recorder stopped, dropping audit event");
        }
    }
}

fn kube_event(audit: &AuditEvent) -> Event {
    Event {
        type_: EventType::Normal,
        reason: audit.reason.as_str().to_string(),
        note: Some(audit.note.clone()),
        action: audit.reason.as_str().to_string(),
        secondary: None,
    }
}

//! Initial cache sync tracking.
//!
//! Each informer owns a [`SyncFlag`] and flips it once its first listing is
//! in the cache. The matching [`SyncSignal`]s are cheap to clone and can be
//! sampled or awaited. [`SyncBarrier`] waits for all of them at once, racing
//! a cancellation token.

use futures::future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kind::ResourceKind;

/// Creates a connected flag/signal pair, initially not synced.
pub fn sync_flag() -> (SyncFlag, SyncSignal) {
    let (tx, rx) = watch::channel(false);
    (SyncFlag(tx), SyncSignal(rx))
}

/// Writer side of a sync state. Monotonic: once synced, always synced.
#[derive(Debug)]
pub struct SyncFlag(watch::Sender<bool>);

impl SyncFlag {
    /// Marks the cache as synced. Returns `true` on the first call only.
    pub fn mark_synced(&self) -> bool {
        !self.0.send_replace(true)
    }

    /// A new reader for this flag.
    pub fn signal(&self) -> SyncSignal {
        SyncSignal(self.0.subscribe())
    }
}

/// Reader side of a sync state.
#[derive(Debug, Clone)]
pub struct SyncSignal(watch::Receiver<bool>);

impl SyncSignal {
    /// Whether the initial listing has completed.
    pub fn is_synced(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the initial listing has completed.
    ///
    /// Never resolves if the informer goes away before syncing.
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        let synced = rx.wait_for(|synced| *synced).await.is_ok();
        if !synced {
            future::pending::<()>().await;
        }
    }
}

/// Result of waiting for the initial sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every cache finished its initial listing
    Synced,
    /// Shutdown was requested before every cache synced
    Cancelled,
}

/// Gate that opens once every watched collection finished its first listing.
#[derive(Debug, Clone, Default)]
pub struct SyncBarrier {
    watches: Vec<(ResourceKind, SyncSignal)>,
}

impl SyncBarrier {
    /// Creates a barrier over the given sync signals.
    pub fn new(watches: Vec<(ResourceKind, SyncSignal)>) -> Self {
        Self { watches }
    }

    /// Whether every watch has synced, without waiting.
    pub fn is_synced(&self) -> bool {
        self.watches.iter().all(|(_, signal)| signal.is_synced())
    }

    /// Kinds that have not synced yet.
    pub fn pending(&self) -> Vec<ResourceKind> {
        self.watches
            .iter()
            .filter(|(_, signal)| !signal.is_synced())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Waits until every watch has synced or `shutdown` fires.
    ///
    /// Cancellation wins when both are ready; there is no partial outcome.
    pub async fn await_synced(&self, shutdown: &CancellationToken) -> SyncOutcome {
        let all_synced = future::join_all(self.watches.iter().map(|(kind, signal)| async move {
            signal.wait().await;
            debug!(kind = %kind, "cache synced");
        }));

        tokio::select! {
            biased;
            () = shutdown.cancelled() => SyncOutcome::Cancelled,
            _ = all_synced => SyncOutcome::Synced,
        }
    }
}

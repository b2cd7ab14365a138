//! Informers: local caches of one kind with a change feed.
//!
//! An [`Informer`] drives a [`WatchSource`] (a stream of kube watcher events)
//! into a reflector store and translates what it sees into [`RawEvent`]s:
//!
//! - `Apply` of an unknown key is an add, of a known key an update;
//! - `Delete` is a delete carrying the full object;
//! - a (re)list is a sequence of adds/updates, and every cached object
//!   missing from the new listing becomes a delete carrying a
//!   [`Tombstone`], since its final state was never observed.
//!
//! The first completed listing flips the informer's [`SyncFlag`]. Handlers
//! run inline, so events of one informer are dispatched strictly in order.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use kube::runtime::reflector::{self, ObjectRef, Store, store::Writer};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::event::{DeletedObject, RawEvent, Tombstone};
use crate::kind::ResourceKind;
use crate::sync::{SyncFlag, SyncSignal, sync_flag};

/// Receives the raw events of one informer.
pub trait EventHandler<K>: Send + Sync {
    /// Handles one event. Called sequentially, never concurrently for the
    /// same informer.
    fn handle(&self, event: RawEvent<K>);
}

/// Stream of watcher events feeding an informer.
pub struct WatchSource<K>(BoxStream<'static, Result<Event<K>, watcher::Error>>);

impl<K> WatchSource<K>
where
    K: Send + 'static,
{
    /// Wraps any stream of watcher events.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Event<K>, watcher::Error>> + Send + 'static,
    {
        Self(stream.boxed())
    }

    /// A source that lists nothing and never changes.
    ///
    /// The informer fed by it reports synced right away with an empty cache.
    pub fn empty() -> Self {
        let listing = stream::iter([Ok(Event::Init), Ok(Event::InitDone)]);
        Self::from_stream(listing.chain(stream::pending()))
    }
}

impl<K> WatchSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    /// Live list+watch against the cluster, retrying with kube's default backoff.
    pub fn live(api: Api<K>) -> Self {
        Self::from_stream(watcher::watcher(api, watcher::Config::default()).default_backoff())
    }
}

impl<K> Debug for WatchSource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSource").finish_non_exhaustive()
    }
}

/// Read handle over an informer's cache.
#[derive(Clone)]
pub struct Lister<K>
where
    K: Resource<DynamicType = ()> + 'static,
{
    kind: ResourceKind,
    store: Store<K>,
    synced: SyncSignal,
}

impl<K> Debug for Lister<K>
where
    K: Resource<DynamicType = ()> + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lister")
            .field("kind", &self.kind)
            .field("synced", &self.synced.is_synced())
            .finish_non_exhaustive()
    }
}

impl<K> Lister<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    /// Kind cached by this lister.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Every cached object, in no particular order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Looks an object up by its `<namespace>/<name>` (or `<name>`) key.
    pub fn get(&self, key: &str) -> Option<Arc<K>> {
        let reference = match key.split_once('/') {
            Some((namespace, name)) => ObjectRef::new(name).within(namespace),
            None => ObjectRef::new(key),
        };
        self.store.get(&reference)
    }

    /// Whether the initial listing has completed.
    pub fn has_synced(&self) -> bool {
        self.synced.is_synced()
    }

    /// Sync signal of the underlying informer.
    pub fn sync_signal(&self) -> SyncSignal {
        self.synced.clone()
    }
}

/// Cache of one kind kept up to date from a [`WatchSource`].
pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: ResourceKind,
    source: WatchSource<K>,
    store: Store<K>,
    writer: Writer<K>,
    synced: SyncFlag,
    resync: Duration,
    relist: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + Send + Sync + 'static,
{
    /// Creates an informer. A zero `resync` disables periodic resyncs.
    pub fn new(kind: ResourceKind, source: WatchSource<K>, resync: Duration) -> Self {
        let (store, writer) = reflector::store();
        let (synced, _) = sync_flag();
        Self {
            kind,
            source,
            store,
            writer,
            synced,
            resync,
            relist: None,
        }
    }

    /// Read handle over this informer's cache.
    pub fn lister(&self) -> Lister<K> {
        Lister {
            kind: self.kind,
            store: self.store.clone(),
            synced: self.synced.signal(),
        }
    }

    /// Consumes the source until it ends or `shutdown` fires, feeding
    /// `handler` with every raw event.
    pub async fn run<H>(mut self, handler: H, shutdown: CancellationToken)
    where
        H: EventHandler<K>,
    {
        info!(kind = %self.kind, "starting informer");
        let mut resync = self.resync_interval();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(kind = %self.kind, "shutdown requested, stopping informer");
                    break;
                }
                () = tick(&mut resync) => self.resync(&handler),
                next = self.source.0.next() => match next {
                    Some(Ok(event)) => self.apply(event, &handler),
                    Some(Err(e)) => warn!(kind = %self.kind, error = %e, "watch stream error"),
                    None => {
                        warn!(kind = %self.kind, "watch stream ended");
                        break;
                    }
                },
            }
        }
    }

    fn resync_interval(&self) -> Option<Interval> {
        if self.resync.is_zero() {
            return None;
        }
        let Some(start) = Instant::now().checked_add(self.resync) else {
            warn!(
                kind = %self.kind,
                resync = ?self.resync,
                "resync period out of range, resync disabled"
            );
            return None;
        };
        let mut interval = tokio::time::interval_at(start, self.resync);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    fn apply<H>(&mut self, event: Event<K>, handler: &H)
    where
        H: EventHandler<K>,
    {
        // classify against the cache as it was before this event
        let raw = match &event {
            Event::Init => {
                debug!(kind = %self.kind, "listing");
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let reference = ObjectRef::from_obj(obj);
                let raw = self.changed(&reference, obj);
                if let Some(listed) = self.relist.as_mut() {
                    listed.insert(reference);
                }
                vec![raw]
            }
            Event::InitDone => self.missed_deletes(),
            Event::Apply(obj) => vec![self.changed(&ObjectRef::from_obj(obj), obj)],
            Event::Delete(obj) => {
                vec![RawEvent::Deleted(DeletedObject::Full(Arc::new(obj.clone())))]
            }
        };

        self.writer.apply_watcher_event(&event);
        if matches!(event, Event::InitDone) && self.synced.mark_synced() {
            let count = self.store.state().len();
            info!(kind = %self.kind, count, "initial listing loaded");
        }

        for raw in raw {
            handler.handle(raw);
        }
    }

    /// Cached objects absent from the listing that just completed.
    fn missed_deletes(&mut self) -> Vec<RawEvent<K>> {
        let listed = self.relist.take().unwrap_or_default();
        self.store
            .state()
            .into_iter()
            .filter(|obj| !listed.contains(&ObjectRef::from_obj(&**obj)))
            .filter_map(|obj| match Tombstone::from_object(&*obj) {
                Ok(tombstone) => Some(RawEvent::Deleted(DeletedObject::Placeholder(tombstone))),
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        error = %e,
                        object = ?obj,
                        "couldn't build tombstone"
                    );
                    None
                }
            })
            .collect()
    }

    fn changed(&self, reference: &ObjectRef<K>, obj: &K) -> RawEvent<K> {
        let new = Arc::new(obj.clone());
        match self.store.get(reference) {
            Some(old) => RawEvent::Updated { old, new },
            None => RawEvent::Added(new),
        }
    }

    fn resync<H>(&self, handler: &H)
    where
        H: EventHandler<K>,
    {
        let cached = self.store.state();
        debug!(kind = %self.kind, count = cached.len(), "resync");
        for obj in cached {
            handler.handle(RawEvent::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }
}

impl<K> Debug for Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &self.kind)
            .field("resync", &self.resync)
            .finish_non_exhaustive()
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

//! Main coordinator implementation.
//!
//! This module contains the `Coordinator` that owns the seven informers,
//! binds each of them to its classifier and forwards the resulting
//! notifications to the configured [`ListerEvents`] sink.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Node, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, Resource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::classifier::{
    ChangeClassifier, ConfigMapClassifier, EndpointsClassifier, IngressClassifier,
    NodeClassifier, PodClassifier, SecretClassifier, ServiceClassifier,
};
use crate::error::ListerError;
use crate::event::RawEvent;
use crate::informer::{EventHandler, Informer, Lister, WatchSource};
use crate::sink::{AuditRecorder, ListerEvents, LogRecorder};
use crate::sync::{SyncBarrier, SyncOutcome};

/// Which namespaces are watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Every namespace; nodes are watched too
    AllNamespaces,
    /// A single namespace; node data is unavailable
    Namespace(String),
}

impl WatchScope {
    /// Scope from an optional namespace name; unset or empty means all.
    pub fn from_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => WatchScope::Namespace(ns.to_string()),
            _ => WatchScope::AllNamespaces,
        }
    }

    /// Whether the whole cluster is watched.
    pub fn is_cluster_wide(&self) -> bool {
        matches!(self, WatchScope::AllNamespaces)
    }

    fn api<K>(&self, client: &Client) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
    {
        match self {
            WatchScope::AllNamespaces => Api::all(client.clone()),
            WatchScope::Namespace(ns) => Api::namespaced(client.clone(), ns),
        }
    }
}

/// The seven watch sources, one per kind.
#[derive(Debug)]
pub struct WatchSources {
    /// Ingress source
    pub ingresses: WatchSource<Ingress>,
    /// Endpoints source
    pub endpoints: WatchSource<Endpoints>,
    /// Service source
    pub services: WatchSource<Service>,
    /// Secret source
    pub secrets: WatchSource<Secret>,
    /// ConfigMap source
    pub config_maps: WatchSource<ConfigMap>,
    /// Pod source
    pub pods: WatchSource<Pod>,
    /// Node source
    pub nodes: WatchSource<Node>,
}

impl WatchSources {
    /// Live sources against the cluster.
    ///
    /// Nodes are cluster scoped: in single-namespace mode the node source is
    /// empty and synced from the start.
    pub fn live(client: &Client, scope: &WatchScope) -> Self {
        let nodes = if scope.is_cluster_wide() {
            WatchSource::live(Api::all(client.clone()))
        } else {
            info!("watching a single namespace, node listing disabled");
            WatchSource::empty()
        };
        Self {
            ingresses: WatchSource::live(scope.api(client)),
            endpoints: WatchSource::live(scope.api(client)),
            services: WatchSource::live(scope.api(client)),
            secrets: WatchSource::live(scope.api(client)),
            config_maps: WatchSource::live(scope.api(client)),
            pods: WatchSource::live(scope.api(client)),
            nodes,
        }
    }
}

/// Read handles over the seven caches.
#[derive(Debug, Clone)]
pub struct Listers {
    /// Ingress cache
    pub ingresses: Lister<Ingress>,
    /// Endpoints cache
    pub endpoints: Lister<Endpoints>,
    /// Service cache
    pub services: Lister<Service>,
    /// Secret cache
    pub secrets: Lister<Secret>,
    /// ConfigMap cache
    pub config_maps: Lister<ConfigMap>,
    /// Pod cache
    pub pods: Lister<Pod>,
    /// Node cache
    pub nodes: Lister<Node>,
}

impl Listers {
    fn barrier(&self) -> SyncBarrier {
        SyncBarrier::new(vec![
            (self.ingresses.kind(), self.ingresses.sync_signal()),
            (self.endpoints.kind(), self.endpoints.sync_signal()),
            (self.services.kind(), self.services.sync_signal()),
            (self.secrets.kind(), self.secrets.sync_signal()),
            (self.config_maps.kind(), self.config_maps.sync_signal()),
            (self.pods.kind(), self.pods.sync_signal()),
            (self.nodes.kind(), self.nodes.sync_signal()),
        ])
    }
}

struct Informers {
    ingresses: Informer<Ingress>,
    endpoints: Informer<Endpoints>,
    services: Informer<Service>,
    secrets: Informer<Secret>,
    config_maps: Informer<ConfigMap>,
    pods: Informer<Pod>,
    nodes: Informer<Node>,
}

impl Informers {
    fn new(sources: WatchSources, resync: Duration) -> Self {
        Self {
            ingresses: Informer::new(IngressClassifier::KIND, sources.ingresses, resync),
            endpoints: Informer::new(EndpointsClassifier::KIND, sources.endpoints, resync),
            services: Informer::new(ServiceClassifier::KIND, sources.services, resync),
            secrets: Informer::new(SecretClassifier::KIND, sources.secrets, resync),
            config_maps: Informer::new(ConfigMapClassifier::KIND, sources.config_maps, resync),
            pods: Informer::new(PodClassifier::KIND, sources.pods, resync),
            nodes: Informer::new(NodeClassifier::KIND, sources.nodes, resync),
        }
    }

    fn listers(&self) -> Listers {
        Listers {
            ingresses: self.ingresses.lister(),
            endpoints: self.endpoints.lister(),
            services: self.services.lister(),
            secrets: self.secrets.lister(),
            config_maps: self.config_maps.lister(),
            pods: self.pods.lister(),
            nodes: self.nodes.lister(),
        }
    }
}

/// Binds one informer's feed to its classifier and the collaborators.
struct Dispatcher<C> {
    events: Arc<dyn ListerEvents>,
    recorder: Arc<dyn AuditRecorder>,
    classifier: PhantomData<fn() -> C>,
}

impl<C: ChangeClassifier> Dispatcher<C> {
    fn new(events: Arc<dyn ListerEvents>, recorder: Arc<dyn AuditRecorder>) -> Self {
        Self {
            events,
            recorder,
            classifier: PhantomData,
        }
    }
}

impl<C: ChangeClassifier> EventHandler<C::Object> for Dispatcher<C> {
    fn handle(&self, event: RawEvent<C::Object>) {
        match C::classify(&event, self.events.as_ref()) {
            Ok(emits) => {
                for emit in emits {
                    emit.deliver(self.events.as_ref(), self.recorder.as_ref());
                }
            }
            Err(e) => {
                error!(kind = %C::KIND, error = %e, payload = ?event, "dropping event");
            }
        }
    }
}

/// Builder for [`Coordinator`].
#[derive(Default)]
pub struct CoordinatorBuilder {
    events: Option<Arc<dyn ListerEvents>>,
    recorder: Option<Arc<dyn AuditRecorder>>,
    resync: Duration,
}

impl CoordinatorBuilder {
    /// Sink receiving the notifications. Required.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn ListerEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Recorder for ingress audit events. Defaults to [`LogRecorder`].
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn AuditRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Period at which cached objects are re-delivered; zero disables it.
    #[must_use]
    pub fn resync_interval(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    /// Builds the coordinator over the given sources.
    ///
    /// # Errors
    ///
    /// Returns [`ListerError::Configuration`] when no sink was supplied.
    pub fn build(self, sources: WatchSources) -> Result<Coordinator, ListerError> {
        let events = self
            .events
            .ok_or_else(|| ListerError::Configuration("event sink is required".to_string()))?;
        let recorder = self.recorder.unwrap_or_else(|| Arc::new(LogRecorder));

        let informers = Informers::new(sources, self.resync);
        let listers = informers.listers();
        let barrier = listers.barrier();

        Ok(Coordinator {
            events,
            recorder,
            listers,
            barrier,
            informers: Some(informers),
            tasks: Vec::new(),
        })
    }
}

impl fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("events", &self.events.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("resync", &self.resync)
            .finish_non_exhaustive()
    }
}

/// Owns the informers and drives them until shutdown.
pub struct Coordinator {
    events: Arc<dyn ListerEvents>,
    recorder: Arc<dyn AuditRecorder>,
    listers: Listers,
    barrier: SyncBarrier,
    informers: Option<Informers>,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("listers", &self.listers)
            .field("started", &self.informers.is_none())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Starts building a coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Configures a coordinator watching the cluster through `client`.
    ///
    /// # Errors
    ///
    /// See [`CoordinatorBuilder::build`].
    pub fn configure(
        events: Arc<dyn ListerEvents>,
        client: &Client,
        scope: &WatchScope,
        resync: Duration,
    ) -> Result<Self, ListerError> {
        Self::builder()
            .events(events)
            .resync_interval(resync)
            .build(WatchSources::live(client, scope))
    }

    /// Read handles over the caches.
    pub fn listers(&self) -> &Listers {
        &self.listers
    }

    /// Whether every cache finished its initial listing.
    pub fn has_synced(&self) -> bool {
        self.barrier.is_synced()
    }

    /// Starts the informers and waits for their initial sync.
    ///
    /// Informers keep running after this returns, until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ListerError::AlreadyStarted`] if called twice.
    pub async fn start(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<SyncOutcome, ListerError> {
        let informers = self.informers.take().ok_or(ListerError::AlreadyStarted)?;
        self.spawn::<IngressClassifier>(informers.ingresses, shutdown);
        self.spawn::<EndpointsClassifier>(informers.endpoints, shutdown);
        self.spawn::<ServiceClassifier>(informers.services, shutdown);
        self.spawn::<SecretClassifier>(informers.secrets, shutdown);
        self.spawn::<ConfigMapClassifier>(informers.config_maps, shutdown);
        self.spawn::<PodClassifier>(informers.pods, shutdown);
        self.spawn::<NodeClassifier>(informers.nodes, shutdown);

        info!("loading object cache...");
        let outcome = self.barrier.await_synced(shutdown).await;
        match outcome {
            SyncOutcome::Synced => info!("cache successfully synced"),
            SyncOutcome::Cancelled => error!(
                pending = ?self.barrier.pending(),
                "initial cache sync has timed out or shutdown has requested"
            ),
        }
        Ok(outcome)
    }

    fn spawn<C: ChangeClassifier>(
        &mut self,
        informer: Informer<C::Object>,
        shutdown: &CancellationToken,
    ) {
        let dispatcher =
            Dispatcher::<C>::new(Arc::clone(&self.events), Arc::clone(&self.recorder));
        self.tasks.push(tokio::spawn(informer.run(dispatcher, shutdown.clone())));
    }

    /// Waits for every informer task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ListerError::Task`] if an informer task panicked.
    pub async fn wait(self) -> Result<(), ListerError> {
        for result in future::join_all(self.tasks).await {
            result.map_err(|e| ListerError::Task(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeletedObject, Tombstone};
    use crate::sink::AuditReason;
    use crate::test_utils::{RecordingEvents, SinkCall, ingress};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Level;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Counts error-level events that carry the dropped payload.
    #[derive(Clone, Default)]
    struct DroppedEvents(Arc<AtomicUsize>);

    impl DroppedEvents {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for DroppedEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            if *metadata.level() == Level::ERROR && metadata.fields().field("payload").is_some() {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn empty_sources() -> WatchSources {
        WatchSources {
            ingresses: WatchSource::empty(),
            endpoints: WatchSource::empty(),
            services: WatchSource::empty(),
            secrets: WatchSource::empty(),
            config_maps: WatchSource::empty(),
            pods: WatchSource::empty(),
            nodes: WatchSource::empty(),
        }
    }

    #[test]
    fn test_build_requires_sink() {
        let result = Coordinator::builder().build(empty_sources());
        assert!(matches!(result, Err(ListerError::Configuration(_))));
    }

    #[test]
    fn test_watch_scope_from_namespace() {
        assert_eq!(WatchScope::from_namespace(None), WatchScope::AllNamespaces);
        assert_eq!(WatchScope::from_namespace(Some("")), WatchScope::AllNamespaces);
        assert_eq!(
            WatchScope::from_namespace(Some("ingress")),
            WatchScope::Namespace("ingress".to_string())
        );
        assert!(!WatchScope::Namespace("ingress".into()).is_cluster_wide());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let sink = Arc::new(RecordingEvents::default());
        let mut coordinator = Coordinator::builder().events(sink).build(empty_sources()).unwrap();
        let shutdown = CancellationToken::new();

        assert!(!coordinator.has_synced());
        assert_eq!(coordinator.start(&shutdown).await.unwrap(), SyncOutcome::Synced);
        assert!(coordinator.has_synced());
        assert!(matches!(
            coordinator.start(&shutdown).await,
            Err(ListerError::AlreadyStarted)
        ));

        shutdown.cancel();
        coordinator.wait().await.unwrap();
    }

    #[test]
    fn test_dispatcher_drops_unrecoverable_delete() {
        let sink = Arc::new(RecordingEvents::default());
        let dispatcher = Dispatcher::<IngressClassifier>::new(sink.clone(), sink.clone());

        let foreign = Tombstone::new("default/web", "Service", serde_json::json!({}));
        dispatcher.handle(RawEvent::Deleted(DeletedObject::Placeholder(foreign)));
        assert!(sink.calls().is_empty());

        dispatcher.handle(RawEvent::Added(Arc::new(ingress("default", "web", Some("haproxy")))));
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Audit(AuditReason::Create, "Ingress default/web".to_string()),
                SinkCall::Notify,
            ]
        );
    }

    #[test]
    fn test_unrecoverable_delete_logs_one_error() {
        let sink = Arc::new(RecordingEvents::default());
        let errors = DroppedEvents::default();
        let subscriber = tracing_subscriber::registry().with(errors.clone());

        tracing::subscriber::with_default(subscriber, || {
            let ingresses = Dispatcher::<IngressClassifier>::new(sink.clone(), sink.clone());
            let foreign = Tombstone::new("default/web", "Service", serde_json::json!({}));
            ingresses.handle(RawEvent::Deleted(DeletedObject::Placeholder(foreign)));
            assert_eq!(errors.count(), 1);

            let secrets = Dispatcher::<SecretClassifier>::new(sink.clone(), sink.clone());
            let foreign = Tombstone::new("default/tls", "ConfigMap", serde_json::json!({}));
            secrets.handle(RawEvent::Deleted(DeletedObject::Placeholder(foreign)));
            assert_eq!(errors.count(), 2);
        });
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_namespace_never_lists_nodes() {
        let requests = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = Arc::clone(&requests);
        let service = tower::service_fn(move |request: http::Request<kube::client::Body>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(request.uri().to_string());
                let response = http::Response::builder()
                    .status(http::StatusCode::SERVICE_UNAVAILABLE)
                    .body(kube::client::Body::empty())
                    .unwrap();
                Ok::<_, std::convert::Infallible>(response)
            }
        });
        let client = Client::new(service, "default");
        let sink = Arc::new(RecordingEvents::default());
        let scope = WatchScope::Namespace("shop".to_string());
        let mut coordinator =
            Coordinator::configure(sink, &client, &scope, Duration::ZERO).unwrap();
        let shutdown = CancellationToken::new();

        let started =
            tokio::time::timeout(Duration::from_millis(200), coordinator.start(&shutdown)).await;
        assert!(started.is_err(), "namespaced caches can't sync against a failing API");
        assert!(coordinator.listers().nodes.has_synced());
        assert!(coordinator.listers().nodes.list().is_empty());
        assert!(!coordinator.listers().pods.has_synced());

        shutdown.cancel();
        coordinator.wait().await.unwrap();

        let uris = requests.lock().unwrap().clone();
        assert!(uris.iter().any(|uri| uri.contains("/namespaces/shop/")));
        assert!(uris.iter().all(|uri| !uri.contains("/nodes")));
    }

    #[test]
    fn test_debug_output() {
        let builder = Coordinator::builder().resync_interval(Duration::from_secs(30));
        assert!(format!("{builder:?}").starts_with("CoordinatorBuilder"));

        let sink = Arc::new(RecordingEvents::default());
        let coordinator = builder.events(sink).build(empty_sources()).unwrap();
        let debug = format!("{coordinator:?}");
        assert!(debug.starts_with("Coordinator {"));
        assert!(debug.contains("started: false"));
    }
}

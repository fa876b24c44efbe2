//! The Source Watcher (spec §4.3): subscribes to cluster change events for
//! the workload kinds referenced by parsed paths, keeps the [`WorkloadIndex`]
//! and [`NodeRegistry`] current, and publishes ADDED/DELETED [`SourceEvent`]s
//! as the live `LogSource` set changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, SelectAll, StreamExt};
use futures::FutureExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, NodeEvent, WorkloadEvent};
use crate::error::SyncError;
use crate::path::{ParsedSourcePath, WorkloadKind};
use crate::source::{FacetFilters, LogSource};
use crate::workload::{NodeRegistry, WorkloadIndex, WorkloadObject};

const EVENT_BROADCAST_CAPACITY: usize = 1024;

/// An ADDED or DELETED notification about the live `LogSource` set.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Added(LogSource),
    Deleted(LogSource),
}

/// Raw events fanned in from every informer, tagged so the single owning
/// task can dispatch them.
enum RawEvent {
    Workload(WorkloadEvent),
    Node(NodeEvent),
}

/// Resolves `paths` + `filters` against live cluster state into a set of
/// concrete `LogSource`s, publishing the diff on every structural change.
pub struct SourceWatcher<C: ClusterClient> {
    cluster: C,
    paths: Vec<ParsedSourcePath>,
    filters: FacetFilters,
    sources: Arc<RwLock<HashMap<LogSource, LogSource>>>,
    events_tx: broadcast::Sender<SourceEvent>,
    ready: Arc<tokio::sync::Notify>,
    is_ready: Arc<std::sync::atomic::AtomicBool>,
}

impl<C: ClusterClient> SourceWatcher<C> {
    pub fn new(cluster: C, paths: Vec<ParsedSourcePath>, filters: FacetFilters) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self {
            cluster,
            paths,
            filters,
            sources: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            ready: Arc::new(tokio::sync::Notify::new()),
            is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// The workload kinds this watcher must subscribe informers for: those
    /// named by a parsed path, plus Pods always, plus each kind's prefetch
    /// kind (ReplicaSet for Deployment, Job for CronJob) — spec §4.3.
    fn required_kinds(&self) -> HashSet<WorkloadKind> {
        let mut kinds: HashSet<WorkloadKind> = self.paths.iter().map(|p| p.workload_kind).collect();
        kinds.insert(WorkloadKind::Pod);
        for path in &self.paths {
            if let Some(prefetch) = path.workload_kind.prefetch_kind() {
                kinds.insert(prefetch);
            }
        }
        kinds
    }

    /// Subscribes to future ADDED/DELETED events. Must be called before
    /// [`Self::start`] to avoid missing the initial batch.
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(std::sync::atomic::Ordering::Acquire)
    }

    /// A point-in-time snapshot of the currently live source set.
    pub async fn current_sources(&self) -> Vec<LogSource> {
        self.sources.read().await.values().cloned().collect()
    }

    /// Starts every required informer, blocks until all initial cache syncs
    /// complete, then marks the watcher ready and publishes one ADDED event
    /// per initially-resolved source. Spawns the long-running event loop
    /// that keeps the index/registry/source-set current thereafter.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        let kinds = self.required_kinds();
        info!(?kinds, "starting source watcher");

        let mut merged: SelectAll<_> = SelectAll::new();
        let mut synced_rxs = Vec::new();

        for kind in kinds {
            let handle = self.cluster.watch_workloads(kind);
            synced_rxs.push((format!("{kind:?}"), handle.synced));
            merged.push(
                ReceiverStream::new(handle.events)
                    .map(RawEvent::Workload)
                    .boxed(),
            );
        }

        let node_handle = self.cluster.watch_nodes();
        synced_rxs.push(("Node".to_string(), node_handle.synced));
        merged.push(ReceiverStream::new(node_handle.events).map(RawEvent::Node).boxed());

        let mut index = WorkloadIndex::new();
        let mut registry = NodeRegistry::new();

        // Drain whatever arrived before cache sync completed into the
        // index/registry without publishing events (spec §4.3: "pre-ready
        // mutations update indices but do not publish events"). `InitDone`
        // only means the backlog was enqueued on the events channel, not
        // that we've pulled it off yet, so this has to race the drain
        // against the synced signals rather than await them first.
        let mut synced_pending: FuturesUnordered<_> = synced_rxs
            .into_iter()
            .map(|(name, rx)| async move { (name, rx.await) })
            .collect();
        let mut sync_failures = Vec::new();

        while !synced_pending.is_empty() {
            tokio::select! {
                event = merged.next() => {
                    match event {
                        Some(event) => apply_raw_event(&mut index, &mut registry, event),
                        None => break,
                    }
                }
                result = synced_pending.next() => {
                    if let Some((name, outcome)) = result {
                        if !matches!(outcome, Ok(true)) {
                            sync_failures.push(name);
                        }
                    }
                }
            }
        }

        if !sync_failures.is_empty() {
            return Err(SyncError {
                failures: sync_failures.len(),
                first: sync_failures[0].clone(),
            });
        }

        // Mop up anything still sitting in the channel that lost the race
        // against the synced signal that just settled it.
        while let Some(Some(event)) = merged.next().now_or_never() {
            apply_raw_event(&mut index, &mut registry, event);
        }

        let initial_sources = self.recompute(&mut index, &mut registry, &HashMap::new());
        {
            let mut guard = self.sources.write().await;
            *guard = initial_sources.clone();
        }

        self.is_ready.store(true, std::sync::atomic::Ordering::Release);
        self.ready.notify_waiters();

        for source in initial_sources.values() {
            let _ = self.events_tx.send(SourceEvent::Added(source.clone()));
        }

        let sources_handle = Arc::clone(&self.sources);
        let events_tx = self.events_tx.clone();
        let paths = self.paths.clone();
        let filters = self.filters.clone();

        tokio::spawn(async move {
            run_event_loop(merged, index, registry, sources_handle, events_tx, paths, filters, cancel).await;
        });

        Ok(())
    }

    /// Single-pass recomputation of the desired source set (spec §4.3
    /// "Recomputation"). Pure function of the current index/registry/paths/
    /// filters so it is directly unit-testable without a cluster.
    fn recompute(
        &self,
        index: &mut WorkloadIndex,
        registry: &mut NodeRegistry,
        _previous: &HashMap<LogSource, LogSource>,
    ) -> HashMap<LogSource, LogSource> {
        recompute_sources(index, registry, &self.paths, &self.filters)
    }
}

/// Dispatches one raw informer event into the index/registry it belongs to.
fn apply_raw_event(index: &mut WorkloadIndex, registry: &mut NodeRegistry, event: RawEvent) {
    match event {
        RawEvent::Workload(WorkloadEvent::Applied(obj)) => index.add(obj),
        RawEvent::Workload(WorkloadEvent::Deleted(obj)) => index.remove(&obj.uid),
        RawEvent::Node(NodeEvent::Applied { name, facts }) => registry.upsert(name, facts),
        RawEvent::Node(NodeEvent::Deleted { name }) => registry.remove(&name),
    }
}

/// Pure recomputation: enumerates matching workloads per parsed path,
/// descends to pods, and materializes `LogSource`s subject to the facet
/// filters and container-selection rule (spec §4.3 steps 1-5).
fn recompute_sources(
    index: &WorkloadIndex,
    registry: &NodeRegistry,
    paths: &[ParsedSourcePath],
    filters: &FacetFilters,
) -> HashMap<LogSource, LogSource> {
    let mut sources = HashMap::new();

    for path in paths {
        let pods: Vec<&WorkloadObject> = if path.workload_kind == WorkloadKind::Pod {
            index.get_workloads(&path.namespace, WorkloadKind::Pod, &path.workload_name)
        } else {
            index
                .get_workloads(&path.namespace, path.workload_kind, &path.workload_name)
                .into_iter()
                .flat_map(|workload| index.get_pods_owned_by_workload(&workload.uid))
                .collect()
        };

        for pod in pods {
            let Some(pod_info) = &pod.pod else { continue };
            let Some(node_name) = &pod_info.node_name else {
                continue;
            };
            let Some(metadata) = registry.resolve(node_name) else {
                continue;
            };

            for (i, container) in pod_info.containers.iter().enumerate() {
                if container.container_id.is_empty() {
                    continue;
                }
                if !filters.matches(&metadata, &container.name) {
                    continue;
                }
                let wants = path.container_name == "*"
                    || path.container_name == container.name
                    || (path.container_name.is_empty() && i == 0);
                if !wants {
                    continue;
                }

                let source = LogSource {
                    namespace: pod.namespace.clone(),
                    pod_name: pod.name.clone(),
                    container_name: container.name.clone(),
                    container_id: container.container_id.clone(),
                    metadata: metadata.clone(),
                };
                sources.insert(source.clone(), source);
            }
        }
    }

    sources
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop<S>(
    mut merged: SelectAll<S>,
    mut index: WorkloadIndex,
    mut registry: NodeRegistry,
    sources_handle: Arc<RwLock<HashMap<LogSource, LogSource>>>,
    events_tx: broadcast::Sender<SourceEvent>,
    paths: Vec<ParsedSourcePath>,
    filters: FacetFilters,
    cancel: CancellationToken,
) where
    S: futures::Stream<Item = RawEvent> + Unpin,
{
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("source watcher cancelled");
                return;
            }
            event = merged.next() => event,
        };

        let Some(event) = event else {
            warn!("all informer channels closed");
            return;
        };

        apply_raw_event(&mut index, &mut registry, event);

        let new_sources = recompute_sources(&index, &registry, &paths, &filters);

        let mut guard = sources_handle.write().await;
        for (key, source) in &new_sources {
            if !guard.contains_key(key) {
                let _ = events_tx.send(SourceEvent::Added(source.clone()));
            }
        }
        for (key, source) in guard.iter() {
            if !new_sources.contains_key(key) {
                let _ = events_tx.send(SourceEvent::Deleted(source.clone()));
            }
        }
        *guard = new_sources;
    }
}

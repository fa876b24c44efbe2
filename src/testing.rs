//! Shared `#[cfg(test)]` fakes. A single in-memory [`ClusterClient`] used
//! by unit tests across `watcher`, `fetcher`, and `orchestrator` so each
//! module's tests don't need to hand-roll their own stand-in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream;
use tokio::sync::{mpsc, oneshot};

use crate::cluster::{ByteStream, ClusterClient, InformerHandle, NodeEvent, PodLogOptions, WorkloadEvent};
use crate::error::StreamOpenError;
use crate::path::WorkloadKind;
use crate::source::LogSource;
use crate::workload::{NodeFacts, WorkloadObject};

type LogKey = (String, String, String);

struct FakeLog {
    /// What `peek_log` always reports, regardless of how many times
    /// `open_log_stream` has been called.
    peek_snapshot: String,
    /// Successive full-log snapshots `open_log_stream` walks through on
    /// each call; the last entry repeats once exhausted. A single-entry
    /// log behaves like a perfectly static log.
    versions: Vec<String>,
    calls: AtomicUsize,
}

/// An in-memory [`ClusterClient`]. Workload/node informers always "sync"
/// immediately, replaying whatever was registered via
/// [`with_workload`](Self::with_workload)/[`with_node`](Self::with_node) as
/// their initial backlog; the log-streaming surface is configurable via
/// [`with_log`](Self::with_log) and [`with_growing_log`](Self::with_growing_log).
#[derive(Clone, Default)]
pub struct FakeClusterClient {
    logs: Arc<Mutex<HashMap<LogKey, Arc<FakeLog>>>>,
    workloads: Arc<Mutex<Vec<WorkloadObject>>>,
    nodes: Arc<Mutex<Vec<(String, NodeFacts)>>>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a static log: every `open_log_stream`/`peek_log` call
    /// sees the same content.
    pub fn with_log(self, namespace: &str, pod: &str, container: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        self.logs.lock().unwrap().insert(
            key(namespace, pod, container),
            Arc::new(FakeLog {
                peek_snapshot: content.clone(),
                versions: vec![content],
                calls: AtomicUsize::new(0),
            }),
        );
        self
    }

    /// Registers a log whose `open_log_stream` responses change on each
    /// successive call (simulating the live log growing between batched
    /// tail requests), while `peek_log` keeps reporting `peek_snapshot`.
    pub fn with_growing_log(
        self,
        namespace: &str,
        pod: &str,
        container: &str,
        peek_snapshot: impl Into<String>,
        versions: Vec<String>,
    ) -> Self {
        assert!(!versions.is_empty(), "with_growing_log needs at least one version");
        self.logs.lock().unwrap().insert(
            key(namespace, pod, container),
            Arc::new(FakeLog {
                peek_snapshot: peek_snapshot.into(),
                versions,
                calls: AtomicUsize::new(0),
            }),
        );
        self
    }

    /// Seeds a workload object (pod, deployment, ...) into the informer
    /// backlog `watch_workloads` replays for its kind.
    pub fn with_workload(self, workload: WorkloadObject) -> Self {
        self.workloads.lock().unwrap().push(workload);
        self
    }

    /// Seeds a node into the informer backlog `watch_nodes` replays.
    pub fn with_node(self, name: impl Into<String>, facts: NodeFacts) -> Self {
        self.nodes.lock().unwrap().push((name.into(), facts));
        self
    }
}

fn key(namespace: &str, pod: &str, container: &str) -> LogKey {
    (namespace.to_string(), pod.to_string(), container.to_string())
}

/// Applies `tail_lines` the way `kubectl logs --tail` does: the last `n`
/// newline-terminated lines of `content`, or all of it if `n` is `None`.
fn apply_tail(content: &str, tail_lines: Option<i64>) -> String {
    let Some(n) = tail_lines else {
        return content.to_string();
    };
    let lines: Vec<&str> = content.lines().collect();
    let n = n.max(0) as usize;
    let start = lines.len().saturating_sub(n);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn byte_stream_of(content: String) -> ByteStream {
    Box::pin(stream::once(async move { Ok(content.into_bytes()) }))
}

/// Builds an informer handle whose events channel is pre-loaded with
/// `backlog` (mirroring `kube_adapter`'s `Init`/`InitApply` events, which
/// land on the channel before `InitDone` resolves `synced`) and whose
/// `synced` oneshot is already resolved. The channel closes once the
/// backlog is drained; this fake never emits events after the initial
/// sync.
fn informer_with_backlog<E>(backlog: Vec<E>) -> InformerHandle<E> {
    let (tx, rx) = mpsc::channel(backlog.len().max(1));
    for event in backlog {
        tx.try_send(event).expect("backlog fits the channel capacity by construction");
    }
    drop(tx);

    let (synced_tx, synced_rx) = oneshot::channel();
    let _ = synced_tx.send(true);
    InformerHandle { events: rx, synced: synced_rx }
}

impl ClusterClient for FakeClusterClient {
    fn watch_workloads(&self, kind: WorkloadKind) -> InformerHandle<WorkloadEvent> {
        let backlog = self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|workload| workload.kind == kind)
            .cloned()
            .map(WorkloadEvent::Applied)
            .collect();
        informer_with_backlog(backlog)
    }

    fn watch_nodes(&self) -> InformerHandle<NodeEvent> {
        let backlog = self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(|(name, facts)| NodeEvent::Applied { name, facts })
            .collect();
        informer_with_backlog(backlog)
    }

    async fn open_log_stream(&self, source: &LogSource, opts: &PodLogOptions) -> Result<ByteStream, StreamOpenError> {
        let log = self
            .logs
            .lock()
            .unwrap()
            .get(&key(&source.namespace, &source.pod_name, &source.container_name))
            .cloned();
        let Some(log) = log else {
            return Err(StreamOpenError::NotFound);
        };

        let call_index = log.calls.fetch_add(1, Ordering::SeqCst);
        let version = &log.versions[call_index.min(log.versions.len() - 1)];
        Ok(byte_stream_of(apply_tail(version, opts.tail_lines)))
    }

    async fn peek_log(&self, source: &LogSource) -> Result<ByteStream, StreamOpenError> {
        let log = self
            .logs
            .lock()
            .unwrap()
            .get(&key(&source.namespace, &source.pod_name, &source.container_name))
            .cloned();
        let Some(log) = log else {
            return Err(StreamOpenError::NotFound);
        };
        Ok(byte_stream_of(log.peek_snapshot.clone()))
    }
}

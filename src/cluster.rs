//! The external-collaborator interface (spec §6): an `Informer` per
//! workload kind, a pod log stream, and a pod log peek. The cluster API
//! client itself — including its auth/token handling — is out of scope
//! (spec §1); this module only defines the boundary the rest of the engine
//! is generic over, plus one concrete adapter backed by `kube`.
//!
//! Every other module is generic over [`ClusterClient`], so tests run
//! against an in-memory fake instead of a real cluster.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::StreamOpenError;
use crate::path::WorkloadKind;
use crate::source::LogSource;
use crate::workload::{NodeFacts, WorkloadObject};

/// A raw change event for a workload object, translated from the
/// cluster's native representation into [`WorkloadObject`] by the adapter
/// before it reaches the [`Informer`](crate::watcher::Informer).
#[derive(Debug, Clone)]
pub enum WorkloadEvent {
    Applied(WorkloadObject),
    Deleted(WorkloadObject),
}

/// A raw change event for a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Applied { name: String, facts: NodeFacts },
    Deleted { name: String },
}

/// A live informer handle: an event channel plus a one-shot that resolves
/// once the informer's initial cache sync completes (spec §6.1:
/// "a synchronous `WaitForCacheSync` returns true on success").
pub struct InformerHandle<E> {
    pub events: mpsc::Receiver<E>,
    pub synced: oneshot::Receiver<bool>,
}

/// Options understood by the pod log stream (spec §6.2). `timestamps` is
/// always true and so is not modeled as a field.
#[derive(Debug, Clone, Default)]
pub struct PodLogOptions {
    pub follow: bool,
    pub tail_lines: Option<i64>,
    pub since_time: Option<chrono::DateTime<chrono::Utc>>,
    pub limit_bytes: Option<i64>,
}

/// A stream of raw byte chunks from a container's log. The fetcher is
/// responsible for splitting this into lines with its own growable
/// scanner buffer (spec §4.4); the cluster adapter just hands back bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// The boundary the rest of the engine is generic over. Implementations
/// are expected to be cheap to clone (e.g. wrapping a `kube::Client`,
/// which is itself a cheap handle).
pub trait ClusterClient: Clone + Send + Sync + 'static {
    /// Starts an informer for every object of `kind` in the cluster.
    fn watch_workloads(&self, kind: WorkloadKind) -> InformerHandle<WorkloadEvent>;

    /// Starts an informer for cluster nodes.
    fn watch_nodes(&self) -> InformerHandle<NodeEvent>;

    /// Opens a log stream for `source`. A missing pod must surface as
    /// `StreamOpenError::NotFound`; every other open-time failure as
    /// `StreamOpenError::Other`.
    async fn open_log_stream(
        &self,
        source: &LogSource,
        opts: &PodLogOptions,
    ) -> Result<ByteStream, StreamOpenError>;

    /// Peeks the first ~100 bytes of `source`'s log, used by the backward
    /// fetcher's `firstTimestamp` helper.
    async fn peek_log(&self, source: &LogSource) -> Result<ByteStream, StreamOpenError>;
}

pub mod kube_adapter;
pub use kube_adapter::KubeClusterClient;

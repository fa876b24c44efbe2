//! The concrete `kube`-backed [`ClusterClient`]. This is the only module
//! that touches `kube`/`k8s-openapi` types directly; everything else in
//! the crate is generic over the trait.

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ObjectMeta;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::{ByteStream, ClusterClient, InformerHandle, NodeEvent, PodLogOptions, WorkloadEvent};
use crate::error::StreamOpenError;
use crate::path::WorkloadKind;
use crate::source::LogSource;
use crate::workload::{ContainerStatus, NodeFacts, PodInfo, WorkloadObject};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A [`ClusterClient`] backed by a real `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn owner_uids(meta: &ObjectMeta) -> Vec<String> {
    meta.owner_references
        .iter()
        .flatten()
        .map(|owner| owner.uid.clone())
        .collect()
}

/// Builds a `WorkloadObject` from an API object's metadata; returns `None`
/// (dropping the event, logged by the caller) if any of the required
/// identity fields are missing — this should only happen for objects
/// still being created server-side.
fn base_object(kind: WorkloadKind, meta: &ObjectMeta, pod: Option<PodInfo>) -> Option<WorkloadObject> {
    Some(WorkloadObject {
        uid: meta.uid.clone()?,
        namespace: meta.namespace.clone()?,
        kind,
        name: meta.name.clone()?,
        owner_uids: owner_uids(meta),
        pod,
    })
}

fn pod_info(pod: &Pod) -> PodInfo {
    let node_name = pod.spec.as_ref().and_then(|spec| spec.node_name.clone());
    let containers = pod
        .status
        .as_ref()
        .map(|status| {
            status
                .container_statuses
                .iter()
                .flatten()
                .map(|status| ContainerStatus {
                    name: status.name.clone(),
                    container_id: status.container_id.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();
    PodInfo { node_name, containers }
}

/// Spawns a long-running task driving `kube::runtime::watcher` for one
/// workload kind, translating events into `WorkloadEvent`s and resolving
/// `synced` once the informer's initial list-and-watch settles.
fn spawn_workload_watch<K, F>(client: Client, kind: WorkloadKind, to_workload: F) -> InformerHandle<WorkloadEvent>
where
    K: kube::Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + Send + Sync + 'static,
    F: Fn(&K) -> Option<WorkloadObject> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (synced_tx, synced_rx) = oneshot::channel();

    tokio::spawn(async move {
        let api: Api<K> = Api::all(client);
        let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
        let mut synced_tx = Some(synced_tx);

        loop {
            match stream.next().await {
                Some(Ok(Event::Apply(obj))) | Some(Ok(Event::InitApply(obj))) => {
                    if let Some(workload) = to_workload(&obj) {
                        if tx.send(WorkloadEvent::Applied(workload)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Event::Delete(obj))) => {
                    if let Some(workload) = to_workload(&obj) {
                        if tx.send(WorkloadEvent::Deleted(workload)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Event::Init)) => {}
                Some(Ok(Event::InitDone)) => {
                    if let Some(tx) = synced_tx.take() {
                        let _ = tx.send(true);
                    }
                }
                Some(Err(err)) => warn!(?kind, %err, "informer stream error"),
                None => break,
            }
        }

        if let Some(tx) = synced_tx.take() {
            let _ = tx.send(false);
        }
    });

    InformerHandle { events: rx, synced: synced_rx }
}

impl ClusterClient for KubeClusterClient {
    fn watch_workloads(&self, kind: WorkloadKind) -> InformerHandle<WorkloadEvent> {
        let client = self.client.clone();
        match kind {
            WorkloadKind::Pod => spawn_workload_watch::<Pod, _>(client, kind, move |pod| {
                base_object(kind, &pod.metadata, Some(pod_info(pod)))
            }),
            WorkloadKind::Deployment => {
                spawn_workload_watch::<Deployment, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
            WorkloadKind::DaemonSet => {
                spawn_workload_watch::<DaemonSet, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
            WorkloadKind::StatefulSet => {
                spawn_workload_watch::<StatefulSet, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
            WorkloadKind::ReplicaSet => {
                spawn_workload_watch::<ReplicaSet, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
            WorkloadKind::Job => {
                spawn_workload_watch::<Job, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
            WorkloadKind::CronJob => {
                spawn_workload_watch::<CronJob, _>(client, kind, move |obj| base_object(kind, &obj.metadata, None))
            }
        }
    }

    fn watch_nodes(&self) -> InformerHandle<NodeEvent> {
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (synced_tx, synced_rx) = oneshot::channel();

        tokio::spawn(async move {
            let api: Api<Node> = Api::all(client);
            let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
            let mut synced_tx = Some(synced_tx);

            loop {
                match stream.next().await {
                    Some(Ok(Event::Apply(node))) | Some(Ok(Event::InitApply(node))) => {
                        let Some(name) = node.metadata.name.clone() else {
                            continue;
                        };
                        let facts = NodeFacts {
                            labels: node.metadata.labels.clone().unwrap_or_default(),
                            os: node
                                .status
                                .as_ref()
                                .and_then(|status| status.node_info.as_ref())
                                .map(|info| info.operating_system.clone())
                                .unwrap_or_default(),
                            arch: node
                                .status
                                .as_ref()
                                .and_then(|status| status.node_info.as_ref())
                                .map(|info| info.architecture.clone())
                                .unwrap_or_default(),
                        };
                        if tx.send(NodeEvent::Applied { name, facts }).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Event::Delete(node))) => {
                        let Some(name) = node.metadata.name.clone() else {
                            continue;
                        };
                        if tx.send(NodeEvent::Deleted { name }).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Event::Init)) => {}
                    Some(Ok(Event::InitDone)) => {
                        if let Some(tx) = synced_tx.take() {
                            let _ = tx.send(true);
                        }
                    }
                    Some(Err(err)) => warn!(%err, "node informer stream error"),
                    None => break,
                }
            }

            if let Some(tx) = synced_tx.take() {
                let _ = tx.send(false);
            }
        });

        InformerHandle { events: rx, synced: synced_rx }
    }

    async fn open_log_stream(&self, source: &LogSource, opts: &PodLogOptions) -> Result<ByteStream, StreamOpenError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &source.namespace);
        let params = kube::api::LogParams {
            container: Some(source.container_name.clone()),
            follow: opts.follow,
            tail_lines: opts.tail_lines,
            since_time: opts.since_time,
            timestamps: true,
            limit_bytes: opts.limit_bytes,
            ..Default::default()
        };

        match api.log_stream(&source.pod_name, &params).await {
            Ok(stream) => {
                let mapped = stream.map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(to_io_error));
                Ok(Box::pin(mapped))
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(StreamOpenError::NotFound),
            Err(err) => Err(StreamOpenError::Other(err.to_string())),
        }
    }

    async fn peek_log(&self, source: &LogSource) -> Result<ByteStream, StreamOpenError> {
        let opts = PodLogOptions {
            follow: false,
            tail_lines: None,
            since_time: None,
            limit_bytes: Some(100),
        };
        self.open_log_stream(source, &opts).await
    }
}

fn to_io_error(err: kube::Error) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

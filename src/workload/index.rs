//! In-memory graph of workload objects and their ownership edges, plus a pod
//! lookup by owner (spec §4.1).
//!
//! Kept deliberately decoupled from `k8s-openapi`: the [`cluster`](crate::cluster)
//! adapter is responsible for turning real API objects into [`WorkloadObject`]s,
//! rejecting any kind that doesn't map onto [`WorkloadKind`] before it ever
//! reaches the index. That rejection is a configuration bug, not a stream
//! error, per spec §4.1's failure semantics — so the index itself is total
//! over the inputs it accepts.

use std::collections::{HashMap, HashSet};

use crate::path::WorkloadKind;

pub type Uid = String;

/// A single container's status as reported by the pod's container statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    /// Empty until the container has actually started; the watcher treats
    /// an empty ID the same as "container not ready" (spec §4.3 step 2).
    pub container_id: String,
}

/// Pod-specific fields, present only on `WorkloadObject`s of kind `Pod`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub node_name: Option<String>,
    pub containers: Vec<ContainerStatus>,
}

/// A workload object as stored in the index: the latest observed state,
/// keyed by UID.
#[derive(Debug, Clone)]
pub struct WorkloadObject {
    pub uid: Uid,
    pub namespace: String,
    pub kind: WorkloadKind,
    pub name: String,
    pub owner_uids: Vec<Uid>,
    pub pod: Option<PodInfo>,
}

/// The Workload Index: `data`, `byList`, and `ownership` from spec §3,
/// invariant-checked by construction rather than asserted at runtime.
#[derive(Debug, Default)]
pub struct WorkloadIndex {
    data: HashMap<Uid, WorkloadObject>,
    by_list: HashMap<(String, WorkloadKind), HashSet<Uid>>,
    ownership: HashMap<Uid, HashSet<Uid>>,
}

impl WorkloadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a newly observed object. Idempotent by UID: re-adding an
    /// already-known UID behaves like [`Self::update`].
    pub fn add(&mut self, obj: WorkloadObject) {
        if self.data.contains_key(&obj.uid) {
            self.update(obj);
            return;
        }

        self.by_list
            .entry((obj.namespace.clone(), obj.kind))
            .or_default()
            .insert(obj.uid.clone());

        for owner in &obj.owner_uids {
            self.ownership.entry(owner.clone()).or_default().insert(obj.uid.clone());
        }

        self.data.insert(obj.uid.clone(), obj);
    }

    /// Updates the stored object for an already-known UID; `byList` and
    /// `ownership` are untouched, per spec §4.1 (they are fixed by the
    /// object's namespace/kind/OwnerReferences, which do not change across
    /// an `Update`). An `Update` for an unseen UID is treated as an `Add`.
    pub fn update(&mut self, obj: WorkloadObject) {
        match self.data.get_mut(&obj.uid) {
            Some(existing) => *existing = obj,
            None => self.add(obj),
        }
    }

    /// Removes an object. A no-op if the UID is unknown.
    pub fn remove(&mut self, uid: &str) {
        let Some(obj) = self.data.remove(uid) else {
            return;
        };

        if let Some(bucket) = self.by_list.get_mut(&(obj.namespace.clone(), obj.kind)) {
            bucket.remove(uid);
            if bucket.is_empty() {
                self.by_list.remove(&(obj.namespace, obj.kind));
            }
        }

        for owner in &obj.owner_uids {
            if let Some(children) = self.ownership.get_mut(owner) {
                children.remove(uid);
            }
        }

        self.ownership.remove(uid);
    }

    /// Returns the workloads of `kind` in `namespace` matching `name_filter`
    /// (`"*"` for all, otherwise an exact name match).
    pub fn get_workloads(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name_filter: &str,
    ) -> Vec<&WorkloadObject> {
        let Some(uids) = self.by_list.get(&(namespace.to_string(), kind)) else {
            return Vec::new();
        };

        uids.iter()
            .filter_map(|uid| self.data.get(uid))
            .filter(|obj| name_filter == "*" || obj.name == name_filter)
            .collect()
    }

    /// Depth-first descent of `ownership` from `workload_uid`, returning the
    /// pod leaves. Transparently handles multi-hop ownership chains such as
    /// Deployment→ReplicaSet→Pod or CronJob→Job→Pod.
    pub fn get_pods_owned_by_workload(&self, workload_uid: &str) -> Vec<&WorkloadObject> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pods(workload_uid, &mut out, &mut visited);
        out
    }

    fn collect_pods<'a>(
        &'a self,
        uid: &str,
        out: &mut Vec<&'a WorkloadObject>,
        visited: &mut HashSet<Uid>,
    ) {
        if !visited.insert(uid.to_string()) {
            return;
        }
        let Some(children) = self.ownership.get(uid) else {
            return;
        };
        for child_uid in children {
            let Some(child) = self.data.get(child_uid) else {
                continue;
            };
            if child.pod.is_some() {
                out.push(child);
            } else {
                self.collect_pods(child_uid, out, visited);
            }
        }
    }

    /// Looks up a single object by UID, used by the watcher when a path
    /// names a bare Pod directly.
    pub fn get(&self, uid: &str) -> Option<&WorkloadObject> {
        self.data.get(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(uid: &str, ns: &str, kind: WorkloadKind, name: &str, owners: &[&str]) -> WorkloadObject {
        WorkloadObject {
            uid: uid.into(),
            namespace: ns.into(),
            kind,
            name: name.into(),
            owner_uids: owners.iter().map(|o| o.to_string()).collect(),
            pod: None,
        }
    }

    fn pod(uid: &str, ns: &str, name: &str, owners: &[&str], node: Option<&str>) -> WorkloadObject {
        let mut obj = workload(uid, ns, WorkloadKind::Pod, name, owners);
        obj.pod = Some(PodInfo {
            node_name: node.map(String::from),
            containers: vec![ContainerStatus {
                name: "app".into(),
                container_id: "cid-1".into(),
            }],
        });
        obj
    }

    #[test]
    fn add_then_get_workloads_by_namespace_kind() {
        let mut idx = WorkloadIndex::new();
        idx.add(workload("d1", "ns", WorkloadKind::Deployment, "web", &[]));
        idx.add(workload("d2", "ns", WorkloadKind::Deployment, "api", &[]));
        idx.add(workload("d3", "other", WorkloadKind::Deployment, "web", &[]));

        let all = idx.get_workloads("ns", WorkloadKind::Deployment, "*");
        assert_eq!(all.len(), 2);

        let named = idx.get_workloads("ns", WorkloadKind::Deployment, "web");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].uid, "d1");
    }

    #[test]
    fn deployment_replicaset_pod_chain() {
        let mut idx = WorkloadIndex::new();
        idx.add(workload("dep", "ns", WorkloadKind::Deployment, "web", &[]));
        idx.add(workload("rs", "ns", WorkloadKind::ReplicaSet, "web-abc", &["dep"]));
        idx.add(pod("pod1", "ns", "web-abc-xyz", &["rs"], Some("node-1")));

        let pods = idx.get_pods_owned_by_workload("dep");
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].uid, "pod1");
    }

    #[test]
    fn remove_unknown_uid_is_noop() {
        let mut idx = WorkloadIndex::new();
        idx.remove("nonexistent");
    }

    #[test]
    fn remove_clears_list_and_ownership() {
        let mut idx = WorkloadIndex::new();
        idx.add(workload("dep", "ns", WorkloadKind::Deployment, "web", &[]));
        idx.add(pod("pod1", "ns", "web-1", &["dep"], Some("node-1")));

        idx.remove("dep");
        assert!(idx.get_workloads("ns", WorkloadKind::Deployment, "*").is_empty());
        assert!(idx.get_pods_owned_by_workload("dep").is_empty());
    }

    #[test]
    fn update_mutates_data_only() {
        let mut idx = WorkloadIndex::new();
        idx.add(pod("pod1", "ns", "web-1", &[], Some("node-1")));

        let mut updated = pod("pod1", "ns", "web-1", &[], Some("node-2"));
        updated.pod.as_mut().unwrap().node_name = Some("node-2".into());
        idx.update(updated);

        let obj = idx.get("pod1").unwrap();
        assert_eq!(obj.pod.as_ref().unwrap().node_name.as_deref(), Some("node-2"));
    }
}

//! Map from node name to node facts (spec §4, "Node Registry").

use std::collections::HashMap;

use crate::source::NodeMetadata;

/// Facts about a single node as reported by its labels and status info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFacts {
    pub labels: HashMap<String, String>,
    pub os: String,
    pub arch: String,
}

impl NodeFacts {
    fn region(&self) -> String {
        self.labels
            .get("topology.kubernetes.io/region")
            .cloned()
            .unwrap_or_default()
    }

    fn zone(&self) -> String {
        self.labels
            .get("topology.kubernetes.io/zone")
            .cloned()
            .unwrap_or_default()
    }
}

/// `nodeName -> NodeFacts`. Entries live exactly as long as the node is
/// observed by the node informer.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeFacts>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, name: impl Into<String>, facts: NodeFacts) {
        self.nodes.insert(name.into(), facts);
    }

    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    /// Resolves full [`NodeMetadata`] for a source hosted on `node_name`.
    /// Returns `None` if the node is unknown, which the watcher treats as
    /// "this source is not yet resolvable" (spec §3: "a source appears
    /// iff its pod has a node in the Registry").
    pub fn resolve(&self, node_name: &str) -> Option<NodeMetadata> {
        let facts = self.nodes.get(node_name)?;
        Some(NodeMetadata {
            region: facts.region(),
            zone: facts.zone(),
            os: facts.os.clone(),
            arch: facts.arch.clone(),
            node: node_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_node_resolves_to_none() {
        let registry = NodeRegistry::new();
        assert!(registry.resolve("node-1").is_none());
    }

    #[test]
    fn known_node_resolves_metadata() {
        let mut registry = NodeRegistry::new();
        let mut labels = HashMap::new();
        labels.insert("topology.kubernetes.io/region".to_string(), "us-east".to_string());
        labels.insert("topology.kubernetes.io/zone".to_string(), "us-east-1a".to_string());
        registry.upsert(
            "node-1",
            NodeFacts {
                labels,
                os: "linux".into(),
                arch: "amd64".into(),
            },
        );

        let meta = registry.resolve("node-1").unwrap();
        assert_eq!(meta.region, "us-east");
        assert_eq!(meta.zone, "us-east-1a");
        assert_eq!(meta.os, "linux");
        assert_eq!(meta.arch, "amd64");
        assert_eq!(meta.node, "node-1");
    }

    #[test]
    fn removed_node_is_unresolvable() {
        let mut registry = NodeRegistry::new();
        registry.upsert("node-1", NodeFacts::default());
        registry.remove("node-1");
        assert!(registry.resolve("node-1").is_none());
    }
}

//! The data model shared by every component: [`LogRecord`], [`LogSource`],
//! and the node metadata attached to a source at resolution time.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::StreamReadError;

/// Facts about the node hosting a source, resolved at the time the source
/// was added to the watcher's live set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeMetadata {
    pub region: String,
    pub zone: String,
    pub os: String,
    pub arch: String,
    pub node: String,
}

/// A concrete `(namespace, pod, container)` triple, the unit the fetcher
/// operates on. Two sources are equal iff all primary fields are equal;
/// `container_id` only distinguishes restarts for callers that care (it is
/// excluded from `Hash`/`Eq` via the `PartialEq` impl below, matching
/// spec §3: "containerID distinguishes restarts of the same container").
#[derive(Debug, Clone)]
pub struct LogSource {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub container_id: String,
    pub metadata: NodeMetadata,
}

impl PartialEq for LogSource {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.pod_name == other.pod_name
            && self.container_name == other.container_name
    }
}
impl Eq for LogSource {}

impl std::hash::Hash for LogSource {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.pod_name.hash(state);
        self.container_name.hash(state);
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}

/// A single emitted unit on a log channel: either a timestamped message, or
/// (when `err` is set) a terminal sentinel signalling that no further
/// records will follow on this channel.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub source: LogSource,
    pub err: Option<StreamReadError>,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, message: String, source: LogSource) -> Self {
        Self {
            timestamp,
            message,
            source,
            err: None,
        }
    }

    /// Build the terminal sentinel that ends a channel with a retained
    /// error. `source` is kept so the orchestrator can log which source
    /// failed even though the sentinel carries no meaningful message.
    pub fn sentinel(source: LogSource, err: StreamReadError) -> Self {
        Self {
            timestamp: Utc::now(),
            message: String::new(),
            source,
            err: Some(err),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.err.is_some()
    }
}

/// Facet filters applied by the watcher when materializing the source set.
/// Every field is OR-within, AND-across; an empty `Vec` means "any".
#[derive(Debug, Clone, Default)]
pub struct FacetFilters {
    pub regions: Vec<String>,
    pub zones: Vec<String>,
    pub oses: Vec<String>,
    pub arches: Vec<String>,
    pub nodes: Vec<String>,
    pub containers: Vec<String>,
}

impl FacetFilters {
    /// `true` if `meta` passes every non-empty facet, and `container_name`
    /// passes the container facet (if any).
    pub fn matches(&self, meta: &NodeMetadata, container_name: &str) -> bool {
        Self::matches_one(&self.regions, &meta.region)
            && Self::matches_one(&self.zones, &meta.zone)
            && Self::matches_one(&self.oses, &meta.os)
            && Self::matches_one(&self.arches, &meta.arch)
            && Self::matches_one(&self.nodes, &meta.node)
            && Self::matches_one(&self.containers, container_name)
    }

    fn matches_one(filter: &[String], value: &str) -> bool {
        filter.is_empty() || filter.iter().any(|candidate| candidate == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(namespace: &str, pod: &str, container: &str, container_id: &str) -> LogSource {
        LogSource {
            namespace: namespace.into(),
            pod_name: pod.into(),
            container_name: container.into(),
            container_id: container_id.into(),
            metadata: NodeMetadata::default(),
        }
    }

    #[test]
    fn sources_equal_ignoring_container_id() {
        let a = source("ns", "pod", "c1", "id-1");
        let b = source("ns", "pod", "c1", "id-2");
        assert_eq!(a, b);
    }

    #[test]
    fn sources_differ_by_primary_fields() {
        let a = source("ns", "pod", "c1", "id-1");
        let b = source("ns", "pod", "c2", "id-1");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_filters_match_anything() {
        let filters = FacetFilters::default();
        assert!(filters.matches(&NodeMetadata::default(), "c1"));
    }

    #[test]
    fn facet_filter_is_or_within_and_across() {
        let filters = FacetFilters {
            regions: vec!["us-east".into(), "us-west".into()],
            arches: vec!["amd64".into()],
            ..Default::default()
        };
        let meta = NodeMetadata {
            region: "us-west".into(),
            arch: "amd64".into(),
            ..Default::default()
        };
        assert!(filters.matches(&meta, "c1"));

        let wrong_arch = NodeMetadata {
            region: "us-west".into(),
            arch: "arm64".into(),
            ..Default::default()
        };
        assert!(!filters.matches(&wrong_arch, "c1"));
    }
}

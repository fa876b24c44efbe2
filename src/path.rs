//! Parses source path strings like `ns:deployments/web/c1` into a
//! structured [`ParsedSourcePath`]. See spec §4.2 / §6 for the bit-exact
//! grammar.

use crate::error::PathParseError;

/// The workload kinds a source path can name. Represented as a tagged
/// variant with a small alias table rather than an inheritance hierarchy
/// (spec §9 design note on dynamic dispatch over kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    DaemonSet,
    StatefulSet,
    ReplicaSet,
    Job,
    CronJob,
}

impl WorkloadKind {
    /// All kinds paired with the aliases that resolve to them, matched
    /// case-insensitively against a path's `<kind>` segment.
    const ALIASES: &'static [(WorkloadKind, &'static [&'static str])] = &[
        (WorkloadKind::Pod, &["pod", "pods", "po"]),
        (
            WorkloadKind::Deployment,
            &["deployment", "deployments", "deploy"],
        ),
        (WorkloadKind::DaemonSet, &["daemonset", "daemonsets", "ds"]),
        (
            WorkloadKind::StatefulSet,
            &["statefulset", "statefulsets", "sts"],
        ),
        (
            WorkloadKind::ReplicaSet,
            &["replicaset", "replicasets", "rs"],
        ),
        (WorkloadKind::Job, &["job", "jobs"]),
        (WorkloadKind::CronJob, &["cronjob", "cronjobs", "cj"]),
    ];

    /// Looks up a kind by its kubectl-style alias, case-insensitively.
    /// Returns `None` for unrecognized kinds (caller turns this into a
    /// `PathParseError::UnknownKind`).
    pub fn from_alias(alias: &str) -> Option<Self> {
        let lower = alias.to_ascii_lowercase();
        Self::ALIASES
            .iter()
            .find(|(_, aliases)| aliases.contains(&lower.as_str()))
            .map(|(kind, _)| *kind)
    }

    /// The related workload kind whose informer must also be watched so
    /// that `GetPodsOwnedByWorkload` can descend through it (spec §4.3:
    /// ReplicaSets for Deployments, Jobs for CronJobs).
    pub fn prefetch_kind(self) -> Option<WorkloadKind> {
        match self {
            WorkloadKind::Deployment => Some(WorkloadKind::ReplicaSet),
            WorkloadKind::CronJob => Some(WorkloadKind::Job),
            _ => None,
        }
    }
}

/// A parsed source path: `{ namespace, workloadKind, workloadName,
/// containerName }` per spec §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSourcePath {
    pub namespace: String,
    pub workload_kind: WorkloadKind,
    /// `"*"` means "all of that kind in the namespace".
    pub workload_name: String,
    /// Empty means "first container in each resolved pod"; `"*"` means
    /// "all containers".
    pub container_name: String,
}

/// Parses a source path against a configured default namespace and,
/// optionally, an allow-list of namespaces (spec §9 Open Question (b) —
/// resolved here as: a namespace outside the allow-list is a
/// `PathParseError`, not a silent empty match).
pub fn parse(
    raw: &str,
    default_namespace: &str,
    allowed_namespaces: Option<&[String]>,
) -> Result<ParsedSourcePath, PathParseError> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(PathParseError::Empty);
    }

    let (namespace, tail) = match trimmed.split_once(':') {
        Some((ns, rest)) => (ns.to_string(), rest),
        None => (default_namespace.to_string(), trimmed),
    };

    if let Some(allowed) = allowed_namespaces {
        if !allowed.iter().any(|n| n == &namespace) {
            return Err(PathParseError::NamespaceNotAllowed { namespace });
        }
    }

    let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();

    // A two-segment tail is ambiguous between `<name>/<container>` (pod
    // form) and `<kind>/<name>` (workload form); we disambiguate by
    // whether the first segment resolves to a known kind alias, per
    // SPEC_FULL.md §A.3.
    let (workload_kind, workload_name, container_name) = match segments.as_slice() {
        [name] => (WorkloadKind::Pod, (*name).to_string(), String::new()),
        [first, second] => match WorkloadKind::from_alias(first) {
            Some(kind) => (kind, (*second).to_string(), String::new()),
            None => (WorkloadKind::Pod, (*first).to_string(), (*second).to_string()),
        },
        [kind, name, container] => {
            let kind = WorkloadKind::from_alias(kind).ok_or_else(|| PathParseError::UnknownKind {
                path: raw.to_string(),
                kind: (*kind).to_string(),
            })?;
            (kind, (*name).to_string(), (*container).to_string())
        }
        _ => {
            return Err(PathParseError::UnknownKind {
                path: raw.to_string(),
                kind: tail.to_string(),
            })
        }
    };

    Ok(ParsedSourcePath {
        namespace,
        workload_kind,
        workload_name,
        container_name,
    })
}

//! The error taxonomy for the log stream engine.
//!
//! Each variant corresponds to one of the error kinds in the design's
//! propagation policy table: structural errors (parse, config, sync, stream
//! open) are returned synchronously to a caller; `StreamReadError` is instead
//! carried as a terminal sentinel and surfaced later via `Orchestrator::err`.

use thiserror::Error;

/// A source path was well-formed but named an unrecognized workload kind, or
/// named a namespace outside the configured allow-list.
#[derive(Debug, Error)]
pub enum PathParseError {
    #[error("unknown workload kind {kind:?} in path {path:?}")]
    UnknownKind { path: String, kind: String },

    #[error("empty source path")]
    Empty,

    #[error("namespace {namespace:?} is not in the allowed namespace list")]
    NamespaceNotAllowed { namespace: String },
}

/// An invalid combination of `Orchestrator` options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("follow is not supported with mode=head")]
    FollowWithHead,

    #[error("invalid grep pattern: {0}")]
    InvalidGrepPattern(String),
}

/// One or more informers failed their initial cache sync.
#[derive(Debug, Error)]
#[error("{failures} informer(s) failed to sync, first error: {first}")]
pub struct SyncError {
    pub failures: usize,
    pub first: String,
}

/// An error returned while opening a forward or backward log stream.
#[derive(Debug, Error)]
pub enum StreamOpenError {
    #[error("the requested pod was not found")]
    NotFound,

    #[error("failed to open log stream: {0}")]
    Other(String),
}

/// An error that occurred while reading an already-open log stream. Carried
/// as a terminal sentinel on the record channel rather than returned.
#[derive(Debug, Error, Clone)]
pub enum StreamReadError {
    #[error("i/o error reading log stream: {0}")]
    Io(String),

    #[error("log line exceeded the maximum scanner buffer size")]
    LineTooLong,

    #[error("cluster API error: {0}")]
    Cluster(String),
}

/// A top-level error surfaced by the engine. `Cancelled` is never returned to
/// callers; it exists so internal plumbing can model shutdown uniformly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Path(#[from] PathParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    StreamOpen(#[from] StreamOpenError),

    #[error(transparent)]
    StreamRead(#[from] StreamReadError),

    #[error("cancelled")]
    Cancelled,
}

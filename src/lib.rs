// lib.rs

//! A Kubernetes container log stream engine: resolves abstract source
//! paths and facet filters into a live set of containers, pulls log
//! records from each, and emits them in a single time-ordered channel,
//! optionally following the tail indefinitely.

#![warn(
    explicit_outlives_requirements,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_crate_level_docs,
    missing_docs,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_lifetimes,
    variant_size_differences,
    clippy::cargo,
    clippy::pedantic
)]

pub mod cluster;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod orchestrator;
pub mod path;
pub mod source;
pub mod watcher;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use error::EngineError;
pub use orchestrator::{Config, Mode, Orchestrator};
pub use source::{LogRecord, LogSource};

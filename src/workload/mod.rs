//! The Workload Index and Node Registry (spec §4.1, §3).

pub mod index;
pub mod registry;

pub use index::{ContainerStatus, PodInfo, Uid, WorkloadIndex, WorkloadObject};
pub use registry::{NodeFacts, NodeRegistry};

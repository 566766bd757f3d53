//! Shared building blocks for the hg5k tools
//!
//! - [`cluster`] - Cluster handle model (hosts, version, lifecycle flags, jobs)
//! - [`registry`] - Durable identity registry of cluster handles
//! - [`hosts`] - Host list parsing and rack derivation
//! - [`conf`] - Hadoop XML and props configuration file helpers
//! - [`error`] - Error taxonomy and exit codes

pub mod cluster;
pub mod conf;
pub mod error;
pub mod hosts;
pub mod registry;

pub use cluster::{
    ClusterHandle, ClusterSettings, ClusterType, CommandOutput, Generation, Job, Service, Version,
};
pub use error::{Error, Result};
pub use registry::{Link, Registry};

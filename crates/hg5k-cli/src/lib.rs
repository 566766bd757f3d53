//! hg5k CLI library
//!
//! Shared by the `hg5k` and `hive_g5k` binaries:
//!
//! - [`commands`] - Flag definitions and cluster kinds of each tool
//! - [`pipeline`] - Fixed-order execution of the requested actions
//! - [`runtime`] - Hadoop and Hive operations on live clusters
//! - [`ingest`] - Parallel transfers into and out of HDFS
//! - [`report`] - `--state` views
//! - [`remote`] - SSH command execution and file copies
//! - [`config`] - State directory, properties file and SSH settings

pub mod commands;
pub mod config;
pub mod ingest;
pub mod pipeline;
pub mod remote;
pub mod report;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use hg5k_common::{Error, Result};

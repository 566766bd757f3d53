//! `hg5k` - drive Hadoop clusters
//!
//! ```bash
//! # Create a cluster on three nodes, install and start it
//! hg5k --create node-1,node-2,node-3 --bootstrap hadoop-2.6.0.tar.gz --initialize --start
//!
//! # Load data and run a job on the last used cluster
//! hg5k --putindfs part-*.csv /data --jarjob wc.jar wordcount /data /out
//!
//! # Tear it down
//! hg5k --delete
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::warn;

use hg5k_common::hosts::parse_hosts;
use hg5k_common::{ClusterHandle, ClusterSettings, ClusterType, Error, Link, Registry, Result, Version};

use super::ActionArgs;
use crate::config::Properties;
use crate::pipeline::{ClusterKind, Outcome};
use crate::remote::RemoteExecutor;
use crate::runtime::{ClusterRuntime, HadoopCluster};

/// hg5k - Hadoop clusters on Grid'5000
#[derive(Parser, Debug)]
#[command(name = "hg5k", version, about, long_about = None)]
pub struct HadoopCli {
    /// Create a cluster on HOSTS: a file with one host per line, a
    /// comma-separated list, or a single host name
    #[arg(long, value_name = "HOSTS")]
    pub create: Option<String>,

    /// Hadoop version of a new cluster (detected again by --bootstrap)
    #[arg(long = "hadoop_version", value_name = "VERSION", default_value = "2.6")]
    pub hadoop_version: Version,

    #[command(flatten)]
    pub actions: ActionArgs,
}

impl HadoopCli {
    pub async fn run(self) -> Result<Outcome> {
        let state_dir = self.actions.state_dir.clone();
        let kind = HadoopKind {
            hosts: self.create.clone(),
            version: self.hadoop_version,
        };
        let actions = self.actions.into_actions(self.create.is_some())?;
        super::run(&kind, actions, state_dir.as_deref()).await
    }
}

/// Base Hadoop clusters, created from a host list.
#[derive(Debug, Clone)]
pub struct HadoopKind {
    pub hosts: Option<String>,
    pub version: Version,
}

impl ClusterKind for HadoopKind {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Hadoop
    }

    fn create(
        &self,
        id: u32,
        _registry: &Registry,
        properties: Option<Properties>,
    ) -> Result<(ClusterHandle, Option<Link>)> {
        let spec = self
            .hosts
            .as_deref()
            .ok_or_else(|| Error::usage("--create needs a host list"))?;
        let hosts = parse_hosts(spec)?;

        let mut settings = ClusterSettings::default();
        if let Some(properties) = properties {
            settings = properties.apply(settings);
        }
        if settings.replication as usize > hosts.len() {
            warn!(
                replication = settings.replication,
                hosts = hosts.len(),
                "Replication exceeds the number of hosts"
            );
        }

        let handle = ClusterHandle::new(ClusterType::Hadoop, id, hosts, self.version, settings)?;
        Ok((handle, None))
    }

    fn runtime(
        &self,
        handle: ClusterHandle,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Box<dyn ClusterRuntime> {
        Box::new(HadoopCluster::new(handle, remote))
    }
}

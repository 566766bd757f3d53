//! `hive_g5k` - drive Hive on top of an hg5k Hadoop cluster
//!
//! A Hive cluster is created from an existing Hadoop cluster and runs on its
//! master. The Hadoop cluster must be started for Hive to be initialized.

use std::sync::Arc;

use clap::Parser;
use tracing::warn;

use hg5k_common::{
    ClusterHandle, ClusterSettings, ClusterType, Error, Link, Registry, Result, Version,
};

use super::ActionArgs;
use crate::config::Properties;
use crate::pipeline::{ClusterKind, Outcome};
use crate::remote::RemoteExecutor;
use crate::runtime::{ClusterRuntime, HiveCluster};

/// hive_g5k - Hive on hg5k Hadoop clusters
#[derive(Parser, Debug)]
#[command(name = "hive_g5k", version, about, long_about = None)]
pub struct HiveCli {
    /// Create a Hive cluster on a Hadoop cluster
    #[arg(long)]
    pub create: bool,

    /// Hadoop cluster to build on (default: the last used Hadoop cluster)
    #[arg(long = "hadoop_id", value_name = "ID")]
    pub hadoop_id: Option<u32>,

    /// Hive version of a new cluster (detected again by --bootstrap)
    #[arg(long = "hive_version", value_name = "VERSION", default_value = "1.2")]
    pub hive_version: Version,

    #[command(flatten)]
    pub actions: ActionArgs,
}

impl HiveCli {
    pub async fn run(self) -> Result<Outcome> {
        if self.hadoop_id.is_some() && !self.create {
            warn!("--hadoop_id is only used with --create, ignoring it");
        }
        let state_dir = self.actions.state_dir.clone();
        let kind = HiveKind {
            hadoop_id: self.hadoop_id,
            version: self.hive_version,
        };
        let actions = self.actions.into_actions(self.create)?;
        super::run(&kind, actions, state_dir.as_deref()).await
    }
}

/// Hive clusters, linked to the Hadoop cluster they were created from.
#[derive(Debug, Clone)]
pub struct HiveKind {
    pub hadoop_id: Option<u32>,
    pub version: Version,
}

impl ClusterKind for HiveKind {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Hive
    }

    fn create(
        &self,
        id: u32,
        registry: &Registry,
        properties: Option<Properties>,
    ) -> Result<(ClusterHandle, Option<Link>)> {
        let hadoop_id = match self.hadoop_id {
            Some(hadoop_id) => hadoop_id,
            None => registry
                .default_id(ClusterType::Hadoop)?
                .ok_or(Error::NoDefaultCluster {
                    cluster_type: ClusterType::Hadoop,
                })?,
        };
        let hadoop = registry.deserialize(ClusterType::Hadoop, hadoop_id)?;

        let mut settings = ClusterSettings::hive_defaults();
        if let Some(properties) = properties {
            settings = properties.apply(settings);
        }
        settings.hadoop_home = Some(hadoop.settings.base_dir.clone());
        settings.hadoop_conf_dir = Some(hadoop.settings.conf_dir.clone());
        settings.hadoop_version = Some(hadoop.version);

        let mut handle = ClusterHandle::new(
            ClusterType::Hive,
            id,
            hadoop.hosts.clone(),
            self.version,
            settings,
        )?;
        handle.master = hadoop.master.clone();
        handle.topology = hadoop.topology.clone();

        let link = Link {
            cluster_type: ClusterType::Hadoop,
            id: hadoop_id,
        };
        Ok((handle, Some(link)))
    }

    fn runtime(
        &self,
        handle: ClusterHandle,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Box<dyn ClusterRuntime> {
        Box::new(HiveCluster::new(handle, remote))
    }
}

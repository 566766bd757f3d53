//! Cluster handle model
//!
//! A [`ClusterHandle`] is the durable description of one deployed cluster:
//! its hosts, master, version, lifecycle flags and rack topology. Handles are
//! pure data; the live operations on them are provided by the CLI's runtime
//! layer, and persistence by the [`Registry`](crate::registry::Registry).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hosts;
use crate::{Error, Result};

/// Kind of cluster a handle describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Base Hadoop cluster (HDFS + MapReduce/YARN)
    Hadoop,
    /// Hive service layered on a Hadoop cluster
    Hive,
}

impl ClusterType {
    /// Name used for display and for the registry's directory layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Hadoop => "hadoop",
            ClusterType::Hive => "hive",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic `major.minor` version of the deployed software.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Generation this version belongs to.
    pub fn generation(&self) -> Generation {
        if self.major < 2 {
            Generation::Legacy
        } else {
            Generation::Modern
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(2, 6)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Accepts `2`, `2.6` and `2.6.0`; anything after the minor is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::usage(format!("invalid version '{}', expected e.g. 2.6", s));
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

/// Hadoop generation, selecting which compute service and scripts apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    /// 0.x and 1.x: JobTracker based MapReduce
    Legacy,
    /// 2.x and later: YARN resource manager
    Modern,
}

/// Services whose running state is tracked on a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Distributed filesystem (HDFS)
    Filesystem,
    /// Legacy MapReduce compute engine
    ComputeEngine,
    /// YARN resource manager
    ResourceManager,
    /// Hive metastore and HiveServer2
    HiveServer,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Service::Filesystem => "hdfs",
            Service::ComputeEngine => "mapreduce",
            Service::ResourceManager => "yarn",
            Service::HiveServer => "hiveserver",
        };
        f.write_str(label)
    }
}

/// Deployment layout and tuning knobs, read from the `--properties` file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Install directory of the software on every host.
    pub base_dir: PathBuf,
    /// Configuration directory on every host.
    pub conf_dir: PathBuf,
    /// Log directory on every host.
    pub logs_dir: PathBuf,
    /// Data/temp directory on every host.
    pub temp_dir: PathBuf,
    /// Filesystem (namenode) RPC port.
    pub fs_port: u16,
    /// JobTracker port on legacy clusters.
    pub compute_port: u16,
    /// HDFS block replication.
    pub replication: u32,
    /// Hadoop install directory, used by layered services.
    pub hadoop_home: Option<PathBuf>,
    /// Hadoop configuration directory, used by layered services.
    pub hadoop_conf_dir: Option<PathBuf>,
    /// Version of the Hadoop cluster a layered service runs on.
    pub hadoop_version: Option<Version>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp/hadoop"),
            conf_dir: PathBuf::from("/tmp/hadoop/conf"),
            logs_dir: PathBuf::from("/tmp/hadoop/logs"),
            temp_dir: PathBuf::from("/tmp/hadoop/temp"),
            fs_port: 54310,
            compute_port: 54311,
            replication: 3,
            hadoop_home: None,
            hadoop_conf_dir: None,
            hadoop_version: None,
        }
    }
}

impl ClusterSettings {
    /// Default layout for a Hive install.
    pub fn hive_defaults() -> Self {
        Self {
            base_dir: PathBuf::from("/tmp/hive"),
            conf_dir: PathBuf::from("/tmp/hive/conf"),
            logs_dir: PathBuf::from("/tmp/hive/logs"),
            temp_dir: PathBuf::from("/tmp/hive/temp"),
            ..Self::default()
        }
    }
}

/// One deployed cluster instance and its live state flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    pub cluster_type: ClusterType,
    pub id: u32,
    /// Ordered, duplicate-free host list.
    pub hosts: Vec<String>,
    pub master: String,
    pub version: Version,
    pub initialized: bool,
    pub running: BTreeSet<Service>,
    /// Host to rack mapping.
    pub topology: BTreeMap<String, String>,
    pub settings: ClusterSettings,
    pub created_at: DateTime<Utc>,
}

impl ClusterHandle {
    /// Build a fresh handle; the first host becomes the master.
    pub fn new(
        cluster_type: ClusterType,
        id: u32,
        hosts: Vec<String>,
        version: Version,
        settings: ClusterSettings,
    ) -> Result<Self> {
        let master = hosts
            .first()
            .cloned()
            .ok_or_else(|| Error::usage("a cluster needs at least one host"))?;
        let topology = hosts
            .iter()
            .map(|h| (h.clone(), hosts::rack_of(h)))
            .collect();

        Ok(Self {
            cluster_type,
            id,
            hosts,
            master,
            version,
            initialized: false,
            running: BTreeSet::new(),
            topology,
            settings,
            created_at: Utc::now(),
        })
    }

    pub fn generation(&self) -> Generation {
        self.version.generation()
    }

    /// Services tracked for this handle, in display order.
    pub fn services(&self) -> &'static [Service] {
        match (self.cluster_type, self.generation()) {
            (ClusterType::Hive, _) => &[Service::HiveServer],
            (ClusterType::Hadoop, Generation::Legacy) => {
                &[Service::Filesystem, Service::ComputeEngine]
            }
            (ClusterType::Hadoop, Generation::Modern) => {
                &[Service::Filesystem, Service::ResourceManager]
            }
        }
    }

    pub fn is_running(&self, service: Service) -> bool {
        self.running.contains(&service)
    }

    /// Whether any tracked service is running.
    pub fn any_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Record a service as running or stopped.
    ///
    /// A service can only run on an initialized cluster.
    pub fn set_running(&mut self, service: Service, running: bool) -> Result<()> {
        if running {
            if !self.initialized {
                return Err(Error::usage(format!(
                    "{} cluster {} is not initialized, cannot start {}",
                    self.cluster_type, self.id, service
                )));
            }
            self.running.insert(service);
        } else {
            self.running.remove(&service);
        }
        Ok(())
    }

    /// Set the initialization flag; leaving the initialized state stops everything.
    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
        if !initialized {
            self.running.clear();
        }
    }

    /// Check the structural invariants of a handle read back from storage.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::config(format!(
                "{} cluster {} has no hosts",
                self.cluster_type, self.id
            )));
        }
        if !self.hosts.contains(&self.master) {
            return Err(Error::config(format!(
                "master {} of {} cluster {} is not one of its hosts",
                self.master, self.cluster_type, self.id
            )));
        }
        if !self.initialized && self.any_running() {
            return Err(Error::config(format!(
                "{} cluster {} has running services but is not initialized",
                self.cluster_type, self.id
            )));
        }
        Ok(())
    }
}

/// A unit of remote work submitted to the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Job {
    /// Local path of the job jar.
    pub local_path: PathBuf,
    pub params: Vec<String>,
    pub lib_jars: Vec<PathBuf>,
    /// Id assigned by the cluster once submitted.
    pub job_id: Option<String>,
    pub success: bool,
}

impl Job {
    pub fn new(local_path: impl Into<PathBuf>, params: Vec<String>) -> Self {
        Self {
            local_path: local_path.into(),
            params,
            ..Default::default()
        }
    }

    pub fn with_lib_jars(mut self, lib_jars: Vec<PathBuf>) -> Self {
        self.lib_jars = lib_jars;
        self
    }
}

/// Captured result of a command run on a host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// Turn an unsuccessful output into a command failure naming `what`.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::command_failed(format!(
                "{}: {}",
                what,
                self.stderr.trim()
            )))
        }
    }
}

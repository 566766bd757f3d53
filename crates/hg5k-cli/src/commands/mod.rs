//! Command-line surface shared by `hg5k` and `hive_g5k`
//!
//! Both tools take the same action flags ([`ActionArgs`]); they differ in how
//! a cluster is created, which lives in [`hadoop`] and [`hive`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;

use hg5k_common::{Error, Registry, Result};

use crate::config::{self, SshConfig};
use crate::pipeline::{
    Actions, ClusterKind, ConfChange, Fetch, HistoryCopy, Ingestion, JarJob, Outcome, Pipeline,
    StartMode, Tuning,
};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::report::StateView;

pub mod hadoop;
pub mod hive;

/// Action flags. Any combination may be given; they always run in the same order.
#[derive(Args, Debug, Clone, Default)]
pub struct ActionArgs {
    /// Cluster id to act on (default: the last one created or saved)
    #[arg(long)]
    pub id: Option<u32>,

    /// Remove the cluster, cleaning it first if needed
    #[arg(long)]
    pub delete: bool,

    /// YAML file with install directories, ports and replication (with --create)
    #[arg(long, value_name = "FILE")]
    pub properties: Option<PathBuf>,

    /// Install the distribution from a local .tar.gz archive
    #[arg(long, value_name = "ARCHIVE")]
    pub bootstrap: Option<PathBuf>,

    /// Write the configuration and format the filesystem
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "default", value_name = "TUNING")]
    pub initialize: Option<Tuning>,

    /// Set configuration parameters, optionally in a given file
    #[arg(long, num_args = 1.., value_name = "[FILE] NAME=VALUE")]
    pub changeconf: Option<Vec<String>>,

    /// Print the value of configuration parameters
    #[arg(long, num_args = 1.., value_name = "NAME")]
    pub getconf: Option<Vec<String>>,

    /// Start all services
    #[arg(long, conflicts_with_all = ["start_hdfs", "start_mr", "start_yarn"])]
    pub start: bool,

    /// Start only the distributed filesystem
    #[arg(long = "start_hdfs", conflicts_with_all = ["start_mr", "start_yarn"])]
    pub start_hdfs: bool,

    /// Start only MapReduce (clusters before 2.x)
    #[arg(long = "start_mr", conflicts_with = "start_yarn")]
    pub start_mr: bool,

    /// Start only YARN (2.x clusters)
    #[arg(long = "start_yarn")]
    pub start_yarn: bool,

    /// Copy local files into a filesystem directory
    #[arg(long, num_args = 2.., value_name = "PATH")]
    pub putindfs: Option<Vec<String>>,

    /// Copy a filesystem path to a local path
    #[arg(long, num_args = 2, value_names = ["DFS_PATH", "LOCAL_PATH"])]
    pub getfromdfs: Option<Vec<String>>,

    /// Run a command through the cluster's command-line client
    #[arg(long, allow_hyphen_values = true, value_name = "COMMAND")]
    pub execute: Option<String>,

    /// Open an interactive shell on --node or the master
    #[arg(long)]
    pub shell: bool,

    /// Run a jar job with its parameters (takes every following value, put it last)
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "JAR PARAM")]
    pub jarjob: Option<Vec<String>>,

    /// Copy job history files (optionally only some job ids) to a local directory
    #[arg(long, num_args = 1.., value_name = "PATH [JOB_ID]")]
    pub copyhistory: Option<Vec<String>>,

    /// Stop all services
    #[arg(long)]
    pub stop: bool,

    /// Stop services and remove everything installed on the hosts
    #[arg(long)]
    pub clean: bool,

    /// Print a report on the cluster
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "general", value_name = "VIEW")]
    pub state: Option<StateView>,

    /// Host for --execute, --jarjob and --shell (default: the master)
    #[arg(long, value_name = "NODE")]
    pub node: Option<String>,

    /// Extra jars shipped with --jarjob
    #[arg(long, num_args = 1.., value_name = "LIB")]
    pub libjars: Option<Vec<PathBuf>>,

    /// Show command output and debug logs
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory holding cluster records (default: $HG5K_STATE_DIR or ~/.hg5k)
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

impl ActionArgs {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// Turn the flags into the pipeline's action set.
    pub fn into_actions(self, create: bool) -> Result<Actions> {
        let start = if self.start {
            Some(StartMode::All)
        } else if self.start_hdfs {
            Some(StartMode::Filesystem)
        } else if self.start_mr {
            Some(StartMode::ComputeEngine)
        } else if self.start_yarn {
            Some(StartMode::ResourceManager)
        } else {
            None
        };

        let put_in_dfs = self
            .putindfs
            .map(|mut paths| -> Result<Ingestion> {
                let dest = paths
                    .pop()
                    .ok_or_else(|| Error::usage("--putindfs needs local paths and a destination"))?;
                if paths.is_empty() {
                    return Err(Error::usage("--putindfs needs at least one local path"));
                }
                Ok(Ingestion {
                    files: paths.into_iter().map(PathBuf::from).collect(),
                    dest,
                })
            })
            .transpose()?;

        let get_from_dfs = self
            .getfromdfs
            .map(|paths| match <[String; 2]>::try_from(paths) {
                Ok([source, dest]) => Ok(Fetch {
                    source,
                    dest: PathBuf::from(dest),
                }),
                Err(_) => Err(Error::usage("--getfromdfs needs DFS_PATH and LOCAL_PATH")),
            })
            .transpose()?;

        let jar_job = self.jarjob.and_then(|mut args| {
            if args.is_empty() {
                return None;
            }
            let jar = PathBuf::from(args.remove(0));
            Some(JarJob { jar, params: args })
        });

        let copy_history = self.copyhistory.and_then(|mut args| {
            if args.is_empty() {
                return None;
            }
            let dest = PathBuf::from(args.remove(0));
            Some(HistoryCopy {
                dest,
                job_ids: args,
            })
        });

        Ok(Actions {
            id: self.id,
            create,
            delete: self.delete,
            properties: self.properties,
            bootstrap: self.bootstrap,
            initialize: self.initialize,
            change_conf: self.changeconf.map(parse_conf_change).transpose()?,
            get_conf: self.getconf.unwrap_or_default(),
            start,
            put_in_dfs,
            get_from_dfs,
            execute: self.execute,
            shell: self.shell,
            jar_job,
            lib_jars: self.libjars.unwrap_or_default(),
            copy_history,
            stop: self.stop,
            clean: self.clean,
            state: self.state,
            node: self.node,
            verbose: self.verbose,
        })
    }
}

/// Split `--changeconf` values into an optional file and `NAME=VALUE` pairs.
pub fn parse_conf_change(values: Vec<String>) -> Result<ConfChange> {
    let mut values = values.into_iter().peekable();
    let file = values.next_if(|v| !v.contains('='));

    let mut params = BTreeMap::new();
    for value in values {
        let (name, val) = value
            .split_once('=')
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| {
                Error::usage(format!("--changeconf expects NAME=VALUE, got '{}'", value))
            })?;
        params.insert(name.to_string(), val.to_string());
    }
    if params.is_empty() {
        return Err(Error::usage("--changeconf needs at least one NAME=VALUE"));
    }
    Ok(ConfChange { file, params })
}

/// Open the registry and run the pipeline over SSH, printing to stdout.
pub async fn run(
    kind: &dyn ClusterKind,
    actions: Actions,
    state_dir: Option<&Path>,
) -> Result<Outcome> {
    let registry = Registry::open(config::state_dir(state_dir)?)?;
    let remote: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(SshConfig::from_env()?));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    Pipeline::new(&registry, remote, &mut out)
        .run(kind, actions)
        .await
}

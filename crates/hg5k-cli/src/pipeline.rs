//! Fixed-order action pipeline
//!
//! The operator may combine any set of actions in one invocation. They are
//! gathered into [`Actions`] and always run in the same order: bootstrap,
//! initialize, changeconf, start, putindfs, getfromdfs, execute, shell,
//! jarjob, copyhistory, stop, clean, then getconf and state. The handle is
//! written back to the registry only if a mutating action ran.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use tracing::{debug, info, warn};

use hg5k_common::{ClusterHandle, ClusterType, Error, Job, Link, Registry, Result};

use crate::config::{self, Properties};
use crate::ingest;
use crate::remote::RemoteExecutor;
use crate::report::{self, StateView};
use crate::runtime::{Capability, ClusterRuntime};

/// Resource tuning applied by `--initialize`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Tuning {
    /// Keep the distribution's defaults
    #[default]
    Default,
    /// Size slots and memory to the master's hardware
    Tuned,
}

/// Which services a start request brings up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartMode {
    All,
    Filesystem,
    ComputeEngine,
    ResourceManager,
}

impl StartMode {
    fn capability(self) -> Option<Capability> {
        match self {
            StartMode::All => None,
            StartMode::Filesystem => Some(Capability::StartFilesystem),
            StartMode::ComputeEngine => Some(Capability::StartComputeEngine),
            StartMode::ResourceManager => Some(Capability::StartResourceManager),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfChange {
    /// Target file; without it each parameter goes to the file owning it.
    pub file: Option<String>,
    pub params: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingestion {
    pub files: Vec<PathBuf>,
    pub dest: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetch {
    pub source: String,
    pub dest: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JarJob {
    pub jar: PathBuf,
    pub params: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryCopy {
    pub dest: PathBuf,
    pub job_ids: Vec<String>,
}

/// Everything requested in one invocation, independent of flag order.
#[derive(Clone, Debug, Default)]
pub struct Actions {
    pub id: Option<u32>,
    pub create: bool,
    pub delete: bool,
    pub properties: Option<PathBuf>,
    pub bootstrap: Option<PathBuf>,
    pub initialize: Option<Tuning>,
    pub change_conf: Option<ConfChange>,
    pub get_conf: Vec<String>,
    pub start: Option<StartMode>,
    pub put_in_dfs: Option<Ingestion>,
    pub get_from_dfs: Option<Fetch>,
    pub execute: Option<String>,
    pub shell: bool,
    pub jar_job: Option<JarJob>,
    pub lib_jars: Vec<PathBuf>,
    pub copy_history: Option<HistoryCopy>,
    pub stop: bool,
    pub clean: bool,
    pub state: Option<StateView>,
    pub node: Option<String>,
    pub verbose: bool,
}

/// One cluster type as seen by the pipeline.
pub trait ClusterKind {
    fn cluster_type(&self) -> ClusterType;

    /// Build a fresh handle for `id`, and the parent it must be linked to.
    fn create(
        &self,
        id: u32,
        registry: &Registry,
        properties: Option<Properties>,
    ) -> Result<(ClusterHandle, Option<Link>)>;

    /// Wrap a handle in its runtime.
    fn runtime(
        &self,
        handle: ClusterHandle,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Box<dyn ClusterRuntime>;
}

/// How an invocation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The handle was removed; nothing else ran.
    Deleted { id: u32 },
    /// All actions ran; `persisted` tells whether the handle was written.
    Completed { id: u32, persisted: bool },
}

pub struct Pipeline<'a> {
    registry: &'a Registry,
    remote: Arc<dyn RemoteExecutor>,
    out: &'a mut dyn Write,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        registry: &'a Registry,
        remote: Arc<dyn RemoteExecutor>,
        out: &'a mut dyn Write,
    ) -> Self {
        Self {
            registry,
            remote,
            out,
        }
    }

    /// Run every requested action against the resolved cluster.
    pub async fn run(&mut self, kind: &dyn ClusterKind, mut actions: Actions) -> Result<Outcome> {
        let cluster_type = kind.cluster_type();
        drop_ignored_flags(&mut actions);

        if actions.create && actions.delete {
            return Err(Error::usage("--create and --delete cannot be combined"));
        }

        let id = self.resolve_id(cluster_type, &actions)?;
        let (handle, link) = if actions.create {
            if self.registry.exists(cluster_type, id) {
                return Err(Error::Conflict { cluster_type, id });
            }
            let properties = actions
                .properties
                .as_deref()
                .map(config::load_properties)
                .transpose()?;
            let (handle, link) = kind.create(id, self.registry, properties)?;
            info!(cluster_type = %cluster_type, id, hosts = handle.hosts.len(), "Created cluster");
            (handle, link)
        } else {
            let handle = self.registry.deserialize(cluster_type, id)?;
            debug!(cluster_type = %cluster_type, id, "Loaded cluster");
            (handle, None)
        };

        let mut runtime = kind.runtime(handle, self.remote.clone());

        if actions.delete {
            if runtime.handle().initialized {
                info!(cluster_type = %cluster_type, id, "Cleaning cluster before removal");
                runtime.clean().await?;
            }
            self.registry.remove(cluster_type, id)?;
            info!(cluster_type = %cluster_type, id, "Deleted cluster");
            return Ok(Outcome::Deleted { id });
        }

        validate(runtime.as_ref(), &actions)?;

        let mut changed = actions.create;
        changed |= self.apply(runtime.as_mut(), &actions).await?;

        if changed {
            if let Some(parent) = link {
                self.registry
                    .link(cluster_type, id, parent.cluster_type, parent.id)?;
            }
            self.registry.serialize(cluster_type, id, runtime.handle())?;
            debug!(cluster_type = %cluster_type, id, "Saved cluster");
        }
        Ok(Outcome::Completed {
            id,
            persisted: changed,
        })
    }

    fn resolve_id(&self, cluster_type: ClusterType, actions: &Actions) -> Result<u32> {
        if let Some(id) = actions.id {
            return Ok(id);
        }
        if actions.create {
            return self.registry.generate_new_id(cluster_type);
        }
        self.registry
            .default_id(cluster_type)?
            .ok_or(Error::NoDefaultCluster { cluster_type })
    }

    /// Run the actions in their fixed order. Returns whether the handle changed.
    async fn apply(&mut self, runtime: &mut dyn ClusterRuntime, actions: &Actions) -> Result<bool> {
        let mut changed = false;
        let node = actions.node.as_deref();
        let verbose = actions.verbose;

        if let Some(archive) = &actions.bootstrap {
            runtime.bootstrap(archive).await?;
            changed = true;
        }

        if let Some(tuning) = actions.initialize {
            runtime.initialize(tuning == Tuning::Default).await?;
            changed = true;
        }

        if let Some(change) = &actions.change_conf {
            runtime
                .change_conf(&change.params, change.file.as_deref())
                .await?;
            changed = true;
        }

        if let Some(mode) = actions.start {
            match mode {
                StartMode::All => runtime.start().await?,
                StartMode::Filesystem => runtime.start_filesystem().await?,
                StartMode::ComputeEngine => runtime.start_compute_engine().await?,
                StartMode::ResourceManager => runtime.start_resource_manager().await?,
            }
            changed = true;
        }

        if let Some(ingestion) = &actions.put_in_dfs {
            ingest::put_in_dfs(
                &*runtime,
                self.remote.as_ref(),
                &ingestion.files,
                &ingestion.dest,
                verbose,
            )
            .await?;
            changed = true;
        }

        if let Some(fetch) = &actions.get_from_dfs {
            ingest::fetch_from_dfs(
                &*runtime,
                self.remote.as_ref(),
                &fetch.source,
                &fetch.dest,
                verbose,
            )
            .await?;
        }

        if let Some(command) = &actions.execute {
            let output = runtime.execute(command, node, verbose).await?;
            write!(self.out, "{}", output.stdout)?;
            if verbose || !output.success {
                write!(self.out, "{}", output.stderr)?;
            }
            changed = true;
            output.check(command)?;
        }

        if actions.shell {
            let host = node.unwrap_or(&runtime.handle().master).to_string();
            self.remote.shell(&host).await?;
        }

        if let Some(request) = &actions.jar_job {
            let mut job = Job::new(&request.jar, request.params.clone())
                .with_lib_jars(actions.lib_jars.clone());
            runtime.execute_job(&mut job, node, verbose).await?;
            changed = true;

            let job_id = job.job_id.as_deref().unwrap_or("(unknown id)");
            if job.success {
                writeln!(self.out, "Job {} succeeded", job_id)?;
            } else {
                writeln!(self.out, "Job {} failed", job_id)?;
                return Err(Error::command_failed(format!(
                    "job {} from {} failed",
                    job_id,
                    request.jar.display()
                )));
            }
        }

        if let Some(history) = &actions.copy_history {
            runtime
                .copy_history(&history.dest, &history.job_ids)
                .await?;
        }

        if actions.stop {
            runtime.stop().await?;
            changed = true;
        }

        if actions.clean {
            runtime.clean().await?;
            changed = true;
        }

        if !actions.get_conf.is_empty() {
            let values = runtime.get_conf(&actions.get_conf).await?;
            for name in &actions.get_conf {
                match values.get(name) {
                    Some(value) => writeln!(self.out, "{} = {}", name, value)?,
                    None => warn!(param = %name, "Parameter not set in cluster configuration"),
                }
            }
        }

        if let Some(view) = actions.state {
            report::report(&*runtime, view, &mut *self.out, verbose).await?;
        }

        Ok(changed)
    }
}

/// Warn about flags whose companion action is missing, and forget them.
fn drop_ignored_flags(actions: &mut Actions) {
    if actions.node.is_some()
        && actions.execute.is_none()
        && actions.jar_job.is_none()
        && !actions.shell
    {
        warn!("--node is only used with --execute, --jarjob or --shell, ignoring it");
        actions.node = None;
    }
    if !actions.lib_jars.is_empty() && actions.jar_job.is_none() {
        warn!("--libjars is only used with --jarjob, ignoring it");
        actions.lib_jars.clear();
    }
    if actions.properties.is_some() && !actions.create {
        warn!("--properties is only used with --create, ignoring it");
        actions.properties = None;
    }
}

fn require(runtime: &dyn ClusterRuntime, capability: Capability) -> Result<()> {
    if runtime.supports(capability) {
        return Ok(());
    }
    let handle = runtime.handle();
    Err(Error::usage(format!(
        "{} is not available on {} cluster {} (version {})",
        capability, handle.cluster_type, handle.id, handle.version
    )))
}

fn require_file(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::Input {
            path: path.to_path_buf(),
        })
    }
}

/// Checks that must pass before anything touches the hosts.
fn validate(runtime: &dyn ClusterRuntime, actions: &Actions) -> Result<()> {
    let handle = runtime.handle();

    if let Some(mode) = actions.start {
        if let Some(capability) = mode.capability() {
            require(runtime, capability)?;
        }
        let initialized_before_start = actions.initialize.is_some()
            || (handle.initialized && actions.bootstrap.is_none());
        if !initialized_before_start {
            return Err(Error::usage(format!(
                "{} cluster {} is not initialized, add --initialize to start it",
                handle.cluster_type, handle.id
            )));
        }
    }
    if actions.put_in_dfs.is_some() || actions.get_from_dfs.is_some() {
        require(runtime, Capability::FileTransfer)?;
    }
    if actions.jar_job.is_some() || actions.copy_history.is_some() {
        require(runtime, Capability::Jobs)?;
    }
    if let Some(view) = actions.state {
        if !report::supported(runtime, view) {
            return Err(Error::usage(format!(
                "state view {:?} is not available on {} clusters",
                view, handle.cluster_type
            )));
        }
    }

    if let Some(archive) = &actions.bootstrap {
        require_file(archive)?;
    }
    if let Some(ingestion) = &actions.put_in_dfs {
        ingest::check_local_files(&ingestion.files)?;
    }
    if let Some(request) = &actions.jar_job {
        require_file(&request.jar)?;
        for lib in &actions.lib_jars {
            require_file(lib)?;
        }
    }
    Ok(())
}

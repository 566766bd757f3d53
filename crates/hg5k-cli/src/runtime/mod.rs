//! Live cluster operations
//!
//! A [`ClusterRuntime`] wraps a [`ClusterHandle`] and mutates it in place as
//! services are installed, configured, started and stopped. The pipeline only
//! talks to this trait; [`HadoopCluster`] and [`HiveCluster`] implement it on
//! top of a [`RemoteExecutor`].

mod hadoop;
mod hive;

pub use hadoop::HadoopCluster;
pub use hive::HiveCluster;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use hg5k_common::{conf, ClusterHandle, CommandOutput, Error, Job, Result};

use crate::remote::{quote, RemoteExecutor};

/// Optional actions a runtime may not offer.
///
/// The pipeline checks these before any side effect so that an unsupported
/// request never leaves a cluster half-driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Start only the distributed filesystem
    StartFilesystem,
    /// Start only the legacy MapReduce engine
    StartComputeEngine,
    /// Start only the YARN resource manager
    StartResourceManager,
    /// Push local files into the distributed filesystem, or fetch them back
    FileTransfer,
    /// Submit jar jobs and collect their history
    Jobs,
    /// Filesystem and job report views
    FilesystemReports,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Capability::StartFilesystem => "--start_hdfs",
            Capability::StartComputeEngine => "--start_mr",
            Capability::StartResourceManager => "--start_yarn",
            Capability::FileTransfer => "filesystem transfers",
            Capability::Jobs => "job submission",
            Capability::FilesystemReports => "filesystem reports",
        };
        f.write_str(label)
    }
}

fn unsupported(handle: &ClusterHandle, capability: Capability) -> Error {
    Error::usage(format!(
        "{} is not supported by {} cluster {} (version {})",
        capability, handle.cluster_type, handle.id, handle.version
    ))
}

/// Operations on a live cluster.
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    /// Current state of the cluster.
    fn handle(&self) -> &ClusterHandle;

    /// Whether an optional action is available on this cluster.
    fn supports(&self, capability: Capability) -> bool;

    /// Install the software distribution from a local archive on the hosts.
    async fn bootstrap(&mut self, archive: &Path) -> Result<()>;

    /// Write the cluster configuration and prepare storage.
    ///
    /// With `default_tuning` unset, resource limits are tuned to the master's
    /// cores and memory.
    async fn initialize(&mut self, default_tuning: bool) -> Result<()>;

    /// Set configuration parameters, in `conf_file` or in the file owning each name.
    async fn change_conf(
        &mut self,
        params: &BTreeMap<String, String>,
        conf_file: Option<&str>,
    ) -> Result<()>;

    /// Read configuration parameters from the cluster.
    async fn get_conf(&self, names: &[String]) -> Result<BTreeMap<String, String>>;

    /// Start every service.
    async fn start(&mut self) -> Result<()>;

    async fn start_filesystem(&mut self) -> Result<()> {
        Err(unsupported(self.handle(), Capability::StartFilesystem))
    }

    async fn start_compute_engine(&mut self) -> Result<()> {
        Err(unsupported(self.handle(), Capability::StartComputeEngine))
    }

    async fn start_resource_manager(&mut self) -> Result<()> {
        Err(unsupported(self.handle(), Capability::StartResourceManager))
    }

    /// Stop every running service.
    async fn stop(&mut self) -> Result<()>;

    /// Stop services and remove everything installed on the hosts.
    async fn clean(&mut self) -> Result<()>;

    /// Run a service command on `host` (default: the master).
    async fn execute(&self, command: &str, host: Option<&str>, verbose: bool)
        -> Result<CommandOutput>;

    /// Run a jar job, recording its id and outcome in `job`.
    async fn execute_job(&mut self, _job: &mut Job, _host: Option<&str>, _verbose: bool) -> Result<()> {
        Err(unsupported(self.handle(), Capability::Jobs))
    }

    /// Copy job history files (all, or only those of `job_ids`) to `local_path`.
    async fn copy_history(&self, _local_path: &Path, _job_ids: &[String]) -> Result<()> {
        Err(unsupported(self.handle(), Capability::Jobs))
    }
}

/// Run `command` on `host`, failing unless it exits successfully.
pub(crate) async fn run_checked(
    remote: &dyn RemoteExecutor,
    host: &str,
    command: &str,
    what: &str,
) -> Result<CommandOutput> {
    remote
        .run(host, command)
        .await?
        .check(&format!("{} on {}", what, host))
}

/// Run `command` on every host in order.
pub(crate) async fn run_on_all(
    remote: &dyn RemoteExecutor,
    hosts: &[String],
    command: &str,
    what: &str,
) -> Result<()> {
    for host in hosts {
        run_checked(remote, host, command, what).await?;
    }
    Ok(())
}

/// Log command output at info when verbose, debug otherwise.
pub(crate) fn log_output(host: &str, command: &str, output: &CommandOutput, verbose: bool) {
    if verbose {
        info!(host, command, success = output.success, "{}", output.stdout.trim_end());
        if !output.stderr.trim().is_empty() {
            info!(host, "{}", output.stderr.trim_end());
        }
    } else {
        debug!(host, command, success = output.success, "Command finished");
    }
}

/// Path of `file` inside a remote directory.
pub(crate) fn remote_path(dir: &Path, file: &str) -> String {
    dir.join(file).to_string_lossy().into_owned()
}

/// Fetch a configuration file from `master`, or `None` if it does not exist.
pub(crate) async fn fetch_conf_file(
    remote: &dyn RemoteExecutor,
    master: &str,
    conf_dir: &Path,
    file: &str,
    scratch: &Path,
) -> Result<Option<String>> {
    let source = remote_path(conf_dir, file);
    let exists = remote
        .run(master, &format!("test -f {}", quote(&source)))
        .await?
        .success;
    if !exists {
        return Ok(None);
    }

    let local = scratch.join(file);
    remote.copy_from(master, &source, &local).await?;
    Ok(Some(tokio::fs::read_to_string(&local).await?))
}

/// Apply `params` to a configuration file and push the result to every host.
///
/// XML files are edited as Hadoop configuration documents, anything else as
/// a props file. Missing files are created.
pub(crate) async fn edit_conf_file(
    remote: &dyn RemoteExecutor,
    handle: &ClusterHandle,
    hosts: &[String],
    file: &str,
    params: &BTreeMap<String, String>,
) -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let conf_dir = &handle.settings.conf_dir;
    let is_xml = file.ends_with(".xml");

    let mut content =
        match fetch_conf_file(remote, &handle.master, conf_dir, file, scratch.path()).await? {
            Some(content) => content,
            None if is_xml => conf::empty_configuration(),
            None => String::new(),
        };

    for (name, value) in params {
        let edited = if is_xml {
            conf::replace_in_xml(&content, name, value, true, true)
        } else {
            conf::write_in_props(&content, name, value, true, true)
        };
        match edited {
            Some(updated) => content = updated,
            None => {
                return Err(Error::config(format!(
                    "could not set {} in {}: malformed file",
                    name, file
                )))
            }
        }
    }

    let local: PathBuf = scratch.path().join(file);
    tokio::fs::write(&local, content).await?;

    let dest = conf_dir.to_string_lossy();
    for host in hosts {
        remote.copy_to(host, std::slice::from_ref(&local), &dest).await?;
    }
    info!(file, params = params.len(), "Configuration updated");
    Ok(())
}

/// Read `names` from the given configuration files on `master`; later files
/// win. XML files are read as Hadoop configuration documents, anything else
/// as a props file.
pub(crate) async fn read_conf_files(
    remote: &dyn RemoteExecutor,
    handle: &ClusterHandle,
    files: &[&str],
    names: &[String],
) -> Result<BTreeMap<String, String>> {
    let scratch = tempfile::tempdir()?;
    let mut params = BTreeMap::new();
    for file in files {
        if let Some(content) = fetch_conf_file(
            remote,
            &handle.master,
            &handle.settings.conf_dir,
            file,
            scratch.path(),
        )
        .await?
        {
            if file.ends_with(".xml") {
                params.extend(conf::read_in_xml(&content, names));
            } else {
                params.extend(conf::read_in_props(&content, Some(names)));
            }
        }
    }
    Ok(params)
}

/// Write rendered configuration files into a scratch dir and push them to `hosts`.
pub(crate) async fn push_conf_files(
    remote: &dyn RemoteExecutor,
    hosts: &[String],
    conf_dir: &Path,
    files: &BTreeMap<String, String>,
) -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let mut locals = Vec::with_capacity(files.len());
    for (name, content) in files {
        let local = scratch.path().join(name);
        tokio::fs::write(&local, content).await?;
        locals.push(local);
    }

    let dest = conf_dir.to_string_lossy();
    for host in hosts {
        remote.copy_to(host, &locals, &dest).await?;
    }
    Ok(())
}

/// Name of the directory a distribution archive extracts to.
pub(crate) fn archive_stem(archive: &Path) -> Result<String> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::usage(format!("invalid archive path {}", archive.display())))?;
    let stem = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tgz"))
        .ok_or_else(|| {
            Error::usage(format!("{} is not a .tar.gz distribution archive", name))
        })?;
    Ok(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteExecutor;
    use crate::testing::{hadoop_handle, FakeRemote};
    use hg5k_common::Version;

    #[test]
    fn archive_stem_strips_tarball_suffixes() {
        assert_eq!(
            archive_stem(Path::new("/home/u/hadoop-2.6.0.tar.gz")).unwrap(),
            "hadoop-2.6.0"
        );
        assert_eq!(
            archive_stem(Path::new("apache-hive-1.2.1-bin.tgz")).unwrap(),
            "apache-hive-1.2.1-bin"
        );
        assert!(archive_stem(Path::new("hadoop.zip")).is_err());
    }

    #[tokio::test]
    async fn conf_files_are_read_by_their_format() {
        let remote = FakeRemote::new()
            .with_remote_file(
                "/tmp/hadoop/conf/core-site.xml",
                &conf::render_configuration(&BTreeMap::from([(
                    "fs.defaultFS".to_string(),
                    "hdfs://n0:54310".to_string(),
                )])),
            )
            .with_remote_file(
                "/tmp/hadoop/conf/job.props",
                "# submission defaults\nqueue.name\tbatch\nfs.defaultFS\thdfs://n1:54310\n",
            );
        let handle = hadoop_handle(1, &["n0"], Version::new(2, 6));
        let names = vec!["fs.defaultFS".to_string(), "queue.name".to_string()];

        let params = read_conf_files(&remote, &handle, &["core-site.xml"], &names)
            .await
            .unwrap();
        assert_eq!(params["fs.defaultFS"], "hdfs://n0:54310");
        assert!(!params.contains_key("queue.name"));

        let params = read_conf_files(&remote, &handle, &["core-site.xml", "job.props"], &names)
            .await
            .unwrap();
        assert_eq!(params["fs.defaultFS"], "hdfs://n1:54310");
        assert_eq!(params["queue.name"], "batch");
    }

    #[tokio::test]
    async fn run_on_all_stops_at_the_first_failing_host() {
        let mut remote = MockRemoteExecutor::new();
        remote.expect_run().times(2).returning(|host, _| {
            if host == "n1" {
                Ok(CommandOutput::failed("mkdir: Permission denied"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let hosts = vec!["n0".to_string(), "n1".to_string(), "n2".to_string()];

        let err = run_on_all(&remote, &hosts, "mkdir -p /tmp/hadoop", "prepare dirs")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { ref message }
            if message.contains("prepare dirs on n1") && message.contains("Permission denied")));
    }

    #[test]
    fn remote_paths_join_conf_dir() {
        assert_eq!(
            remote_path(Path::new("/tmp/hadoop/conf"), "core-site.xml"),
            "/tmp/hadoop/conf/core-site.xml"
        );
    }
}

//! Hadoop cluster runtime
//!
//! One type serves both generations: the handle's [`Generation`] selects the
//! scripts, configuration keys and compute service (JobTracker MapReduce for
//! legacy clusters, YARN for modern ones).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use hg5k_common::{ClusterHandle, CommandOutput, Error, Generation, Job, Result, Service, Version};

use super::{
    archive_stem, edit_conf_file, log_output, push_conf_files, read_conf_files, run_checked,
    run_on_all, Capability, ClusterRuntime,
};
use crate::remote::{quote, RemoteExecutor};

const CORE_SITE: &str = "core-site.xml";
const HDFS_SITE: &str = "hdfs-site.xml";
const MAPRED_SITE: &str = "mapred-site.xml";
const YARN_SITE: &str = "yarn-site.xml";

/// Staging directory for distribution archives on each host.
const DIST_STAGING_DIR: &str = "/tmp/hg5k_dist";
/// Staging directory for job jars on the submitting host.
const JOB_STAGING_DIR: &str = "/tmp/hg5k_jobs";
/// Staging directory for collected job history on the master.
const HISTORY_STAGING_DIR: &str = "/tmp/hg5k_history";
/// Where YARN's job history server keeps finished jobs in HDFS.
const MODERN_HISTORY_DIR: &str = "/tmp/hadoop-yarn/staging/history/done";

/// Generation specific layout of a Hadoop install.
trait Layout {
    fn scripts_dir(self) -> &'static str;
    fn compute_service(self) -> Service;
    fn compute_scripts(self) -> (&'static str, &'static str);
    fn default_fs_key(self) -> &'static str;
    fn conf_files(self) -> &'static [&'static str];
    fn required_java(self) -> u32;
}

impl Layout for Generation {
    fn scripts_dir(self) -> &'static str {
        match self {
            Generation::Legacy => "bin",
            Generation::Modern => "sbin",
        }
    }

    fn compute_service(self) -> Service {
        match self {
            Generation::Legacy => Service::ComputeEngine,
            Generation::Modern => Service::ResourceManager,
        }
    }

    fn compute_scripts(self) -> (&'static str, &'static str) {
        match self {
            Generation::Legacy => ("start-mapred.sh", "stop-mapred.sh"),
            Generation::Modern => ("start-yarn.sh", "stop-yarn.sh"),
        }
    }

    fn default_fs_key(self) -> &'static str {
        match self {
            Generation::Legacy => "fs.default.name",
            Generation::Modern => "fs.defaultFS",
        }
    }

    fn conf_files(self) -> &'static [&'static str] {
        match self {
            Generation::Legacy => &[CORE_SITE, HDFS_SITE, MAPRED_SITE],
            Generation::Modern => &[CORE_SITE, HDFS_SITE, MAPRED_SITE, YARN_SITE],
        }
    }

    fn required_java(self) -> u32 {
        match self {
            Generation::Legacy => 6,
            Generation::Modern => 7,
        }
    }
}

/// Configuration file owning a parameter, judged by its prefix.
fn conf_file_for(name: &str, generation: Generation) -> &'static str {
    if name.starts_with("dfs.") {
        HDFS_SITE
    } else if name.starts_with("mapred.") || name.starts_with("mapreduce.") {
        MAPRED_SITE
    } else if name.starts_with("yarn.") && generation == Generation::Modern {
        YARN_SITE
    } else {
        CORE_SITE
    }
}

fn job_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:Running job: |Submitted application )((?:job|application)_\d+_\d+)")
            .expect("job id regex is valid")
    })
}

/// Job id announced in a job's console output.
fn parse_job_id(output: &str) -> Option<String> {
    job_id_re()
        .captures(output)
        .map(|c| c[1].replacen("application_", "job_", 1))
}

fn java_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"version "(\d+)(?:\.(\d+))?"#).expect("java version regex is valid")
    })
}

/// Java major version from `java -version`: `1.7.0_80` is 7, `11.0.2` is 11.
fn parse_java_version(output: &str) -> Option<u32> {
    let captures = java_version_re().captures(output)?;
    let first: u32 = captures[1].parse().ok()?;
    if first == 1 {
        captures.get(2)?.as_str().parse().ok()
    } else {
        Some(first)
    }
}

/// Version reported by `hadoop version` (first line `Hadoop X.Y.Z`).
fn parse_hadoop_version(output: &str) -> Option<Version> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Hadoop "))
        .and_then(|v| v.parse().ok())
}

/// A Hadoop cluster driven over a [`RemoteExecutor`].
pub struct HadoopCluster {
    handle: ClusterHandle,
    remote: Arc<dyn RemoteExecutor>,
}

impl HadoopCluster {
    pub fn new(handle: ClusterHandle, remote: Arc<dyn RemoteExecutor>) -> Self {
        Self { handle, remote }
    }

    fn generation(&self) -> Generation {
        self.handle.generation()
    }

    /// `hadoop` launcher bound to the cluster's configuration directory.
    fn hadoop(&self) -> String {
        format!(
            "{}/bin/hadoop --config {}",
            self.handle.settings.base_dir.display(),
            quote(&self.handle.settings.conf_dir.to_string_lossy())
        )
    }

    fn script(&self, name: &str) -> String {
        format!(
            "{}/{}/{} --config {}",
            self.handle.settings.base_dir.display(),
            self.generation().scripts_dir(),
            name,
            quote(&self.handle.settings.conf_dir.to_string_lossy())
        )
    }

    fn install_dirs(&self) -> String {
        let s = &self.handle.settings;
        [&s.base_dir, &s.conf_dir, &s.logs_dir, &s.temp_dir]
            .iter()
            .map(|p| quote(&p.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn master(&self, command: &str, what: &str) -> Result<CommandOutput> {
        run_checked(self.remote.as_ref(), &self.handle.master, command, what).await
    }

    fn require_initialized(&self, what: &str) -> Result<()> {
        if self.handle.initialized {
            Ok(())
        } else {
            Err(Error::usage(format!(
                "hadoop cluster {} must be initialized before {}",
                self.handle.id, what
            )))
        }
    }

    /// Base parameters of every configuration file.
    fn base_configuration(&self) -> BTreeMap<&'static str, BTreeMap<String, String>> {
        let generation = self.generation();
        let settings = &self.handle.settings;
        let master = &self.handle.master;
        let replication = settings.replication.min(self.handle.hosts.len() as u32).max(1);

        let mut files: BTreeMap<&'static str, BTreeMap<String, String>> = BTreeMap::new();
        let core = files.entry(CORE_SITE).or_default();
        core.insert(
            generation.default_fs_key().to_string(),
            format!("hdfs://{}:{}", master, settings.fs_port),
        );
        core.insert(
            "hadoop.tmp.dir".to_string(),
            settings.temp_dir.to_string_lossy().into_owned(),
        );

        files
            .entry(HDFS_SITE)
            .or_default()
            .insert("dfs.replication".to_string(), replication.to_string());

        let mapred = files.entry(MAPRED_SITE).or_default();
        match generation {
            Generation::Legacy => {
                mapred.insert(
                    "mapred.job.tracker".to_string(),
                    format!("{}:{}", master, settings.compute_port),
                );
            }
            Generation::Modern => {
                mapred.insert("mapreduce.framework.name".to_string(), "yarn".to_string());
                let yarn = files.entry(YARN_SITE).or_default();
                yarn.insert("yarn.resourcemanager.hostname".to_string(), master.clone());
                yarn.insert(
                    "yarn.nodemanager.aux-services".to_string(),
                    "mapreduce_shuffle".to_string(),
                );
            }
        }
        files
    }

    /// Resource limits sized to the master's cores and memory.
    async fn tuned_configuration(
        &self,
        files: &mut BTreeMap<&'static str, BTreeMap<String, String>>,
    ) -> Result<()> {
        let output = self
            .master(
                "nproc && free -m | awk '/^Mem:/ {print $2}'",
                "hardware discovery",
            )
            .await?;
        let mut values = output.stdout.split_whitespace().map(str::parse::<u64>);
        let (cores, mem_mb) = match (values.next(), values.next()) {
            (Some(Ok(cores)), Some(Ok(mem))) if cores > 0 => (cores, mem),
            _ => {
                warn!(
                    output = %output.stdout.trim(),
                    "Could not read cores/memory, keeping default tuning"
                );
                return Ok(());
            }
        };
        info!(cores, mem_mb, "Tuning cluster to master hardware");

        match self.generation() {
            Generation::Legacy => {
                let slots = cores.saturating_sub(1).max(1);
                let heap = (mem_mb / (slots * 2)).max(256);
                let mapred = files.entry(MAPRED_SITE).or_default();
                mapred.insert("mapred.tasktracker.map.tasks.maximum".into(), slots.to_string());
                mapred.insert(
                    "mapred.tasktracker.reduce.tasks.maximum".into(),
                    (slots / 2).max(1).to_string(),
                );
                mapred.insert("mapred.child.java.opts".into(), format!("-Xmx{}m", heap));
            }
            Generation::Modern => {
                let usable = mem_mb.saturating_sub(1024).max(1024);
                let yarn = files.entry(YARN_SITE).or_default();
                yarn.insert("yarn.nodemanager.resource.memory-mb".into(), usable.to_string());
                yarn.insert("yarn.nodemanager.resource.cpu-vcores".into(), cores.to_string());
                yarn.insert("yarn.scheduler.maximum-allocation-mb".into(), usable.to_string());
            }
        }
        Ok(())
    }

    /// Fail unless every host runs a Java recent enough for this generation.
    async fn check_java(&self) -> Result<()> {
        let required = self.generation().required_java();
        let mut outdated = Vec::new();
        for host in &self.handle.hosts {
            let output = self.remote.run(host, "java -version 2>&1 | grep version").await?;
            let version = output
                .success
                .then(|| parse_java_version(&output.stdout))
                .flatten();
            match version {
                Some(v) if v >= required => debug!(host, java = v, "Java version ok"),
                _ => outdated.push(host.clone()),
            }
        }

        if outdated.is_empty() {
            return Ok(());
        }
        Err(Error::usage(format!(
            "Java 1.{}+ required, missing or older on: {}",
            required,
            outdated.join(", ")
        )))
    }

    async fn set_java_home(&self) -> Result<()> {
        let output = self
            .master(
                "readlink -f /usr/bin/javac | sed 's:/bin/javac::'",
                "java discovery",
            )
            .await?;
        let java_home = output.stdout.trim();
        if java_home.is_empty() {
            warn!("No JDK found on the master, JAVA_HOME left unset");
            return Ok(());
        }

        let env_file = super::remote_path(&self.handle.settings.conf_dir, "hadoop-env.sh");
        let command = format!(
            "echo {} >> {}",
            quote(&format!("export JAVA_HOME={}", java_home)),
            quote(&env_file)
        );
        run_on_all(self.remote.as_ref(), &self.handle.hosts, &command, "set JAVA_HOME").await
    }

    async fn format_filesystem(&self) -> Result<()> {
        let command = match self.generation() {
            Generation::Legacy => format!("echo Y | {} namenode -format", self.hadoop()),
            Generation::Modern => format!(
                "{}/bin/hdfs --config {} namenode -format -force",
                self.handle.settings.base_dir.display(),
                quote(&self.handle.settings.conf_dir.to_string_lossy())
            ),
        };
        self.master(&command, "namenode format").await?;
        Ok(())
    }

    async fn stop_compute(&mut self) -> Result<()> {
        let service = self.generation().compute_service();
        if !self.handle.is_running(service) {
            return Ok(());
        }
        let (_, stop) = self.generation().compute_scripts();
        self.master(&self.script(stop), "stop compute").await?;
        self.handle.set_running(service, false)
    }

    async fn stop_filesystem(&mut self) -> Result<()> {
        if !self.handle.is_running(Service::Filesystem) {
            return Ok(());
        }
        self.master(&self.script("stop-dfs.sh"), "stop hdfs").await?;
        self.handle.set_running(Service::Filesystem, false)
    }
}

#[async_trait]
impl ClusterRuntime for HadoopCluster {
    fn handle(&self) -> &ClusterHandle {
        &self.handle
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::StartComputeEngine => self.generation() == Generation::Legacy,
            Capability::StartResourceManager => self.generation() == Generation::Modern,
            Capability::StartFilesystem
            | Capability::FileTransfer
            | Capability::Jobs
            | Capability::FilesystemReports => true,
        }
    }

    async fn bootstrap(&mut self, archive: &Path) -> Result<()> {
        let stem = archive_stem(archive)?;
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let settings = &self.handle.settings;
        let remote = self.remote.as_ref();

        self.check_java().await?;
        info!(archive = %archive.display(), hosts = self.handle.hosts.len(), "Bootstrapping hadoop");
        for host in &self.handle.hosts {
            run_checked(
                remote,
                host,
                &format!("rm -rf {} && mkdir -p {}", self.install_dirs(), DIST_STAGING_DIR),
                "prepare install",
            )
            .await?;
            remote
                .copy_to(host, &[archive.to_path_buf()], DIST_STAGING_DIR)
                .await?;

            let base = quote(&settings.base_dir.to_string_lossy());
            let conf = quote(&settings.conf_dir.to_string_lossy());
            let install = format!(
                "tar xzf {dist}/{archive} -C {dist} && mkdir -p $(dirname {base}) && \
                 mv {dist}/{stem} {base} && mkdir -p {conf} {logs} {temp} && \
                 (cp -r {base}/etc/hadoop/* {conf} 2>/dev/null || cp -r {base}/conf/* {conf}) && \
                 rm -rf {dist}",
                dist = DIST_STAGING_DIR,
                archive = quote(&archive_name),
                stem = quote(&stem),
                base = base,
                conf = conf,
                logs = quote(&settings.logs_dir.to_string_lossy()),
                temp = quote(&settings.temp_dir.to_string_lossy()),
            );
            run_checked(remote, host, &install, "install hadoop").await?;
        }

        let output = self.master(&format!("{} version", self.hadoop()), "hadoop version").await?;
        match parse_hadoop_version(&output.stdout) {
            Some(version) => {
                if version != self.handle.version {
                    info!(from = %self.handle.version, to = %version, "Detected hadoop version");
                }
                self.handle.version = version;
            }
            None => warn!(
                version = %self.handle.version,
                "Could not detect hadoop version, keeping the declared one"
            ),
        }

        self.handle.set_initialized(false);
        Ok(())
    }

    async fn initialize(&mut self, default_tuning: bool) -> Result<()> {
        self.check_java().await?;
        if self.handle.any_running() {
            self.stop().await?;
        }

        let mut files = self.base_configuration();
        if !default_tuning {
            self.tuned_configuration(&mut files).await?;
        }

        let mut rendered: BTreeMap<String, String> = files
            .iter()
            .map(|(name, params)| (name.to_string(), hg5k_common::conf::render_configuration(params)))
            .collect();
        rendered.insert("masters".to_string(), format!("{}\n", self.handle.master));
        rendered.insert("slaves".to_string(), format!("{}\n", self.handle.hosts.join("\n")));

        push_conf_files(
            self.remote.as_ref(),
            &self.handle.hosts,
            &self.handle.settings.conf_dir,
            &rendered,
        )
        .await?;
        self.set_java_home().await?;
        self.format_filesystem().await?;

        self.handle.set_initialized(true);
        info!(id = self.handle.id, "Hadoop cluster initialized");
        Ok(())
    }

    async fn change_conf(
        &mut self,
        params: &BTreeMap<String, String>,
        conf_file: Option<&str>,
    ) -> Result<()> {
        let mut by_file: BTreeMap<&str, BTreeMap<String, String>> = BTreeMap::new();
        for (name, value) in params {
            let file = conf_file.unwrap_or_else(|| conf_file_for(name, self.generation()));
            by_file
                .entry(file)
                .or_default()
                .insert(name.clone(), value.clone());
        }

        for (file, params) in &by_file {
            edit_conf_file(
                self.remote.as_ref(),
                &self.handle,
                &self.handle.hosts,
                file,
                params,
            )
            .await?;
        }
        Ok(())
    }

    async fn get_conf(&self, names: &[String]) -> Result<BTreeMap<String, String>> {
        read_conf_files(
            self.remote.as_ref(),
            &self.handle,
            self.generation().conf_files(),
            names,
        )
        .await
    }

    async fn start(&mut self) -> Result<()> {
        self.start_filesystem().await?;
        match self.generation() {
            Generation::Legacy => self.start_compute_engine().await,
            Generation::Modern => self.start_resource_manager().await,
        }
    }

    async fn start_filesystem(&mut self) -> Result<()> {
        self.require_initialized("starting hdfs")?;
        self.master(&self.script("start-dfs.sh"), "start hdfs").await?;
        self.master(
            &format!("{} dfsadmin -safemode wait", self.hadoop()),
            "leave safe mode",
        )
        .await?;
        self.handle.set_running(Service::Filesystem, true)?;
        info!(id = self.handle.id, "HDFS started");
        Ok(())
    }

    async fn start_compute_engine(&mut self) -> Result<()> {
        if self.generation() != Generation::Legacy {
            return Err(super::unsupported(&self.handle, Capability::StartComputeEngine));
        }
        self.require_initialized("starting mapreduce")?;
        let (start, _) = self.generation().compute_scripts();
        self.master(&self.script(start), "start mapreduce").await?;
        self.handle.set_running(Service::ComputeEngine, true)?;
        info!(id = self.handle.id, "MapReduce started");
        Ok(())
    }

    async fn start_resource_manager(&mut self) -> Result<()> {
        if self.generation() != Generation::Modern {
            return Err(super::unsupported(&self.handle, Capability::StartResourceManager));
        }
        self.require_initialized("starting yarn")?;
        let (start, _) = self.generation().compute_scripts();
        self.master(&self.script(start), "start yarn").await?;
        self.handle.set_running(Service::ResourceManager, true)?;
        info!(id = self.handle.id, "YARN started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.handle.any_running() {
            info!(id = self.handle.id, "No hadoop services running");
            return Ok(());
        }
        self.stop_compute().await?;
        self.stop_filesystem().await?;
        info!(id = self.handle.id, "Hadoop stopped");
        Ok(())
    }

    async fn clean(&mut self) -> Result<()> {
        if self.handle.any_running() {
            self.stop().await?;
        }
        run_on_all(
            self.remote.as_ref(),
            &self.handle.hosts,
            &format!("rm -rf {}", self.install_dirs()),
            "clean",
        )
        .await?;
        self.handle.set_initialized(false);
        info!(id = self.handle.id, "Hadoop cluster cleaned");
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        host: Option<&str>,
        verbose: bool,
    ) -> Result<CommandOutput> {
        let host = host.unwrap_or(&self.handle.master);
        let full = format!("{} {}", self.hadoop(), command);
        let output = self.remote.run(host, &full).await?;
        log_output(host, command, &output, verbose);
        Ok(output)
    }

    async fn execute_job(&mut self, job: &mut Job, host: Option<&str>, verbose: bool) -> Result<()> {
        let host = host.unwrap_or(&self.handle.master).to_string();
        let remote = self.remote.as_ref();

        let mut uploads = vec![job.local_path.clone()];
        uploads.extend(job.lib_jars.iter().cloned());
        run_checked(remote, &host, &format!("mkdir -p {}", JOB_STAGING_DIR), "stage job").await?;
        remote.copy_to(&host, &uploads, JOB_STAGING_DIR).await?;

        let staged = |p: &Path| {
            format!(
                "{}/{}",
                JOB_STAGING_DIR,
                p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            )
        };

        let mut command = format!("jar {}", quote(&staged(job.local_path.as_path())));
        let mut params = job.params.iter();
        // Generic options go after the program name so ToolRunner picks them up
        if let Some(first) = params.next() {
            command.push(' ');
            command.push_str(&quote(first));
        }
        if !job.lib_jars.is_empty() {
            let jars: Vec<String> = job.lib_jars.iter().map(|p| staged(p.as_path())).collect();
            command.push_str(&format!(" -libjars {}", quote(&jars.join(","))));
        }
        for param in params {
            command.push(' ');
            command.push_str(&quote(param));
        }

        info!(host = %host, jar = %job.local_path.display(), "Submitting job");
        let output = self.execute(&command, Some(&host), verbose).await?;

        let console = format!("{}\n{}", output.stdout, output.stderr);
        job.job_id = parse_job_id(&console);
        job.success = output.success && !console.contains("Job failed");
        Ok(())
    }

    async fn copy_history(&self, local_path: &Path, job_ids: &[String]) -> Result<()> {
        let raw = format!("{}/raw", HISTORY_STAGING_DIR);
        let out = format!("{}/out", HISTORY_STAGING_DIR);

        let gather = match self.generation() {
            Generation::Legacy => format!(
                "cp -r {} {}",
                quote(&super::remote_path(&self.handle.settings.logs_dir, "history")),
                raw
            ),
            Generation::Modern => {
                format!("{} fs -get {} {}", self.hadoop(), MODERN_HISTORY_DIR, raw)
            }
        };
        self.master(
            &format!(
                "rm -rf {dir} && mkdir -p {out} && {gather}",
                dir = HISTORY_STAGING_DIR,
                out = out,
                gather = gather
            ),
            "gather job history",
        )
        .await?;

        let selectors: Vec<String> = if job_ids.is_empty() {
            vec![String::new()]
        } else {
            job_ids
                .iter()
                .map(|id| format!(" -name {}", quote(&format!("*{}*", id))))
                .collect()
        };
        for selector in &selectors {
            self.master(
                &format!("find {} -type f{} -exec cp {{}} {} \\;", raw, selector, out),
                "select job history",
            )
            .await?;
        }

        let count = self
            .master(&format!("ls {} | wc -l", out), "count job history")
            .await?;
        if count.stdout.trim() == "0" {
            warn!(jobs = ?job_ids, "No job history files found");
            return Ok(());
        }

        tokio::fs::create_dir_all(local_path).await?;
        self.remote
            .copy_from(&self.handle.master, &format!("{}/*", out), local_path)
            .await?;
        info!(dest = %local_path.display(), "Job history copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hadoop_handle, FakeRemote};

    const JAVA_8: &str = "java version \"1.8.0_292\"\n";

    fn cluster(version: Version, remote: &Arc<FakeRemote>) -> HadoopCluster {
        HadoopCluster::new(
            hadoop_handle(1, &["n0", "n1", "n2"], version),
            remote.clone(),
        )
    }

    #[test]
    fn job_ids_are_read_from_console_output() {
        assert_eq!(
            parse_job_id("15/01/01 INFO mapred.JobClient: Running job: job_201501011200_0003"),
            Some("job_201501011200_0003".to_string())
        );
        assert_eq!(
            parse_job_id("INFO impl.YarnClientImpl: Submitted application application_1420070400000_0001"),
            Some("job_1420070400000_0001".to_string())
        );
        assert_eq!(parse_job_id("nothing here"), None);
    }

    #[test]
    fn hadoop_version_is_read_from_first_line() {
        assert_eq!(
            parse_hadoop_version("Hadoop 2.6.0\nSubversion https://git-wip-us.apache.org"),
            Some(Version::new(2, 6))
        );
        assert_eq!(parse_hadoop_version("garbage"), None);
    }

    #[test]
    fn parameters_route_to_owning_file() {
        assert_eq!(conf_file_for("dfs.block.size", Generation::Modern), HDFS_SITE);
        assert_eq!(conf_file_for("mapreduce.map.memory.mb", Generation::Modern), MAPRED_SITE);
        assert_eq!(conf_file_for("yarn.nodemanager.vmem-check-enabled", Generation::Modern), YARN_SITE);
        assert_eq!(conf_file_for("yarn.anything", Generation::Legacy), CORE_SITE);
        assert_eq!(conf_file_for("io.file.buffer.size", Generation::Legacy), CORE_SITE);
    }

    #[test]
    fn capabilities_follow_generation() {
        let remote = Arc::new(FakeRemote::new());
        let legacy = cluster(Version::new(1, 2), &remote);
        assert!(legacy.supports(Capability::StartComputeEngine));
        assert!(!legacy.supports(Capability::StartResourceManager));

        let modern = cluster(Version::new(2, 6), &remote);
        assert!(!modern.supports(Capability::StartComputeEngine));
        assert!(modern.supports(Capability::StartResourceManager));
    }

    #[tokio::test]
    async fn start_requires_initialization() {
        let remote = Arc::new(FakeRemote::new());
        let mut c = cluster(Version::new(2, 6), &remote);
        assert!(matches!(c.start().await, Err(Error::Usage(_))));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn modern_start_and_stop_use_yarn_scripts() {
        let remote = Arc::new(FakeRemote::new());
        let mut c = cluster(Version::new(2, 6), &remote);
        c.handle.set_initialized(true);

        c.start().await.unwrap();
        assert!(c.handle().is_running(Service::Filesystem));
        assert!(c.handle().is_running(Service::ResourceManager));

        c.stop().await.unwrap();
        assert!(!c.handle().any_running());

        let commands = remote.commands();
        assert!(commands[0].contains("/sbin/start-dfs.sh"));
        assert!(commands[1].contains("dfsadmin -safemode wait"));
        assert!(commands[2].contains("/sbin/start-yarn.sh"));
        assert!(commands[3].contains("/sbin/stop-yarn.sh"));
        assert!(commands[4].contains("/sbin/stop-dfs.sh"));
    }

    #[tokio::test]
    async fn legacy_start_uses_mapred_scripts() {
        let remote = Arc::new(FakeRemote::new());
        let mut c = cluster(Version::new(1, 2), &remote);
        c.handle.set_initialized(true);

        c.start().await.unwrap();
        assert!(c.handle().is_running(Service::ComputeEngine));
        assert!(remote.commands()[2].contains("/bin/start-mapred.sh"));
        assert!(matches!(
            c.start_resource_manager().await,
            Err(Error::Usage(_))
        ));
    }

    #[tokio::test]
    async fn failed_start_leaves_service_stopped() {
        let remote = Arc::new(FakeRemote::new().respond(
            "start-dfs.sh",
            CommandOutput::failed("namenode did not start"),
        ));
        let mut c = cluster(Version::new(2, 6), &remote);
        c.handle.set_initialized(true);

        let err = c.start().await.unwrap_err();
        assert!(err.to_string().contains("namenode did not start"));
        assert!(!c.handle().any_running());
    }

    #[test]
    fn java_versions_are_read_in_both_numbering_schemes() {
        assert_eq!(parse_java_version(JAVA_8), Some(8));
        assert_eq!(
            parse_java_version("openjdk version \"11.0.2\" 2019-01-15"),
            Some(11)
        );
        assert_eq!(parse_java_version("java version \"1.6.0_45\""), Some(6));
        assert_eq!(parse_java_version("bash: java: command not found"), None);
    }

    #[tokio::test]
    async fn bootstrap_stops_before_install_when_a_host_lacks_java() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("hadoop-2.6.0.tar.gz");
        std::fs::write(&archive, "").unwrap();
        let remote = Arc::new(
            FakeRemote::new()
                .respond("java -version", CommandOutput::ok(JAVA_8))
                .failing_host("n1"),
        );
        let mut c = cluster(Version::new(2, 6), &remote);

        let err = c.bootstrap(&archive).await.unwrap_err();
        assert!(matches!(err, Error::Usage(ref msg) if msg.contains("n1") && !msg.contains("n0")));
        assert!(remote
            .commands()
            .iter()
            .all(|c| c.starts_with("java -version")));
        assert!(remote
            .calls()
            .iter()
            .all(|call| !matches!(call, crate::testing::Call::CopyTo { .. })));
    }

    #[tokio::test]
    async fn initialize_rejects_java_older_than_the_generation_needs() {
        let remote = Arc::new(
            FakeRemote::new().respond("java -version", CommandOutput::ok("java version \"1.6.0_45\"\n")),
        );
        let mut c = cluster(Version::new(2, 6), &remote);
        let err = c.initialize(true).await.unwrap_err();
        assert!(matches!(err, Error::Usage(ref msg) if msg.contains("Java 1.7+")));
        assert!(!c.handle().initialized);
        assert_eq!(remote.commands().len(), 3);

        // The same JVM is fine for a legacy cluster
        let remote = Arc::new(
            FakeRemote::new().respond("java -version", CommandOutput::ok("java version \"1.6.0_45\"\n")),
        );
        let mut c = cluster(Version::new(1, 2), &remote);
        c.initialize(true).await.unwrap();
        assert!(c.handle().initialized);
    }

    #[tokio::test]
    async fn initialize_pushes_configuration_to_every_host() {
        let remote = Arc::new(
            FakeRemote::new()
                .respond("java -version", CommandOutput::ok(JAVA_8))
                .respond("readlink", CommandOutput::ok("/usr/lib/jvm/java-8\n")),
        );
        let mut c = cluster(Version::new(2, 6), &remote);
        c.initialize(true).await.unwrap();
        assert!(c.handle().initialized);

        let core = remote
            .remote_file("/tmp/hadoop/conf/core-site.xml")
            .unwrap();
        assert_eq!(
            hg5k_common::conf::read_param_in_xml(&core, "fs.defaultFS").as_deref(),
            Some("hdfs://n0:54310")
        );
        let slaves = remote.remote_file("/tmp/hadoop/conf/slaves").unwrap();
        assert_eq!(slaves, "n0\nn1\nn2\n");

        let pushed_hosts: Vec<String> = remote
            .calls()
            .iter()
            .filter(|call| matches!(call, crate::testing::Call::CopyTo { .. }))
            .map(|call| call.host().to_string())
            .collect();
        assert_eq!(pushed_hosts, vec!["n0", "n1", "n2"]);
        assert!(remote
            .commands()
            .iter()
            .any(|c| c.contains("namenode -format -force")));
    }

    #[tokio::test]
    async fn tuned_initialize_sizes_yarn_to_master() {
        let remote = Arc::new(
            FakeRemote::new()
                .respond("java -version", CommandOutput::ok(JAVA_8))
                .respond("nproc", CommandOutput::ok("8\n16384\n"))
                .respond("readlink", CommandOutput::ok("/usr/lib/jvm/java-8\n")),
        );
        let mut c = cluster(Version::new(2, 6), &remote);
        c.initialize(false).await.unwrap();

        let yarn = remote.remote_file("/tmp/hadoop/conf/yarn-site.xml").unwrap();
        assert_eq!(
            hg5k_common::conf::read_param_in_xml(&yarn, "yarn.nodemanager.resource.cpu-vcores")
                .as_deref(),
            Some("8")
        );
        assert_eq!(
            hg5k_common::conf::read_param_in_xml(&yarn, "yarn.nodemanager.resource.memory-mb")
                .as_deref(),
            Some("15360")
        );
    }

    #[tokio::test]
    async fn change_conf_edits_fetched_file_and_pushes_it() {
        let remote = Arc::new(FakeRemote::new().with_remote_file(
            "/tmp/hadoop/conf/hdfs-site.xml",
            "<configuration>\n  <property><name>dfs.replication</name><value>3</value></property>\n</configuration>\n",
        ));
        let mut c = cluster(Version::new(2, 6), &remote);

        let mut params = BTreeMap::new();
        params.insert("dfs.replication".to_string(), "1".to_string());
        c.change_conf(&params, None).await.unwrap();

        let hdfs = remote.remote_file("/tmp/hadoop/conf/hdfs-site.xml").unwrap();
        assert_eq!(
            hg5k_common::conf::read_param_in_xml(&hdfs, "dfs.replication").as_deref(),
            Some("1")
        );

        let values = c.get_conf(&["dfs.replication".to_string()]).await.unwrap();
        assert_eq!(values.get("dfs.replication").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn clean_stops_services_and_resets_flags() {
        let remote = Arc::new(FakeRemote::new());
        let mut c = cluster(Version::new(2, 6), &remote);
        c.handle.set_initialized(true);
        c.handle.set_running(Service::Filesystem, true).unwrap();

        c.clean().await.unwrap();
        assert!(!c.handle().initialized);
        assert!(!c.handle().any_running());

        let removals = remote
            .commands()
            .iter()
            .filter(|c| c.starts_with("rm -rf /tmp/hadoop"))
            .count();
        assert_eq!(removals, 3);
    }

    #[tokio::test]
    async fn job_submission_records_id_and_outcome() {
        let remote = Arc::new(FakeRemote::new().respond(
            " jar ",
            CommandOutput {
                stdout: String::new(),
                stderr: "INFO mapreduce.Job: Running job: job_1420070400000_0007\n".to_string(),
                success: true,
            },
        ));
        let mut c = cluster(Version::new(2, 6), &remote);

        let mut job = Job::new("/home/u/wc.jar", vec!["wordcount".into(), "/in".into(), "/out".into()])
            .with_lib_jars(vec!["/home/u/dep.jar".into()]);
        c.execute_job(&mut job, Some("n2"), false).await.unwrap();

        assert_eq!(job.job_id.as_deref(), Some("job_1420070400000_0007"));
        assert!(job.success);

        let command = remote
            .commands()
            .into_iter()
            .find(|c| c.contains(" jar "))
            .unwrap();
        assert!(command.ends_with(
            "jar /tmp/hg5k_jobs/wc.jar wordcount -libjars /tmp/hg5k_jobs/dep.jar /in /out"
        ));
        assert!(remote.calls().iter().all(|call| call.host() == "n2"));
    }

    #[tokio::test]
    async fn execute_runs_hadoop_command_on_master_by_default() {
        let remote = Arc::new(FakeRemote::new().respond("fs -ls", CommandOutput::ok("Found 1 items")));
        let c = cluster(Version::new(2, 6), &remote);

        let output = c.execute("fs -ls /", None, true).await.unwrap();
        assert_eq!(output.stdout, "Found 1 items");
        assert_eq!(remote.calls()[0].host(), "n0");
        assert!(remote.commands()[0].ends_with("/bin/hadoop --config /tmp/hadoop/conf fs -ls /"));
    }
}

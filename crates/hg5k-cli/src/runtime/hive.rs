//! Hive runtime
//!
//! Hive is installed on the master of the Hadoop cluster it was created from
//! and uses that cluster's HDFS for its warehouse. The Hadoop install and
//! configuration directories are copied into the handle's settings when the
//! Hive handle is created.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use hg5k_common::{conf, ClusterHandle, CommandOutput, Error, Generation, Result, Service, Version};

use super::{
    archive_stem, edit_conf_file, log_output, push_conf_files, read_conf_files, run_checked,
    Capability, ClusterRuntime,
};
use crate::remote::{quote, RemoteExecutor};

const HIVE_SITE: &str = "hive-site.xml";
const WAREHOUSE_DIR: &str = "/user/hive/warehouse";
const SCRATCH_DIR: &str = "/tmp/hive";
const DIST_STAGING_DIR: &str = "/tmp/hg5k_hive_dist";

/// Version reported by `hive --version` (line `Hive X.Y.Z`).
fn parse_hive_version(output: &str) -> Option<Version> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Hive "))
        .and_then(|v| v.parse().ok())
}

/// A Hive service layered on a Hadoop cluster.
pub struct HiveCluster {
    handle: ClusterHandle,
    remote: Arc<dyn RemoteExecutor>,
}

impl HiveCluster {
    pub fn new(handle: ClusterHandle, remote: Arc<dyn RemoteExecutor>) -> Self {
        Self { handle, remote }
    }

    fn master_only(&self) -> Vec<String> {
        vec![self.handle.master.clone()]
    }

    /// Environment exported before every Hive command.
    fn env(&self) -> Result<String> {
        let settings = &self.handle.settings;
        let hadoop_home = settings.hadoop_home.as_ref().ok_or_else(|| {
            Error::config(format!(
                "hive cluster {} has no hadoop install recorded",
                self.handle.id
            ))
        })?;
        let mut env = format!(
            "export HADOOP_HOME={} HIVE_HOME={} HIVE_CONF_DIR={}",
            quote(&hadoop_home.to_string_lossy()),
            quote(&settings.base_dir.to_string_lossy()),
            quote(&settings.conf_dir.to_string_lossy()),
        );
        if let Some(hadoop_conf) = &settings.hadoop_conf_dir {
            env.push_str(&format!(
                " HADOOP_CONF_DIR={}",
                quote(&hadoop_conf.to_string_lossy())
            ));
        }
        Ok(env)
    }

    fn bin(&self, tool: &str) -> String {
        format!("{}/bin/{}", self.handle.settings.base_dir.display(), tool)
    }

    async fn master(&self, command: &str, what: &str) -> Result<CommandOutput> {
        let full = format!("{} && {}", self.env()?, command);
        run_checked(self.remote.as_ref(), &self.handle.master, &full, what).await
    }

    fn site_configuration(&self) -> BTreeMap<String, String> {
        let temp = self.handle.settings.temp_dir.to_string_lossy();
        let mut params = BTreeMap::new();
        params.insert(
            "javax.jdo.option.ConnectionURL".to_string(),
            format!("jdbc:derby:;databaseName={}/metastore_db;create=true", temp),
        );
        params.insert(
            "hive.metastore.warehouse.dir".to_string(),
            WAREHOUSE_DIR.to_string(),
        );
        params.insert("hive.exec.scratchdir".to_string(), SCRATCH_DIR.to_string());
        params
    }

    /// `fs -mkdir` creates parents by itself on legacy Hadoop and needs `-p`
    /// on modern releases.
    fn mkdir(&self) -> &'static str {
        match self.handle.settings.hadoop_version.map(|v| v.generation()) {
            Some(Generation::Legacy) => "-mkdir",
            _ => "-mkdir -p",
        }
    }

    fn hadoop_fs(&self, args: &str) -> Result<String> {
        let hadoop_home = self.handle.settings.hadoop_home.as_ref().ok_or_else(|| {
            Error::config(format!(
                "hive cluster {} has no hadoop install recorded",
                self.handle.id
            ))
        })?;
        Ok(format!("{}/bin/hadoop fs {}", hadoop_home.display(), args))
    }
}

#[async_trait]
impl ClusterRuntime for HiveCluster {
    fn handle(&self) -> &ClusterHandle {
        &self.handle
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    async fn bootstrap(&mut self, archive: &Path) -> Result<()> {
        let stem = archive_stem(archive)?;
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let settings = &self.handle.settings;
        let master = &self.handle.master;
        let remote = self.remote.as_ref();

        info!(archive = %archive.display(), master = %master, "Bootstrapping hive");
        let dirs = [&settings.base_dir, &settings.conf_dir, &settings.logs_dir, &settings.temp_dir]
            .iter()
            .map(|p| quote(&p.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ");
        run_checked(
            remote,
            master,
            &format!("rm -rf {} && mkdir -p {}", dirs, DIST_STAGING_DIR),
            "prepare hive install",
        )
        .await?;
        remote
            .copy_to(master, &[archive.to_path_buf()], DIST_STAGING_DIR)
            .await?;

        let base = quote(&settings.base_dir.to_string_lossy());
        let install = format!(
            "tar xzf {dist}/{archive} -C {dist} && mkdir -p $(dirname {base}) && \
             mv {dist}/{stem} {base} && mkdir -p {dirs} && rm -rf {dist}",
            dist = DIST_STAGING_DIR,
            archive = quote(&archive_name),
            stem = quote(&stem),
            base = base,
            dirs = dirs,
        );
        run_checked(remote, master, &install, "install hive").await?;

        let output = self
            .master(&format!("{} --version", self.bin("hive")), "hive version")
            .await?;
        match parse_hive_version(&output.stdout) {
            Some(version) => self.handle.version = version,
            None => warn!(
                version = %self.handle.version,
                "Could not detect hive version, keeping the declared one"
            ),
        }

        self.handle.set_initialized(false);
        Ok(())
    }

    async fn initialize(&mut self, _default_tuning: bool) -> Result<()> {
        if self.handle.any_running() {
            self.stop().await?;
        }

        let mut files = BTreeMap::new();
        files.insert(
            HIVE_SITE.to_string(),
            conf::render_configuration(&self.site_configuration()),
        );
        push_conf_files(
            self.remote.as_ref(),
            &self.master_only(),
            &self.handle.settings.conf_dir,
            &files,
        )
        .await?;

        let mkdirs = format!(
            "{} && {}",
            self.hadoop_fs(&format!("{} {} {}", self.mkdir(), WAREHOUSE_DIR, SCRATCH_DIR))?,
            self.hadoop_fs(&format!("-chmod g+w {} {}", WAREHOUSE_DIR, SCRATCH_DIR))?
        );
        self.master(&mkdirs, "create warehouse").await?;

        let temp = quote(&self.handle.settings.temp_dir.to_string_lossy());
        self.master(
            &format!(
                "cd {} && {} -dbType derby -initSchema",
                temp,
                self.bin("schematool")
            ),
            "initialize metastore",
        )
        .await?;

        self.handle.set_initialized(true);
        info!(id = self.handle.id, "Hive initialized");
        Ok(())
    }

    async fn change_conf(
        &mut self,
        params: &BTreeMap<String, String>,
        conf_file: Option<&str>,
    ) -> Result<()> {
        edit_conf_file(
            self.remote.as_ref(),
            &self.handle,
            &self.master_only(),
            conf_file.unwrap_or(HIVE_SITE),
            params,
        )
        .await
    }

    async fn get_conf(&self, names: &[String]) -> Result<BTreeMap<String, String>> {
        read_conf_files(self.remote.as_ref(), &self.handle, &[HIVE_SITE], names).await
    }

    async fn start(&mut self) -> Result<()> {
        if !self.handle.initialized {
            return Err(Error::usage(format!(
                "hive cluster {} must be initialized before starting",
                self.handle.id
            )));
        }

        let temp = quote(&self.handle.settings.temp_dir.to_string_lossy());
        let logs = self.handle.settings.logs_dir.to_string_lossy().into_owned();
        for (service, log) in [("metastore", "metastore.log"), ("hiveserver2", "hiveserver2.log")] {
            let command = format!(
                "cd {} && nohup {} --service {} > {} 2>&1 &",
                temp,
                self.bin("hive"),
                service,
                quote(&format!("{}/{}", logs, log))
            );
            self.master(&command, &format!("start {}", service)).await?;
        }

        self.handle.set_running(Service::HiveServer, true)?;
        info!(id = self.handle.id, "Hive started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.handle.is_running(Service::HiveServer) {
            info!(id = self.handle.id, "Hive is not running");
            return Ok(());
        }
        run_checked(
            self.remote.as_ref(),
            &self.handle.master,
            "pkill -f org.apache.hive.service.server.HiveServer2; \
             pkill -f org.apache.hadoop.hive.metastore.HiveMetaStore; true",
            "stop hive",
        )
        .await?;
        self.handle.set_running(Service::HiveServer, false)?;
        info!(id = self.handle.id, "Hive stopped");
        Ok(())
    }

    async fn clean(&mut self) -> Result<()> {
        if self.handle.any_running() {
            self.stop().await?;
        }
        let s = &self.handle.settings;
        let dirs = [&s.base_dir, &s.conf_dir, &s.logs_dir, &s.temp_dir]
            .iter()
            .map(|p| quote(&p.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ");
        run_checked(
            self.remote.as_ref(),
            &self.handle.master,
            &format!("rm -rf {}", dirs),
            "clean hive",
        )
        .await?;
        self.handle.set_initialized(false);
        info!(id = self.handle.id, "Hive cleaned");
        Ok(())
    }

    async fn execute(
        &self,
        command: &str,
        host: Option<&str>,
        verbose: bool,
    ) -> Result<CommandOutput> {
        let host = host.unwrap_or(&self.handle.master);
        let full = format!("{} && {} -e {}", self.env()?, self.bin("hive"), quote(command));
        let output = self.remote.run(host, &full).await?;
        log_output(host, command, &output, verbose);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use hg5k_common::{ClusterSettings, ClusterType};
    use std::path::PathBuf;

    fn hive(remote: &Arc<FakeRemote>) -> HiveCluster {
        hive_on(remote, Version::new(2, 6))
    }

    fn hive_on(remote: &Arc<FakeRemote>, hadoop_version: Version) -> HiveCluster {
        let settings = ClusterSettings {
            hadoop_home: Some(PathBuf::from("/tmp/hadoop")),
            hadoop_conf_dir: Some(PathBuf::from("/tmp/hadoop/conf")),
            hadoop_version: Some(hadoop_version),
            ..ClusterSettings::hive_defaults()
        };
        let handle = ClusterHandle::new(
            ClusterType::Hive,
            1,
            vec!["n0".into(), "n1".into()],
            Version::new(1, 2),
            settings,
        )
        .unwrap();
        HiveCluster::new(handle, remote.clone())
    }

    #[test]
    fn hive_version_is_parsed() {
        assert_eq!(
            parse_hive_version("Hive 1.2.1\nSubversion git://..."),
            Some(Version::new(1, 2))
        );
    }

    #[test]
    fn hive_offers_no_hadoop_only_actions() {
        let remote = Arc::new(FakeRemote::new());
        let h = hive(&remote);
        assert!(!h.supports(Capability::Jobs));
        assert!(!h.supports(Capability::FileTransfer));
        assert!(!h.supports(Capability::StartFilesystem));
    }

    #[tokio::test]
    async fn initialize_writes_site_and_creates_warehouse() {
        let remote = Arc::new(FakeRemote::new());
        let mut h = hive(&remote);
        h.initialize(true).await.unwrap();
        assert!(h.handle().initialized);

        let site = remote.remote_file("/tmp/hive/conf/hive-site.xml").unwrap();
        assert_eq!(
            conf::read_param_in_xml(&site, "hive.metastore.warehouse.dir").as_deref(),
            Some(WAREHOUSE_DIR)
        );
        assert!(remote
            .commands()
            .iter()
            .any(|c| c.contains("/tmp/hadoop/bin/hadoop fs -mkdir -p /user/hive/warehouse")));
        assert!(remote.calls().iter().all(|c| c.host() == "n0"));
    }

    #[tokio::test]
    async fn warehouse_mkdir_follows_the_hadoop_generation() {
        let remote = Arc::new(FakeRemote::new());
        let mut h = hive_on(&remote, Version::new(1, 2));
        h.initialize(true).await.unwrap();

        let commands = remote.commands();
        assert!(commands
            .iter()
            .any(|c| c.contains("/tmp/hadoop/bin/hadoop fs -mkdir /user/hive/warehouse /tmp/hive")));
        assert!(commands.iter().all(|c| !c.contains("-mkdir -p /user/hive")));
    }

    #[tokio::test]
    async fn execute_wraps_query_in_hive_cli() {
        let remote = Arc::new(FakeRemote::new().respond("hive -e", CommandOutput::ok("42")));
        let h = hive(&remote);
        let output = h.execute("select count(*) from t", None, false).await.unwrap();
        assert_eq!(output.stdout, "42");
        assert!(remote.commands()[0].ends_with("/tmp/hive/bin/hive -e 'select count(*) from t'"));
    }

    #[tokio::test]
    async fn start_and_stop_track_hiveserver() {
        let remote = Arc::new(FakeRemote::new());
        let mut h = hive(&remote);
        assert!(h.start().await.is_err());

        h.handle.set_initialized(true);
        h.start().await.unwrap();
        assert!(h.handle().is_running(Service::HiveServer));

        h.stop().await.unwrap();
        assert!(!h.handle().any_running());
    }

    #[tokio::test]
    async fn missing_hadoop_home_is_a_config_error() {
        let remote = Arc::new(FakeRemote::new());
        let mut h = hive(&remote);
        h.handle.settings.hadoop_home = None;
        assert!(matches!(
            h.execute("show tables", None, false).await,
            Err(Error::Config(_))
        ));
    }
}

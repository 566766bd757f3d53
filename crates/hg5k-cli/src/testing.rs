//! Scripted remote executor for tests that need to observe call order,
//! file contents or concurrency.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Barrier;

use hg5k_common::{ClusterHandle, ClusterSettings, ClusterType, CommandOutput, Error, Result, Version};

use crate::remote::RemoteExecutor;

/// One recorded interaction with the fake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Run { host: String, command: String },
    CopyTo { host: String, files: Vec<String>, dest: String },
    CopyFrom { host: String, source: String },
    Shell { host: String },
}

impl Call {
    pub fn host(&self) -> &str {
        match self {
            Call::Run { host, .. }
            | Call::CopyTo { host, .. }
            | Call::CopyFrom { host, .. }
            | Call::Shell { host } => host,
        }
    }
}

#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
    remote_files: Mutex<HashMap<String, String>>,
    failing_hosts: HashSet<String>,
    copy_barrier: Option<Arc<Barrier>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`. First match wins.
    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
        self
    }

    /// Make every command on `host` fail and every copy to it error.
    pub fn failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }

    /// Block each `copy_to` until `parties` copies are in flight at once.
    pub fn with_copy_barrier(mut self, parties: usize) -> Self {
        self.copy_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Seed a file readable through `copy_from`.
    pub fn with_remote_file(self, path: &str, content: &str) -> Self {
        self.remote_files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands run on any host, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Content last pushed to (or seeded at) a remote path.
    pub fn remote_file(&self, path: &str) -> Option<String> {
        self.remote_files.lock().unwrap().get(path).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        self.record(Call::Run {
            host: host.to_string(),
            command: command.to_string(),
        });
        if self.failing_hosts.contains(host) {
            return Ok(CommandOutput::failed(format!("{}: connection reset", host)));
        }
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    async fn copy_to(&self, host: &str, sources: &[PathBuf], dest_dir: &str) -> Result<()> {
        self.record(Call::CopyTo {
            host: host.to_string(),
            files: sources
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect(),
            dest: dest_dir.to_string(),
        });

        if let Some(barrier) = &self.copy_barrier {
            barrier.wait().await;
        }
        if self.failing_hosts.contains(host) {
            return Err(Error::command_failed(format!("copy to {} failed", host)));
        }

        for source in sources {
            if let Ok(content) = std::fs::read_to_string(source) {
                let name = source.file_name().unwrap().to_string_lossy();
                self.remote_files
                    .lock()
                    .unwrap()
                    .insert(format!("{}/{}", dest_dir, name), content);
            }
        }
        Ok(())
    }

    async fn copy_from(&self, host: &str, source: &str, dest: &Path) -> Result<()> {
        self.record(Call::CopyFrom {
            host: host.to_string(),
            source: source.to_string(),
        });
        if dest.is_dir() {
            return Ok(());
        }
        let content = self.remote_file(source).unwrap_or_default();
        std::fs::write(dest, content)?;
        Ok(())
    }

    async fn shell(&self, host: &str) -> Result<()> {
        self.record(Call::Shell {
            host: host.to_string(),
        });
        Ok(())
    }
}

/// A Hadoop handle on `hosts` with the default layout.
pub fn hadoop_handle(id: u32, hosts: &[&str], version: Version) -> ClusterHandle {
    ClusterHandle::new(
        ClusterType::Hadoop,
        id,
        hosts.iter().map(|h| h.to_string()).collect(),
        version,
        ClusterSettings::default(),
    )
    .unwrap()
}

//! Remote command execution on cluster hosts
//!
//! [`RemoteExecutor`] is the seam between cluster logic and the transport.
//! Production code uses [`SshExecutor`], which shells out to `ssh` and `scp`;
//! tests substitute mocks or scripted fakes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use hg5k_common::{CommandOutput, Error, Result};

use crate::config::SshConfig;

/// Options applied to every connection: testbed nodes are reinstalled often,
/// so their host keys are not pinned.
const BASE_SSH_OPTIONS: &[&str] = &[
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// Trait abstracting command execution and file transfer on cluster hosts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on `host`.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`]; only
    /// transport failures are errors.
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Copy local files into the directory `dest_dir` on `host`.
    async fn copy_to(&self, host: &str, sources: &[PathBuf], dest_dir: &str) -> Result<()>;

    /// Copy `source` from `host` to the local path `dest`.
    async fn copy_from(&self, host: &str, source: &str, dest: &Path) -> Result<()>;

    /// Open an interactive session on `host`.
    async fn shell(&self, host: &str) -> Result<()>;
}

/// Quote `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// [`RemoteExecutor`] backed by the system `ssh` and `scp` binaries.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn target(&self, host: &str) -> String {
        match &self.config.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        }
    }

    fn options(&self, port_flag: &str) -> Vec<String> {
        let mut args: Vec<String> = BASE_SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
        if let Some(port) = self.config.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        for option in &self.config.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    async fn scp(&self, args: Vec<String>, what: &str) -> Result<()> {
        let output = Command::new("scp")
            .arg("-r")
            .args(self.options("-P"))
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "{}: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        debug!(host, command, "ssh");
        let output = Command::new("ssh")
            .args(self.options("-p"))
            .arg(self.target(host))
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        // 255 is ssh's own failure status, not the remote command's
        if output.status.code() == Some(255) {
            return Err(Error::command_failed(format!(
                "ssh to {} failed: {}",
                host,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }

    async fn copy_to(&self, host: &str, sources: &[PathBuf], dest_dir: &str) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }
        debug!(host, dest_dir, files = sources.len(), "scp to host");

        let mut args: Vec<String> = sources
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        args.push(format!("{}:{}", self.target(host), dest_dir));
        self.scp(args, &format!("copy to {}:{}", host, dest_dir)).await
    }

    async fn copy_from(&self, host: &str, source: &str, dest: &Path) -> Result<()> {
        debug!(host, source, dest = %dest.display(), "scp from host");
        let args = vec![
            format!("{}:{}", self.target(host), source),
            dest.to_string_lossy().into_owned(),
        ];
        self.scp(args, &format!("copy from {}:{}", host, source))
            .await
    }

    async fn shell(&self, host: &str) -> Result<()> {
        let status = Command::new("ssh")
            .arg("-t")
            .args(self.options("-p"))
            .arg(self.target(host))
            .status()
            .await?;

        if !status.success() {
            return Err(Error::command_failed(format!(
                "shell on {} exited with {}",
                host, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(quote("/tmp/hadoop/conf"), "/tmp/hadoop/conf");
        assert_eq!(quote("fs.default.name=hdfs://a:54310"), "fs.default.name=hdfs://a:54310");
    }

    #[test]
    fn special_characters_are_single_quoted() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn target_includes_configured_user() {
        let ssh = SshExecutor::new(SshConfig {
            user: Some("root".to_string()),
            ..Default::default()
        });
        assert_eq!(ssh.target("node-1"), "root@node-1");
        assert_eq!(SshExecutor::default().target("node-1"), "node-1");
    }

    #[test]
    fn port_flag_differs_between_ssh_and_scp() {
        let ssh = SshExecutor::new(SshConfig {
            port: Some(2222),
            extra_options: vec!["ConnectTimeout=10".to_string()],
            ..Default::default()
        });
        let ssh_opts = ssh.options("-p");
        assert!(ssh_opts.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(ssh_opts.windows(2).any(|w| w == ["-o", "ConnectTimeout=10"]));
        assert!(ssh.options("-P").windows(2).any(|w| w == ["-P", "2222"]));
    }
}

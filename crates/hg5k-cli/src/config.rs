//! hg5k CLI configuration.
//!
//! Cluster handles are stored in a state directory resolved by priority:
//! 1. Explicit `--state-dir` flag
//! 2. `HG5K_STATE_DIR` environment variable
//! 3. `~/.hg5k/`
//!
//! Deployment layout comes from the optional `--properties` YAML file, and
//! SSH settings from `HG5K_SSH_*` environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use hg5k_common::{ClusterSettings, Error, Result};

const CONFIG_DIR_NAME: &str = ".hg5k";
const STATE_DIR_ENV: &str = "HG5K_STATE_DIR";
const SSH_USER_ENV: &str = "HG5K_SSH_USER";
const SSH_PORT_ENV: &str = "HG5K_SSH_PORT";
const SSH_OPTIONS_ENV: &str = "HG5K_SSH_OPTIONS";

/// Resolve the state directory using the priority chain.
pub fn state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(STATE_DIR_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let home =
        dirs::home_dir().ok_or_else(|| Error::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Contents of a `--properties` file. Every key is optional.
///
/// ```yaml
/// base_dir: /tmp/hadoop
/// conf_dir: /tmp/hadoop/conf
/// replication: 2
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Properties {
    pub base_dir: Option<PathBuf>,
    pub conf_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub fs_port: Option<u16>,
    pub compute_port: Option<u16>,
    pub replication: Option<u32>,
}

impl Properties {
    /// Overlay the keys present in this file on `base`.
    pub fn apply(self, base: ClusterSettings) -> ClusterSettings {
        ClusterSettings {
            base_dir: self.base_dir.unwrap_or(base.base_dir),
            conf_dir: self.conf_dir.unwrap_or(base.conf_dir),
            logs_dir: self.logs_dir.unwrap_or(base.logs_dir),
            temp_dir: self.temp_dir.unwrap_or(base.temp_dir),
            fs_port: self.fs_port.unwrap_or(base.fs_port),
            compute_port: self.compute_port.unwrap_or(base.compute_port),
            replication: self.replication.unwrap_or(base.replication),
            ..base
        }
    }
}

/// Load a `--properties` file.
pub fn load_properties(path: &Path) -> Result<Properties> {
    if !path.is_file() {
        return Err(Error::Input {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Properties::default());
    }
    serde_yaml::from_str(&data)
        .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))
}

/// SSH connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Extra `-o` style options appended to every connection.
    pub extra_options: Vec<String>,
}

impl SshConfig {
    /// Read settings from `HG5K_SSH_USER`, `HG5K_SSH_PORT` and `HG5K_SSH_OPTIONS`.
    pub fn from_env() -> Result<Self> {
        let user = std::env::var(SSH_USER_ENV).ok().filter(|u| !u.is_empty());
        let port = match std::env::var(SSH_PORT_ENV) {
            Ok(p) if !p.is_empty() => Some(p.parse().map_err(|_| {
                Error::config(format!("{} must be a port number, got '{}'", SSH_PORT_ENV, p))
            })?),
            _ => None,
        };
        let extra_options = std::env::var(SSH_OPTIONS_ENV)
            .map(|o| o.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            user,
            port,
            extra_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_state_dir_wins() {
        let dir = state_dir(Some(Path::new("/explicit/state"))).unwrap();
        assert_eq!(dir, PathBuf::from("/explicit/state"));
    }

    #[test]
    fn properties_overlay_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_dir: /opt/hadoop\nreplication: 2").unwrap();

        let props = load_properties(file.path()).unwrap();
        let settings = props.apply(ClusterSettings::default());
        assert_eq!(settings.base_dir, PathBuf::from("/opt/hadoop"));
        assert_eq!(settings.replication, 2);
        assert_eq!(settings.fs_port, ClusterSettings::default().fs_port);
    }

    #[test]
    fn unknown_property_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_dri: /opt/hadoop").unwrap();
        assert!(matches!(
            load_properties(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_properties_file_is_an_input_error() {
        assert!(matches!(
            load_properties(Path::new("/nonexistent/hg5k.yaml")),
            Err(Error::Input { .. })
        ));
    }

    #[test]
    fn empty_properties_file_keeps_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let props = load_properties(file.path()).unwrap();
        assert_eq!(
            props.apply(ClusterSettings::hive_defaults()),
            ClusterSettings::hive_defaults()
        );
    }
}

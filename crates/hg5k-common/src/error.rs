//! Error types shared by the hg5k tools

use std::path::PathBuf;

use crate::cluster::ClusterType;

/// Result type alias using the shared Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving, driving or persisting cluster handles
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No record exists for the requested `(type, id)`
    #[error("{cluster_type} cluster {id} not found")]
    NotFound { cluster_type: ClusterType, id: u32 },

    /// Attempt to create a cluster over an id that is already taken
    #[error("{cluster_type} cluster {id} already exists")]
    Conflict { cluster_type: ClusterType, id: u32 },

    /// No id given and no default recorded for the type
    #[error("no {cluster_type} cluster id given and no default cluster recorded (use --id or --create)")]
    NoDefaultCluster { cluster_type: ClusterType },

    /// A referenced local file does not exist
    #[error("local file not found: {}", path.display())]
    Input { path: PathBuf },

    /// Action not valid for this cluster or flag combination
    #[error("usage error: {0}")]
    Usage(String),

    /// One or more host workers failed during bulk ingestion
    #[error("ingestion failed on hosts: {}", hosts.join(", "))]
    PartialIngestion { hosts: Vec<String> },

    /// A local or remote command exited unsuccessfully
    #[error("command failed: {message}")]
    CommandFailed { message: String },

    /// Malformed configuration or persisted state
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a usage error with the given message
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// Create a command failure with the given message
    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    /// Create a config error with the given message
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Process exit status for this error category.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound { .. } => 3,
            Error::Conflict { .. } => 4,
            Error::NoDefaultCluster { .. } => 5,
            Error::PartialIngestion { .. } => 6,
            Error::Usage(_) => 64,
            Error::Input { .. } => 66,
            _ => 1,
        }
    }
}

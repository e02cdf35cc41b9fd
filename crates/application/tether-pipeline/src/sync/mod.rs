use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_scanner::ScanOptions;

pub mod engine;
pub mod local;
pub mod reconcile;
pub mod remote;
pub mod resolve;
pub mod state;
pub mod transport;

pub const DEFAULT_REMOTE_BIN: &str = "tether";

/// The far side of a replica pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpec {
    /// `None` means `root` is a directory reachable from this machine.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<Utf8PathBuf>,
    pub root: String,
    /// `tether` executable on the remote host, used for change discovery.
    #[serde(default = "default_remote_bin")]
    pub remote_bin: String,
}

fn default_remote_bin() -> String {
    DEFAULT_REMOTE_BIN.to_string()
}

impl RemoteSpec {
    pub fn directory(root: impl Into<String>) -> Self {
        Self {
            host: None,
            user: None,
            port: None,
            identity_file: None,
            root: root.into(),
            remote_bin: default_remote_bin(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.host.is_none()
    }

    pub fn display(&self) -> String {
        match (&self.host, &self.user) {
            (Some(host), Some(user)) => format!("{user}@{host}:{}", self.root),
            (Some(host), None) => format!("{host}:{}", self.root),
            (None, _) => self.root.clone(),
        }
    }
}

/// Everything one round needs. Built per invocation and never mutated during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub local_root: Utf8PathBuf,
    pub remote: RemoteSpec,
    /// Rename conflicting local files aside instead of blocking the round.
    #[serde(default)]
    pub auto_rename: bool,
    #[serde(default)]
    pub scan: ScanOptions,
    /// Written into conflict copy names.
    #[serde(default = "default_host_id")]
    pub host_id: String,
}

impl SyncConfig {
    pub fn new(local_root: impl Into<Utf8PathBuf>, remote: RemoteSpec) -> Self {
        Self {
            local_root: local_root.into(),
            remote,
            auto_rename: false,
            scan: ScanOptions::default(),
            host_id: default_host_id(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.local_root.is_dir() {
            return Err(SyncError::Config(format!(
                "local root {} is not a directory",
                self.local_root
            )));
        }
        if self.remote.root.trim().is_empty() {
            return Err(SyncError::Config("remote root is empty".into()));
        }
        if self.remote.is_directory() {
            let remote = Utf8Path::new(&self.remote.root);
            let same = match (remote.canonicalize_utf8(), self.local_root.canonicalize_utf8()) {
                (Ok(a), Ok(b)) => a == b,
                _ => remote == self.local_root.as_path(),
            };
            if same {
                return Err(SyncError::Config(
                    "local and remote roots are the same directory".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Host identity: `$HOSTNAME`/`$COMPUTERNAME`, then `/etc/hostname`, then `unknown`.
pub fn default_host_id() -> String {
    for var in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(v) = std::env::var(var) {
            if !v.trim().is_empty() {
                return v.trim().to_string();
            }
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// High-level error type for sync rounds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Change discovery failed: {0}")]
    Discovery(String),
    #[error("{} path(s) changed on both replicas: {}", .paths.len(), .paths.join(", "))]
    ConflictBlocked { paths: Vec<String> },
    #[error("Transfer failed: {0}")]
    Transfer(String),
    #[error("Deletion failed: {0}")]
    Deletion(String),
    #[error("Mark I/O failed: {0}")]
    Io(String),
    #[error("A round is already running for {0}")]
    AlreadyRunning(Utf8PathBuf),
    #[error("Round cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub use engine::SyncEngine;
pub use local::DirTransport;
pub use remote::SshTransport;
pub use transport::Transport;

/// The Transport matching `config.remote`.
pub fn transport_for(config: &SyncConfig) -> Arc<dyn Transport> {
    if config.remote.is_directory() {
        Arc::new(DirTransport::new(
            Utf8PathBuf::from(&config.remote.root),
            config.scan,
        ))
    } else {
        Arc::new(SshTransport::new(config.remote.clone(), config.scan))
    }
}

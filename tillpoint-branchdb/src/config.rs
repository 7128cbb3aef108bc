//! Configuration for branch database routing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide settings for the branch database layer.
///
/// Per-branch connection settings live on the [`Branch`](crate::Branch)
/// record itself; this covers only what is common to the whole process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDbConfig {
    /// Root directory under which SQLite branch databases are placed.
    #[serde(default = "default_sqlite_root")]
    pub sqlite_root: PathBuf,

    /// Connection timeout handed to the dialect driver.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "secs_serde")]
    pub connect_timeout: Duration,
}

fn default_sqlite_root() -> PathBuf {
    PathBuf::from("data/branches")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl BranchDbConfig {
    /// Create a configuration with the given SQLite root directory.
    pub fn new(sqlite_root: impl Into<PathBuf>) -> Self {
        Self {
            sqlite_root: sqlite_root.into(),
            connect_timeout: default_connect_timeout(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// - `TILLPOINT_SQLITE_ROOT`: root directory for SQLite branch files
    /// - `TILLPOINT_CONNECT_TIMEOUT`: connect timeout in seconds
    pub fn from_env() -> Result<Self, crate::BranchDbError> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("TILLPOINT_SQLITE_ROOT") {
            config.sqlite_root = PathBuf::from(root);
        }

        if let Ok(timeout) = std::env::var("TILLPOINT_CONNECT_TIMEOUT") {
            config.connect_timeout = Duration::from_secs(timeout.parse().map_err(|_| {
                crate::BranchDbError::Configuration("Invalid TILLPOINT_CONNECT_TIMEOUT".into())
            })?);
        }

        Ok(config)
    }

    /// Set the SQLite root directory.
    pub fn sqlite_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sqlite_root = root.into();
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for BranchDbConfig {
    fn default() -> Self {
        Self {
            sqlite_root: default_sqlite_root(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Seconds-based serde module for durations.
mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

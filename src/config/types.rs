use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LabexecError, Result};

/// Directory name prefix shared by every session scratch directory.
pub const DEFAULT_NAMESPACE: &str = "labexec-";

/// Wall-clock budget for a single command.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabexecConfig {
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Root under which session directories are created (default: system temp dir)
    pub scratch_root: Option<PathBuf>,
    /// Prefix joined with the session id to form the directory name
    pub namespace: String,
    /// Command timeout in seconds
    pub timeout_seconds: u64,
    /// Evict sessions idle for longer than this many seconds (None = never)
    pub idle_ttl_seconds: Option<u64>,
    /// Commands treated as a terminal reset instead of being executed
    pub clear_commands: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            idle_ttl_seconds: None,
            clear_commands: vec!["clear".to_string(), "cls".to_string()],
        }
    }
}

impl ExecutorConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl_seconds.map(Duration::from_secs)
    }

    /// Reject settings the executor cannot run with.
    ///
    /// The namespace becomes part of every session directory name, so it must
    /// be a plain file name fragment.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds == 0 {
            return Err(LabexecError::Config(
                "executor.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.namespace.is_empty()
            || self.namespace.contains(&['/', '\\'][..])
            || self.namespace.starts_with('.')
        {
            return Err(LabexecError::Config(format!(
                "executor.namespace {:?} is not a valid directory prefix",
                self.namespace
            )));
        }
        if self.idle_ttl_seconds == Some(0) {
            return Err(LabexecError::Config(
                "executor.idle_ttl_seconds must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

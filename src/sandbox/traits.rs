use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::sandbox::CommandResult;

/// Trait for command execution backends.
///
/// The command string is handed to the backend verbatim, shell metacharacters
/// included. The local shell is the only implementation today; a container or
/// VM backed runner can be dropped in without changing the executor.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns the runner name (e.g., "shell")
    fn name(&self) -> &str;

    /// Run `command` with `cwd` as working directory.
    ///
    /// Fails with `Spawn` if the interpreter cannot be started and with
    /// `Timeout` if the command is still running after `timeout`; in the
    /// latter case the process is killed before this returns.
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandResult>;

    /// Check if the runner is able to execute commands.
    /// Default implementation tries a simple echo command.
    async fn health_check(&self, cwd: &Path) -> Result<bool> {
        match self.run("echo ok", cwd, Duration::from_secs(5)).await {
            Ok(result) => Ok(result.success),
            Err(_) => Ok(false),
        }
    }
}

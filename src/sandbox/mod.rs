mod materializer;
mod shell;
mod traits;

use serde::{Deserialize, Serialize};

pub use materializer::{contained_path, materialize};
pub use shell::ShellRunner;
pub use traits::CommandRunner;

/// Result of a command that ran to completion (or was killed by a signal).
///
/// A non-zero exit code is still a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    #[serde(rename = "code")]
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandResult {
    pub fn new(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Self {
        Self {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code,
            success: exit_code == Some(0),
        }
    }
}

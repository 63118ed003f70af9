use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LabexecError, Result};
use crate::sandbox::traits::CommandRunner;
use crate::sandbox::CommandResult;

/// How long output pipes may stay open after the shell itself has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Runs commands through the host shell.
///
/// On Unix the child is placed in its own process group so a timeout kill
/// also reaches anything the shell started.
pub struct ShellRunner {
    program: String,
    flag: String,
}

impl ShellRunner {
    /// Create a runner for the host's default shell.
    pub fn new() -> Self {
        let (program, flag) = default_shell();
        Self { program, flag }
    }

    /// Create a runner for a specific interpreter and its "run a command string" flag.
    pub fn with_shell(program: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flag: flag.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn default_shell() -> (String, String) {
    let program = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
    (program, "/C".to_string())
}

#[cfg(not(windows))]
fn default_shell() -> (String, String) {
    ("/bin/sh".to_string(), "-c".to_string())
}

#[async_trait]
impl CommandRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandResult> {
        debug!(command = %command, cwd = %cwd.display(), "Spawning shell");
        let deadline = Instant::now() + timeout;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.flag);
        // cmd.exe does its own parsing of the /C tail; argv quoting would mangle it
        #[cfg(windows)]
        cmd.raw_arg(command);
        #[cfg(not(windows))]
        cmd.arg(command);
        cmd.current_dir(cwd);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Err(self.spawn_error(cwd, e).await),
        };
        let pgid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output = async move { tokio::try_join!(read_all(stdout), read_all(stderr)) };
        tokio::pin!(output);

        let mut streams = None;
        let waited = tokio::time::timeout_at(deadline, async {
            let mut status = None;
            let mut grace_expired = false;
            loop {
                // Background jobs may hold the pipes open after the shell has
                // exited; they get OUTPUT_GRACE to finish writing.
                if let Some(status) = status {
                    if streams.is_some() || grace_expired {
                        return Ok::<ExitStatus, std::io::Error>(status);
                    }
                }
                tokio::select! {
                    exited = child.wait(), if status.is_none() => status = Some(exited?),
                    read = &mut output, if streams.is_none() => streams = Some(read?),
                    _ = tokio::time::sleep(OUTPUT_GRACE), if status.is_some() => grace_expired = true,
                }
            }
        })
        .await;

        match waited {
            Ok(Ok(status)) => {
                // Nothing started by the command outlives the call.
                #[cfg(unix)]
                if let Some(pgid) = pgid {
                    kill_process_group(pgid);
                }

                let (stdout, stderr) = match streams {
                    Some(streams) => streams,
                    None => {
                        debug!("Output still open after exit, keeping what was written");
                        tokio::time::timeout(OUTPUT_GRACE, &mut output)
                            .await
                            .ok()
                            .and_then(|read| read.ok())
                            .unwrap_or_default()
                    }
                };

                let stdout = String::from_utf8_lossy(&stdout);
                let stderr = String::from_utf8_lossy(&stderr);
                let exit_code = status.code();

                debug!(
                    exit_code = ?exit_code,
                    stdout_len = stdout.len(),
                    stderr_len = stderr.len(),
                    "Command completed"
                );

                Ok(CommandResult::new(&stdout, &stderr, exit_code))
            }
            Ok(Err(e)) => {
                terminate(&mut child, pgid);
                let _ = child.wait().await;
                Err(LabexecError::Spawn(format!(
                    "Failed to collect command output: {}",
                    e
                )))
            }
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out, killing"
                );
                terminate(&mut child, pgid);
                // Reap so nothing outlives the call.
                let _ = child.wait().await;
                Err(LabexecError::Timeout {
                    seconds: whole_seconds(timeout),
                })
            }
        }
    }
}

impl ShellRunner {
    /// Spawn failures are reported against the working directory when that is
    /// what is missing, otherwise against the interpreter.
    async fn spawn_error(&self, cwd: &Path, e: std::io::Error) -> LabexecError {
        let cwd_usable = tokio::fs::metadata(cwd)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if cwd_usable {
            LabexecError::Spawn(format!("{}: {}", self.program, e))
        } else {
            LabexecError::Spawn(format!(
                "working directory {} is not usable: {}",
                cwd.display(),
                e
            ))
        }
    }
}

/// Timeout in whole seconds, rounded up so sub-second budgets never read as 0.
fn whole_seconds(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the child and its process group. Safe to call more than once.
fn terminate(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        kill_process_group(pgid);
    }
    #[cfg(not(unix))]
    let _ = pgid;

    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(status = %status, "Child already exited");
        }
        _ => {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill child");
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            pgid = pgid,
            error = %std::io::Error::last_os_error(),
            "killpg failed"
        );
    }
}


#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;

    #[tokio::test]
    async fn test_quoted_arguments_reach_cmd_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShellRunner::new()
            .run("echo \"a b\"", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.stdout, "\"a b\"");
    }
}

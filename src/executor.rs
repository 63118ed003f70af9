use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{LabexecError, Result};
use crate::protocol::{CommandRequest, Response};
use crate::sandbox::{materialize, CommandResult, CommandRunner, ShellRunner};
use crate::session::{Session, SessionRegistry};

/// What an accepted request turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command was a terminal reset; nothing was executed.
    Cleared,
    Completed(CommandResult),
}

/// Entry point for running a student command against a session.
///
/// Each call resolves the session, writes the request's files into its
/// directory and runs the command there. Calls on the same session are
/// serialized; calls on different sessions run concurrently.
pub struct Executor {
    config: ExecutorConfig,
    registry: Arc<SessionRegistry>,
    runner: Arc<dyn CommandRunner>,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        registry: Arc<SessionRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            registry,
            runner,
        }
    }

    /// Executor backed by the host shell and a registry built from `config`.
    pub fn with_defaults(config: ExecutorConfig) -> Self {
        let registry = Arc::new(SessionRegistry::from_config(&config));
        Self::new(config, registry, Arc::new(ShellRunner::new()))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn runner_name(&self) -> &str {
        self.runner.name()
    }

    /// Check that the runner can execute commands from the scratch root.
    pub async fn health_check(&self) -> Result<bool> {
        self.runner.health_check(self.registry.root()).await
    }

    pub fn is_clear_command(&self, command: &str) -> bool {
        let command = command.trim();
        self.config.clear_commands.iter().any(|c| c == command)
    }

    pub async fn execute(&self, request: &CommandRequest) -> Result<Outcome> {
        let command = request.command.trim();
        if command.is_empty() {
            return Err(LabexecError::EmptyCommand);
        }
        if self.is_clear_command(command) {
            debug!(command = %command, "Clear requested");
            return Ok(Outcome::Cleared);
        }

        let (session, _guard) = self.lock_session(request.session_id.as_deref()).await?;

        let written = materialize(session.dir(), &request.files).await?;
        debug!(session = %session.id(), files = written, "Files materialized");

        let result = self
            .runner
            .run(&request.command, session.dir(), self.config.timeout())
            .await?;
        session.touch();

        info!(
            session = %session.id(),
            command = %command,
            exit_code = ?result.exit_code,
            "Command finished"
        );

        Ok(Outcome::Completed(result))
    }

    /// Run `request` and translate the outcome into its wire shape.
    pub async fn handle(&self, request: &CommandRequest) -> Response {
        match self.execute(request).await {
            Ok(Outcome::Cleared) => Response::cleared(),
            Ok(Outcome::Completed(result)) => Response::Completed(result),
            Err(e) => {
                warn!(error = %e, "Request failed");
                Response::from(e)
            }
        }
    }

    /// Resolve the session and take its execution lock. If the session was
    /// evicted while we waited, resolve it again.
    async fn lock_session(
        &self,
        session_id: Option<&str>,
    ) -> Result<(Arc<Session>, OwnedMutexGuard<()>)> {
        loop {
            let session = self.registry.resolve(session_id).await?;
            let guard = session.acquire().await;
            if !session.is_retired() {
                return Ok((session, guard));
            }
            debug!(session = %session.id(), "Session evicted while waiting, resolving again");
        }
    }
}

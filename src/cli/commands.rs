use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::bridge;
use crate::cli::args::{
    CleanArgs, ConfigAction, ConfigArgs, ExecArgs, FileArg, InitArgs, OutputFormat, ServeArgs,
    TerminalArgs,
};
use crate::cli::render::{self, ERROR_PREFIX};
use crate::config::{get_config_path, ExecutorConfig, LabexecConfig};
use crate::error::{LabexecError, Result};
use crate::executor::Executor;
use crate::guard::{CommandGuard, Verdict};
use crate::protocol::{CommandRequest, Response, VirtualFile};
use crate::session::{generate_session_id, parse_ttl, scratch_dirs, sweep_scratch_root};

// ============================================================================
// Execution Commands
// ============================================================================

/// Execute a single command (resolve session, write files, run)
pub async fn exec(args: ExecArgs, config: LabexecConfig, format: OutputFormat) -> Result<()> {
    info!(command = %args.command, session = ?args.session, "Executing command");

    let executor = Executor::with_defaults(with_timeout(config.executor, args.timeout));
    let ephemeral = args.session.is_none() && !args.keep;
    let session_id = args.session.unwrap_or_else(generate_session_id);

    let request = CommandRequest {
        command: args.command,
        cwd: None,
        files: load_files(&args.files).await?,
        session_id: Some(session_id.clone()),
    };
    let response = executor.handle(&request).await;

    if ephemeral {
        executor.registry().remove(&session_id).await?;
    } else {
        info!(session = %session_id, dir = %executor.registry().dir_for(&session_id).display(), "Session kept");
    }

    output_response(&response, format)
}

/// Serve JSON requests until the input closes or the process is interrupted
pub async fn serve(args: ServeArgs, mut config: LabexecConfig) -> Result<()> {
    if let Some(ttl) = &args.idle_ttl {
        config.executor.idle_ttl_seconds = Some(parse_ttl(ttl)?);
    }

    let executor = Arc::new(Executor::with_defaults(config.executor));
    info!(
        runner = %executor.runner_name(),
        root = %executor.registry().root().display(),
        "Executor ready"
    );
    if !executor.health_check().await? {
        warn!(runner = %executor.runner_name(), "Runner failed its health check");
    }

    let served = async {
        match &args.socket {
            Some(path) => serve_socket(Arc::clone(&executor), path).await,
            None => {
                bridge::serve_stream(
                    Arc::clone(&executor),
                    tokio::io::stdin(),
                    tokio::io::stdout(),
                )
                .await
            }
        }
    };

    let result = tokio::select! {
        result = served => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    if let Some(path) = &args.socket {
        let _ = tokio::fs::remove_file(path).await;
    }
    if args.keep_sessions {
        for session in executor.registry().sessions() {
            info!(
                session = %session.id,
                dir = %session.dir.display(),
                created_at = %session.created_at,
                last_used = %session.last_used,
                "Keeping session directory"
            );
        }
    } else {
        executor.registry().purge().await;
    }

    result
}

#[cfg(unix)]
async fn serve_socket(executor: Arc<Executor>, path: &std::path::Path) -> Result<()> {
    bridge::serve_unix(executor, path).await
}

#[cfg(not(unix))]
async fn serve_socket(_executor: Arc<Executor>, _path: &std::path::Path) -> Result<()> {
    Err(LabexecError::Config(
        "Unix domain sockets are not supported on this platform".to_string(),
    ))
}

/// Interactive terminal bound to one session
pub async fn terminal(args: TerminalArgs, config: LabexecConfig) -> Result<()> {
    let executor = Executor::with_defaults(with_timeout(config.executor, args.timeout));
    let guard = if args.allow_edits {
        None
    } else {
        Some(CommandGuard::new()?)
    };

    let ephemeral = args.session.is_none();
    let session = executor.registry().resolve(args.session.as_deref()).await?;
    let session_id = session.id().to_string();

    println!("Terminal ready. Type commands to execute, 'exit' to quit.");
    println!("Session {} at {}", session_id, session.dir().display());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} $ ", session_id);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "exit" || command == "quit" {
            break;
        }

        match guard.as_ref().map(|g| g.check(command)) {
            Some(Verdict::Help(text)) => println!("{}", text),
            Some(Verdict::Blocked(message)) => eprintln!("{}{}", ERROR_PREFIX, message),
            Some(Verdict::Run) | None => {
                // Re-read local files so edits made elsewhere are picked up
                let request = CommandRequest {
                    command: command.to_string(),
                    cwd: None,
                    files: load_files(&args.files).await?,
                    session_id: Some(session_id.clone()),
                };
                let response = executor.handle(&request).await;
                render::print(&render::render(&response));
            }
        }
    }

    if ephemeral {
        executor.registry().remove(&session_id).await?;
    }

    Ok(())
}

/// Remove leftover session directories
pub async fn clean(args: CleanArgs, config: LabexecConfig, format: OutputFormat) -> Result<()> {
    let root = config.executor.scratch_root();
    let namespace = &config.executor.namespace;

    let count = if args.dry_run {
        let dirs = scratch_dirs(&root, namespace).await?;
        if matches!(format, OutputFormat::Text) {
            for dir in &dirs {
                println!("{}", dir.display());
            }
        }
        dirs.len()
    } else {
        sweep_scratch_root(&root, namespace).await?
    };

    match format {
        OutputFormat::Text => {
            let verb = if args.dry_run { "Would remove" } else { "Removed" };
            println!("{} {} session directories under {}", verb, count, root.display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "root": root,
                    "dry_run": args.dry_run,
                    "count": count,
                })
            );
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = LabexecConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| LabexecError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Run a command against a session directory");
    println!("  labexec exec --session s1 --file main.c \"gcc main.c && ./a.out\"");
    println!();
    println!("  # Serve the editor front-end over stdin/stdout");
    println!("  labexec serve");
    println!();
    println!("  # Remove leftover session directories");
    println!("  labexec clean");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: LabexecConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| LabexecError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn with_timeout(mut config: ExecutorConfig, timeout: Option<u64>) -> ExecutorConfig {
    if let Some(seconds) = timeout {
        config.timeout_seconds = seconds;
    }
    config
}

async fn load_files(files: &[FileArg]) -> Result<Vec<VirtualFile>> {
    let mut loaded = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(&file.local_path)
            .await
            .with_context(|| format!("Failed to read {}", file.local_path.display()))?;
        loaded.push(VirtualFile::file(file.name.clone(), content));
    }
    Ok(loaded)
}

fn output_response(response: &Response, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            render::print(&render::render(response));
            // Exit with the command's exit code
            match response {
                Response::Completed(result) if !result.success => {
                    std::process::exit(result.exit_code.unwrap_or(1));
                }
                Response::Failed { .. } => std::process::exit(1),
                _ => {}
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(response)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_with_timeout() {
        let config = with_timeout(ExecutorConfig::default(), Some(3));
        assert_eq!(config.timeout_seconds, 3);
        let config = with_timeout(ExecutorConfig::default(), None);
        assert_eq!(config.timeout_seconds, 30);
    }

    #[tokio::test]
    async fn test_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("draft.c");
        std::fs::write(&local, "int main(){}").unwrap();

        let files = load_files(&[FileArg {
            name: "src/main.c".to_string(),
            local_path: local,
        }])
        .await
        .unwrap();
        assert_eq!(files, vec![VirtualFile::file("src/main.c", "int main(){}")]);

        let err = load_files(&[FileArg {
            name: "x".to_string(),
            local_path: PathBuf::from("/nonexistent/draft.c"),
        }])
        .await
        .unwrap_err();
        assert!(matches!(err, LabexecError::Other(_)));
    }
}

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use labexec::cli::args::{Cli, Commands};
use labexec::cli::commands;
use labexec::cli::render::ERROR_PREFIX;
use labexec::config::load_config;
use labexec::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global_opts.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, infrastructure = e.is_infrastructure(), "labexec failed");
            eprintln!("{}{}", ERROR_PREFIX, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.global_opts.config.as_deref())?;
    let format = cli.global_opts.format;
    debug!(executor = ?config.executor, "Configuration loaded");

    match cli.command {
        Commands::Exec(args) => commands::exec(args, config, format).await,
        Commands::Serve(args) => commands::serve(args, config).await,
        Commands::Terminal(args) => commands::terminal(args, config).await,
        Commands::Clean(args) => commands::clean(args, config, format).await,
        Commands::Init(args) => commands::init(args).await,
        Commands::Config(args) => commands::config(args, config).await,
    }
}

/// `-v` raises verbosity one step at a time; `RUST_LOG` wins when set.
fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = ["warn", "info", "debug"]
        .get(usize::from(verbosity))
        .copied()
        .unwrap_or("trace");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries JSON responses in `serve`, so logs stay on stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

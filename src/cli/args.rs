use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "labexec")]
#[clap(version, about = "Per-session sandboxed command executor")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "LABEXEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a single command in a session directory
    Exec(ExecArgs),

    /// Serve JSON requests line by line (stdin/stdout or a Unix socket)
    Serve(ServeArgs),

    /// Interactive terminal bound to one session
    Terminal(TerminalArgs),

    /// Remove leftover session directories from the scratch root
    Clean(CleanArgs),

    /// Initialize a new labexec configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command to execute
    pub command: String,

    /// Session id (auto-generated and removed afterwards if not provided)
    #[clap(long, short = 's')]
    pub session: Option<String>,

    /// Files to place in the session directory (NAME=LOCAL_PATH or LOCAL_PATH)
    #[clap(long = "file", short = 'f', value_parser = parse_file_arg)]
    pub files: Vec<FileArg>,

    /// Command timeout in seconds (overrides configuration)
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Keep the generated session directory after the command finishes
    #[clap(long)]
    pub keep: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen on this Unix domain socket instead of stdin/stdout
    #[clap(long)]
    pub socket: Option<PathBuf>,

    /// Evict sessions idle for this long (e.g., "30m", "2h")
    #[clap(long)]
    pub idle_ttl: Option<String>,

    /// Leave session directories in place on shutdown
    #[clap(long)]
    pub keep_sessions: bool,
}

#[derive(Args, Debug)]
pub struct TerminalArgs {
    /// Session id (auto-generated if not provided)
    #[clap(long, short = 's')]
    pub session: Option<String>,

    /// Files to place in the session directory (NAME=LOCAL_PATH or LOCAL_PATH)
    #[clap(long = "file", short = 'f', value_parser = parse_file_arg)]
    pub files: Vec<FileArg>,

    /// Command timeout in seconds (overrides configuration)
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Disable the file-edit command filter
    #[clap(long)]
    pub allow_edits: bool,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Only show how many directories would be removed
    #[clap(long)]
    pub dry_run: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

// ============================================================================
// Common Types
// ============================================================================

/// A local file sent as a virtual file under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArg {
    pub name: String,
    pub local_path: PathBuf,
}

fn parse_file_arg(s: &str) -> Result<FileArg, String> {
    // Format: name=path or path
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(FileArg {
            name: name.to_string(),
            local_path: PathBuf::from(path),
        }),
        Some(_) => Err("File format: NAME=LOCAL_PATH or LOCAL_PATH".to_string()),
        None if !s.is_empty() => Ok(FileArg {
            name: s.to_string(),
            local_path: PathBuf::from(s),
        }),
        None => Err("File path must not be empty".to_string()),
    }
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_arg() {
        assert_eq!(
            parse_file_arg("src/main.c=/tmp/draft.c").unwrap(),
            FileArg {
                name: "src/main.c".to_string(),
                local_path: PathBuf::from("/tmp/draft.c"),
            }
        );
        assert_eq!(parse_file_arg("main.py").unwrap().name, "main.py");
        assert!(parse_file_arg("=x").is_err());
        assert!(parse_file_arg("x=").is_err());
        assert!(parse_file_arg("").is_err());
    }

    #[test]
    fn test_cli_parses_exec() {
        let cli = Cli::parse_from([
            "labexec",
            "exec",
            "cat a.txt",
            "--session",
            "s2",
            "-f",
            "a.txt=./a.txt",
            "--format",
            "json",
        ]);
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.command, "cat a.txt");
                assert_eq!(args.session.as_deref(), Some("s2"));
                assert_eq!(args.files.len(), 1);
                assert!(!args.keep);
            }
            other => panic!("Expected exec, got {other:?}"),
        }
        assert!(matches!(cli.global_opts.format, OutputFormat::Json));
    }

    #[test]
    fn test_timeout_must_be_positive() {
        for sub in ["exec", "terminal"] {
            let mut argv = vec!["labexec", sub];
            if sub == "exec" {
                argv.push("ls");
            }
            let zero: Vec<&str> = argv.iter().copied().chain(["--timeout", "0"]).collect();
            assert!(Cli::try_parse_from(zero).is_err(), "{sub} accepted --timeout 0");

            let one: Vec<&str> = argv.iter().copied().chain(["--timeout", "1"]).collect();
            assert!(Cli::try_parse_from(one).is_ok());
        }
    }
}

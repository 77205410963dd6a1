//! bugpack CLI: safe-to-share crash bundles for humans and LLMs.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Standardized exit codes for CLI commands.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const BUNDLE_NOT_FOUND: i32 = 2;
    pub const VALIDATION_FAILED: i32 = 3;
    pub const SECRETS_FOUND: i32 = 4;
    pub const TIMEOUT: i32 = 5;
}

#[derive(Parser)]
#[command(
    name = "bugpack",
    version,
    about = "Safe-to-share crash bundles for humans and LLMs",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and capture crash information into a bundle.
    Run {
        /// Command to execute (e.g. `bugpack run -- pytest tests/`).
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
        /// Output bundle path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Timeout in seconds (default: from config or 300).
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Files to attach to the bundle.
        #[arg(short, long)]
        attach: Vec<PathBuf>,
        /// Skip redaction.
        #[arg(long)]
        no_redact: bool,
    },
    /// Inspect a bundle: summary, integrity, validation, attachments.
    Inspect {
        /// Path to the bundle.
        bundle: PathBuf,
        /// Print one attachment's content instead of the summary.
        #[arg(long)]
        attachment: Option<String>,
    },
    /// Render a bundle as markdown or JSON.
    Render {
        /// Path to the bundle.
        bundle: PathBuf,
        /// Output format: md or json.
        #[arg(short, long, default_value = "md")]
        format: String,
        /// Token budget for markdown rendering.
        #[arg(long, default_value_t = bugpack_core::render::DEFAULT_MAX_TOKENS)]
        max_tokens: usize,
    },
    /// Verify a written bundle contains no residual high-priority secrets.
    Audit {
        /// Path to the bundle.
        bundle: PathBuf,
    },
    /// Redact a file (or stdin) and report what was found.
    Scan {
        /// File to scan; reads stdin when omitted.
        file: Option<PathBuf>,
        /// Exit non-zero when high-priority secrets survive redaction.
        #[arg(long)]
        verify: bool,
    },
    /// Show the effective configuration.
    Config {
        /// Print the config file path instead of the contents.
        #[arg(long)]
        path: bool,
    },
}

fn run_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            command,
            output,
            timeout,
            attach,
            no_redact,
        } => commands::run::execute(&command, output, timeout, &attach, no_redact),
        Commands::Inspect { bundle, attachment } => {
            commands::inspect::execute(&bundle, attachment.as_deref())
        }
        Commands::Render {
            bundle,
            format,
            max_tokens,
        } => commands::render::execute(&bundle, &format, max_tokens),
        Commands::Audit { bundle } => commands::audit::execute(&bundle),
        Commands::Scan { file, verify } => commands::scan::execute(file.as_deref(), verify),
        Commands::Config { path } => commands::config_cmd::execute(path),
    }
}

fn main() {
    let filter = EnvFilter::try_from_env("BUGPACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run_cli(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            commands::exit_code_for_error(&e)
        }
    };

    std::process::exit(code);
}

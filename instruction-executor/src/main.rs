//! Stdio JSON-RPC server for stepwise instruction execution.
//!
//! `serve` (the default) speaks the protocol on stdin/stdout. `classify` and
//! `validate` are offline helpers for checking the vocabulary and the step
//! source without starting the server.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use instruction_executor::core::classifier::{TextSource, classify_from};
use instruction_executor::exit_codes;
use instruction_executor::io::config::{ServerConfig, load_config};
use instruction_executor::io::handoff::HandoffRunner;
use instruction_executor::io::relay::{Relay, RelayClient};
use instruction_executor::io::step_source::StepSource;
use instruction_executor::logging;
use instruction_executor::server::{Dispatcher, ServerSettings};

#[derive(Parser)]
#[command(
    name = "instruction-executor",
    version,
    about = "Stateful JSON-RPC server that walks an instruction list step by step"
)]
struct Cli {
    /// TOML config file. Missing file means defaults.
    #[arg(long, global = true, default_value = "instruction-executor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the protocol on stdin/stdout (default).
    Serve(ServeArgs),
    /// Print the classification of TEXT as JSON.
    Classify {
        text: String,
        /// Treat TEXT as extracted from a nested payload (enables the question tier).
        #[arg(long)]
        extracted: bool,
    },
    /// Check that the step source exists and is well formed.
    Validate {
        /// Step source path. Defaults to the configured or discovered one.
        #[arg(long)]
        instructions: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Step source path (overrides config).
    #[arg(long)]
    instructions: Option<PathBuf>,
    /// Diagnostic log path (overrides config).
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Step ceiling for full runs (overrides config).
    #[arg(long)]
    max_steps: Option<usize>,
    /// Surface interruptions to the relay instead of answering them.
    #[arg(long)]
    no_auto_confirm: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("resolve working directory")?;
    match cli.command {
        None => cmd_serve(&cli.config, &cwd, ServeArgs::default()),
        Some(Command::Serve(args)) => cmd_serve(&cli.config, &cwd, args),
        Some(Command::Classify { text, extracted }) => cmd_classify(&text, extracted),
        Some(Command::Validate { instructions }) => {
            cmd_validate(&cli.config, &cwd, instructions.as_deref())
        }
    }
}

fn cmd_serve(config_path: &Path, cwd: &Path, args: ServeArgs) -> Result<i32> {
    let mut cfg = load_config(&cwd.join(config_path))?;
    apply_overrides(&mut cfg, args);
    cfg.validate().context("invalid configuration")?;

    let settings = ServerSettings::from_config(&cfg, cwd);
    let relay = RelayClient::from_config(cfg.relay.as_ref());
    info!(
        source = %settings.source.path().display(),
        session = relay.session_id(),
        "serving on stdio"
    );

    let mut dispatcher = Dispatcher::new(settings, HandoffRunner, relay);
    let stdin = io::stdin();
    let stdout = io::stdout();
    dispatcher.serve(BufReader::new(stdin.lock()), stdout.lock())?;
    Ok(exit_codes::OK)
}

fn apply_overrides(cfg: &mut ServerConfig, args: ServeArgs) {
    if let Some(path) = args.instructions {
        cfg.instructions_path = Some(path);
    }
    if let Some(path) = args.log_file {
        cfg.log_path = path;
    }
    if let Some(max_steps) = args.max_steps {
        cfg.max_steps = max_steps;
    }
    if args.no_auto_confirm {
        cfg.auto_confirm.enabled = false;
    }
}

fn cmd_classify(text: &str, extracted: bool) -> Result<i32> {
    let source = if extracted {
        TextSource::Extracted
    } else {
        TextSource::RawLine
    };
    let decision = classify_from(text, source);
    println!(
        "{}",
        serde_json::to_string(&decision).context("serialize decision")?
    );
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: &Path, cwd: &Path, explicit: Option<&Path>) -> Result<i32> {
    let cfg = load_config(&cwd.join(config_path))?;
    let explicit = explicit.or(cfg.instructions_path.as_deref());
    let source = StepSource::resolve(explicit, cwd);
    match source.load() {
        Ok(Some(doc)) => {
            println!("{}: {} steps", source.path().display(), doc.steps.len());
            Ok(exit_codes::OK)
        }
        Ok(None) => {
            eprintln!("{}: not found", source.path().display());
            Ok(exit_codes::NO_SOURCE)
        }
        Err(err) => {
            eprintln!("{:#}", err);
            Ok(exit_codes::MALFORMED)
        }
    }
}

//! paperlink - Consolidate scraped paper metadata against bibliographic APIs
//!
//! Runs the three-phase consolidation (id harvest, batch enrich, full enrich)
//! over a JSON paper list, checkpointing as it goes so interrupted runs can
//! be resumed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use paperlink_consolidate::{Config, RunOutcome};
use paperlink_core::ShutdownFlag;

mod cmd;
mod config;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "paperlink")]
#[command(about = "Consolidate paper metadata with provenance and resumable checkpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./paperlink.toml or ~/.config/paperlink/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Checkpoint root directory
    #[arg(long, global = true)]
    checkpoint_dir: Option<PathBuf>,

    /// Concurrent batch workers per phase
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Seconds between interval checkpoints
    #[arg(long, global = true)]
    checkpoint_interval: Option<u64>,

    /// Maximum retry attempts for transient failures (all sources)
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new consolidation session over an input file
    Run(cmd::run::RunArgs),
    /// Continue an interrupted or stopped session
    Resume(cmd::run::ResumeArgs),
    /// List or clean checkpoint sessions
    Sessions(cmd::sessions::SessionsArgs),
    /// Show current configuration
    Config,
}

impl Cli {
    /// File configuration with global flag overrides applied.
    fn effective_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::from_file(path)?,
            None => config::load()?,
        };
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.checkpoint_interval {
            config.checkpoint_interval_secs = secs;
        }
        if let Some(retries) = self.max_retries {
            config.sources.openalex.max_retries = retries;
            config.sources.semantic_scholar.max_retries = retries;
        }
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let progress = Arc::new(paperlink_core::ProgressContext::new());

    // TTY: warnings only unless --debug, progress bars show activity.
    // Otherwise info, since logs are the only progress indicator.
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    paperlink_core::init_logging(quiet, cli.debug, multi);

    let config = cli.effective_config()?;

    let shutdown = ShutdownFlag::new();
    shutdown.register_signals()?;

    let outcome = match cli.command {
        Command::Run(args) => cmd::run::run(args, config, &progress, &shutdown)?,
        Command::Resume(args) => cmd::run::resume(args, config, &progress, &shutdown)?,
        Command::Sessions(args) => {
            cmd::sessions::run(args, &config)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Config => {
            cmd::show_config(&config);
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(match outcome {
        RunOutcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
        RunOutcome::Completed | RunOutcome::Stopped(_) => ExitCode::SUCCESS,
    })
}

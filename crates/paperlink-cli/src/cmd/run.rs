//! `paperlink run` / `paperlink resume`

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use paperlink_consolidate::{Config, PhaseOrchestrator, RunOutcome, RunReport};
use paperlink_core::{SharedProgress, ShutdownFlag};
use paperlink_sources::SourceKind;
use paperlink_store::{Phase, SessionRef};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input JSON file (array of paper records)
    pub input: PathBuf,

    /// Output file (default: <input>.consolidated.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop cleanly after this phase (id_harvest, batch_enrich, full_enrich)
    #[arg(long)]
    pub stop_after: Option<Phase>,

    /// Source for title matching and full records
    #[arg(long)]
    pub primary: Option<SourceKind>,

    /// Source for batch lookup by external id
    #[arg(long)]
    pub secondary: Option<SourceKind>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Session id (see `paperlink sessions list`)
    #[arg(conflicts_with = "input", required_unless_present = "input")]
    pub session: Option<String>,

    /// Resume the latest resumable session for this input file
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output file (default: the session's output file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop cleanly after this phase
    #[arg(long)]
    pub stop_after: Option<Phase>,
}

pub fn run(args: RunArgs, mut config: Config, progress: &SharedProgress, shutdown: &ShutdownFlag) -> Result<RunOutcome> {
    if !args.input.exists() {
        bail!("input file not found: {}", args.input.display());
    }
    if args.output.is_some() {
        config.output_file = args.output;
    }
    if args.stop_after.is_some() {
        config.stop_after = args.stop_after;
    }
    if let Some(kind) = args.primary {
        config.primary = kind;
    }
    if let Some(kind) = args.secondary {
        config.secondary = kind;
    }

    let report = orchestrator(config, progress, shutdown)?.run(&args.input)?;
    Ok(finish(&report))
}

pub fn resume(args: ResumeArgs, mut config: Config, progress: &SharedProgress, shutdown: &ShutdownFlag) -> Result<RunOutcome> {
    if args.output.is_some() {
        config.output_file = args.output;
    }
    if args.stop_after.is_some() {
        config.stop_after = args.stop_after;
    }
    let reference = match (args.session, args.input) {
        (Some(id), _) => SessionRef::Id(id),
        (None, Some(input)) => SessionRef::InputFile(input),
        (None, None) => bail!("give a session id or --input"),
    };

    let report = orchestrator(config, progress, shutdown)?.resume(&reference)?;
    Ok(finish(&report))
}

fn orchestrator(config: Config, progress: &SharedProgress, shutdown: &ShutdownFlag) -> Result<PhaseOrchestrator> {
    Ok(PhaseOrchestrator::new(config)?
        .with_progress(progress.clone())
        .with_shutdown(shutdown.clone()))
}

/// Print the summary tables and tell the user how to continue.
fn finish(report: &RunReport) -> RunOutcome {
    eprintln!("\n{report}");
    match report.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Stopped(_) | RunOutcome::Interrupted => {
            eprintln!("Resume with: paperlink resume {}", report.session_id);
        }
    }
    report.outcome
}

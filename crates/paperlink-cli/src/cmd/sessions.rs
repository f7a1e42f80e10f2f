//! `paperlink sessions` - list and clean checkpoint sessions

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use paperlink_consolidate::{Config, clean_sessions, list_resumable_sessions, list_sessions};
use paperlink_store::{CleanFilter, SessionStatus, SessionSummary};

#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub action: SessionsAction,
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List sessions under the checkpoint directory
    List {
        /// Only sessions that can still be resumed
        #[arg(long)]
        resumable: bool,

        /// Only sessions for this input file (implies --resumable)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Remove sessions (dry-run unless --yes)
    Clean {
        /// Sessions that finished all phases
        #[arg(long)]
        completed: bool,

        /// Sessions whose last run ended in an error
        #[arg(long)]
        failed: bool,

        /// Sessions not checkpointed for more than this many days
        #[arg(long, value_name = "DAYS")]
        older_than: Option<u32>,

        /// One session by id
        #[arg(long)]
        id: Option<String>,

        /// Every session
        #[arg(long)]
        all: bool,

        /// Actually delete (otherwise dry-run)
        #[arg(short, long)]
        yes: bool,
    },
}

pub fn run(args: SessionsArgs, config: &Config) -> Result<()> {
    match args.action {
        SessionsAction::List { resumable, input } => list(config, resumable, input),
        SessionsAction::Clean {
            completed,
            failed,
            older_than,
            id,
            all,
            yes,
        } => {
            let filter = clean_filter(completed, failed, older_than, id, all)?;
            clean(config, &filter, yes)
        }
    }
}

/// Exactly one filter flag must be given.
fn clean_filter(
    completed: bool,
    failed: bool,
    older_than: Option<u32>,
    id: Option<String>,
    all: bool,
) -> Result<CleanFilter> {
    let mut filters = Vec::new();
    if completed {
        filters.push(CleanFilter::Completed);
    }
    if failed {
        filters.push(CleanFilter::Failed);
    }
    if let Some(days) = older_than {
        filters.push(CleanFilter::OlderThanDays(days));
    }
    if let Some(id) = id {
        filters.push(CleanFilter::Id(id));
    }
    if all {
        filters.push(CleanFilter::All);
    }
    match filters.len() {
        1 => Ok(filters.remove(0)),
        0 => bail!("choose what to clean: --completed, --failed, --older-than DAYS, --id ID or --all"),
        _ => bail!("give only one of --completed, --failed, --older-than, --id, --all"),
    }
}

fn list(config: &Config, resumable: bool, input: Option<PathBuf>) -> Result<()> {
    let sessions = if resumable || input.is_some() {
        list_resumable_sessions(&config.checkpoint_dir, input.as_deref())?
    } else {
        list_sessions(&config.checkpoint_dir)?
    };

    if sessions.is_empty() {
        eprintln!("No sessions in {}.", config.checkpoint_dir.display());
        return Ok(());
    }

    eprintln!("\n{}", sessions_table(&sessions));
    eprintln!("{} sessions total", sessions.len());
    Ok(())
}

fn clean(config: &Config, filter: &CleanFilter, yes: bool) -> Result<()> {
    let matching = clean_sessions(&config.checkpoint_dir, filter, !yes)?;
    if matching.is_empty() {
        eprintln!("No matching sessions.");
        return Ok(());
    }

    if yes {
        eprintln!("Removed {} sessions:", matching.len());
        for s in &matching {
            eprintln!("  {}", s.session_id);
        }
    } else {
        eprintln!("\nWould remove {} sessions:", matching.len());
        eprintln!("{}", sessions_table(&matching));
        eprintln!("Run with --yes to actually delete.");
    }
    Ok(())
}

fn sessions_table(sessions: &[SessionSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            ["Session", "Input", "Phase", "Status", "Papers", "Processed", "IDs", "Last checkpoint"]
                .into_iter()
                .map(|h| Cell::new(h).fg(Color::Cyan)),
        );

    for s in sessions {
        let status = match s.status {
            SessionStatus::Completed => Cell::new(s.status).fg(Color::Green),
            SessionStatus::Failed => Cell::new(s.status).fg(Color::Red),
            SessionStatus::InProgress => Cell::new(s.status).fg(Color::Yellow),
            SessionStatus::Pending => Cell::new(s.status).fg(Color::DarkGrey),
        };
        let last = s
            .last_checkpoint_time
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        table.add_row(vec![
            Cell::new(&s.session_id),
            Cell::new(s.input_file.display()),
            Cell::new(s.phase.label()),
            status,
            Cell::new(s.total_papers).set_alignment(CellAlignment::Right),
            Cell::new(s.processed_in_phase).set_alignment(CellAlignment::Right),
            Cell::new(s.identifiers_found).set_alignment(CellAlignment::Right),
            Cell::new(last),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_filter() {
        assert_eq!(clean_filter(true, false, None, None, false).unwrap(), CleanFilter::Completed);
        assert_eq!(
            clean_filter(false, false, Some(7), None, false).unwrap(),
            CleanFilter::OlderThanDays(7)
        );
        assert_eq!(
            clean_filter(false, false, None, Some("abc".into()), false).unwrap(),
            CleanFilter::Id("abc".into())
        );
        assert!(clean_filter(false, false, None, None, false).is_err());
        assert!(clean_filter(true, false, None, None, true).is_err());
    }
}

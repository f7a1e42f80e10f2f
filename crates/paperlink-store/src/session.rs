//! Checkpoint session metadata, per-source statistics and derived status

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{Phase, PhaseState};

/// Request and paper counts for one source across the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub api_calls: u64,
    pub papers_processed: u64,
    pub papers_enriched: u64,
}

/// Outcome counts for one phase.
///
/// `not_found` is a confirmed negative (no match, permanent error);
/// `unresolved` means retries were exhausted and the answer is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounters {
    /// Source queried by this phase
    pub source: String,
    pub processed: u64,
    pub enriched: u64,
    pub not_found: u64,
    pub unresolved: u64,
    /// Marked processed without a request (no external ID, already known)
    pub skipped: u64,
    pub failed_batches: u64,
    pub api_calls: u64,
}

impl PhaseCounters {
    pub fn absorb(&mut self, other: &PhaseCounters) {
        self.processed += other.processed;
        self.enriched += other.enriched;
        self.not_found += other.not_found;
        self.unresolved += other.unresolved;
        self.skipped += other.skipped;
        self.failed_batches += other.failed_batches;
        self.api_calls += other.api_calls;
    }
}

/// Contents of `session.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub input_file: PathBuf,
    /// Blake3 of the input file at session creation
    #[serde(default)]
    pub input_digest: Option<String>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub pid: u32,
    pub total_papers: usize,
    /// Copy of the state machine position, used when `phase_state.json` is unreadable
    pub phase: Phase,
    #[serde(default)]
    pub duplicates_collapsed: usize,
    #[serde(default)]
    pub source_stats: BTreeMap<String, SourceStats>,
    #[serde(default)]
    pub phase_stats: BTreeMap<Phase, PhaseCounters>,
    #[serde(default)]
    pub last_checkpoint_time: Option<DateTime<Utc>>,
}

impl SessionMeta {
    pub fn source_stats_mut(&mut self, source: &str) -> &mut SourceStats {
        self.source_stats.entry(source.to_string()).or_default()
    }

    pub fn phase_counters_mut(&mut self, phase: Phase, source: &str) -> &mut PhaseCounters {
        let counters = self.phase_stats.entry(phase).or_default();
        if counters.source.is_empty() {
            counters.source = source.to_string();
        }
        counters
    }
}

/// A resumable pipeline run: metadata plus phase state.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSession {
    pub meta: SessionMeta,
    pub state: PhaseState,
}

impl CheckpointSession {
    pub fn id(&self) -> &str {
        &self.meta.session_id
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_state(&self.state)
    }
}

/// Status derived from phase state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn from_state(state: &PhaseState) -> Self {
        if state.phase == Phase::Completed {
            Self::Completed
        } else if state.last_error.is_some() {
            Self::Failed
        } else if state.phase != Phase::IdHarvest
            || state.phase_completed
            || !state.processed_hashes.is_empty()
            || !state.identifiers_collected.is_empty()
        {
            Self::InProgress
        } else {
            Self::Pending
        }
    }

    pub fn is_resumable(self) -> bool {
        !matches!(self, Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub input_file: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_checkpoint_time: Option<DateTime<Utc>>,
    pub total_papers: usize,
    pub phase: Phase,
    pub status: SessionStatus,
    /// Papers processed in the current phase
    pub processed_in_phase: usize,
    pub identifiers_found: usize,
    pub dir: PathBuf,
}

/// A damaged or inconsistent piece of persisted state that was worked around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    pub file: String,
    pub detail: String,
}

impl IntegrityIssue {
    pub fn new(file: &str, detail: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.detail)
    }
}

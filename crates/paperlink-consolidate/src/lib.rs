//! paperlink-consolidate: Checkpointed three-phase metadata consolidation
//!
//! 1. **id_harvest**: fuzzy title match on the primary source, identifier
//!    fields only, to learn DOIs and arXiv ids
//! 2. **batch_enrich**: exact batch lookup by those ids on the secondary
//!    source, replacing one title search per paper with one call per batch
//! 3. **full_enrich**: abstract, citations, URLs and affiliations from the
//!    primary source for every paper
//!
//! Progress is checkpointed so an interrupted run resumes without repeating
//! finished work. Every value keeps its provenance.

pub mod config;
pub mod corpus;
pub mod input;
pub mod orchestrator;
pub mod report;

use std::path::Path;

use anyhow::Result;
use paperlink_store::{CheckpointManager, CleanFilter, SessionSummary};

pub use config::Config;
pub use corpus::Corpus;
pub use orchestrator::PhaseOrchestrator;
pub use report::{FieldCoverage, RunOutcome, RunReport};

/// Every session under `checkpoint_dir`, oldest first.
pub fn list_sessions(checkpoint_dir: &Path) -> Result<Vec<SessionSummary>> {
    CheckpointManager::new(checkpoint_dir)?.list_sessions()
}

/// Resumable sessions, optionally only those for `input_file`.
pub fn list_resumable_sessions(checkpoint_dir: &Path, input_file: Option<&Path>) -> Result<Vec<SessionSummary>> {
    CheckpointManager::new(checkpoint_dir)?.list_resumable_sessions(input_file)
}

/// Remove matching sessions (or only list them with `dry_run`).
pub fn clean_sessions(checkpoint_dir: &Path, filter: &CleanFilter, dry_run: bool) -> Result<Vec<SessionSummary>> {
    CheckpointManager::new(checkpoint_dir)?.clean_sessions(filter, dry_run)
}

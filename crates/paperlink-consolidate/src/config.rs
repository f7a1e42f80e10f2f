//! Runtime configuration for a consolidation run

use std::path::PathBuf;

use anyhow::{bail, ensure};
use paperlink_sources::{SourceClient, SourceKind, SourcesConfig};
use paperlink_store::Phase;
use serde::{Deserialize, Serialize};

/// Default seconds between interval checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root directory holding one subdirectory per session
    pub checkpoint_dir: PathBuf,
    pub checkpoint_interval_secs: u64,
    /// Concurrent batch workers per phase
    pub workers: usize,
    /// Source used for title matching (phases 1 and 3)
    pub primary: SourceKind,
    /// Source used for exact batch lookup (phase 2)
    pub secondary: SourceKind,
    /// Source names in descending priority for the abstract reducer.
    /// Empty means primary, then secondary.
    pub priority: Vec<String>,
    /// Per-phase batch size caps; each source's own limit still applies
    pub id_harvest_batch_size: Option<usize>,
    pub batch_enrich_batch_size: Option<usize>,
    pub full_enrich_batch_size: Option<usize>,
    /// Stop cleanly once this phase is checkpointed
    pub stop_after: Option<Phase>,
    /// Output path; `None` writes `<input>.consolidated.json` beside the input
    pub output_file: Option<PathBuf>,
    pub sources: SourcesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(".paperlink/checkpoints"),
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
            workers: DEFAULT_WORKERS,
            primary: SourceKind::OpenAlex,
            secondary: SourceKind::SemanticScholar,
            priority: Vec::new(),
            id_harvest_batch_size: None,
            batch_enrich_batch_size: None,
            full_enrich_batch_size: None,
            stop_after: None,
            output_file: None,
            sources: SourcesConfig::default(),
        }
    }
}

impl Config {
    /// Abstract-reducer priority with the default applied.
    pub fn source_priority(&self) -> Vec<String> {
        if self.priority.is_empty() {
            vec![self.primary.name().to_string(), self.secondary.name().to_string()]
        } else {
            self.priority.clone()
        }
    }

    /// Batch size cap for a phase.
    pub fn batch_cap(&self, phase: Phase) -> Option<usize> {
        match phase {
            Phase::IdHarvest => self.id_harvest_batch_size,
            Phase::BatchEnrich => self.batch_enrich_batch_size,
            Phase::FullEnrich => self.full_enrich_batch_size,
            Phase::Completed => None,
        }
    }

    /// Settings checks that need no source instance. Fatal before any phase.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.workers >= 1, "workers must be >= 1");
        for phase in Phase::RUNNABLE {
            ensure!(
                self.batch_cap(phase) != Some(0),
                "batch size for phase {phase} must be >= 1"
            );
        }
        if self.stop_after == Some(Phase::Completed) {
            bail!("stop_after must name a runnable phase (id_harvest, batch_enrich, full_enrich)");
        }
        for kind in SourceKind::ALL {
            kind.settings(&self.sources).validate(kind.name())?;
        }
        Ok(())
    }

    /// Capability checks against the sources actually in use.
    pub fn validate_sources(&self, primary: &dyn SourceClient, secondary: &dyn SourceClient) -> anyhow::Result<()> {
        ensure!(
            primary.capabilities().supports_title_search,
            "primary source {} does not support title search",
            primary.name()
        );
        ensure!(
            secondary.capabilities().supports_batch_lookup,
            "secondary source {} does not support batch lookup by external id",
            secondary.name()
        );
        Ok(())
    }
}

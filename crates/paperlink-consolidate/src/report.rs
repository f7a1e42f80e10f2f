//! Run summary: per-phase and per-source counts plus field coverage

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use paperlink_core::progress::{fmt_num, pct};
use paperlink_core::{EnrichmentMerger, PaperRecord};
use paperlink_store::{Phase, PhaseCounters, SourceStats};
use serde::Serialize;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Stopped on request after this phase was checkpointed
    Stopped(Phase),
    /// Shutdown signal; a final checkpoint was saved
    Interrupted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Stopped(phase) => write!(f, "stopped after {phase}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// How many papers have an effective value for each field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCoverage {
    pub total: usize,
    pub doi: usize,
    pub arxiv: usize,
    pub abstracts: usize,
    pub citations: usize,
    pub urls: usize,
    pub affiliations: usize,
}

impl FieldCoverage {
    pub fn compute(papers: &[PaperRecord], merger: &EnrichmentMerger) -> Self {
        let mut c = Self {
            total: papers.len(),
            ..Self::default()
        };
        for paper in papers {
            c.doi += usize::from(paper.external_ids.doi.is_some());
            c.arxiv += usize::from(paper.external_ids.arxiv_id.is_some());
            c.abstracts += usize::from(merger.effective_abstract(paper).is_some());
            c.citations += usize::from(merger.effective_citations(paper).is_some());
            c.urls += usize::from(!merger.effective_urls(paper).is_empty());
            c.affiliations += usize::from(!merger.effective_affiliations(paper).is_empty());
        }
        c
    }

    fn rows(&self) -> [(&'static str, usize); 6] {
        [
            ("DOI", self.doi),
            ("arXiv ID", self.arxiv),
            ("Abstract", self.abstracts),
            ("Citations", self.citations),
            ("URLs", self.urls),
            ("Affiliations", self.affiliations),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub outcome: RunOutcome,
    /// Phase the session is in after this run
    pub phase: Phase,
    pub total_papers: usize,
    pub duplicates_collapsed: usize,
    pub phase_stats: BTreeMap<Phase, PhaseCounters>,
    pub source_stats: BTreeMap<String, SourceStats>,
    pub coverage: FieldCoverage,
    pub output_file: Option<PathBuf>,
    /// Damaged checkpoint pieces worked around on resume
    pub integrity_issues: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    /// API calls made in `phase`, summed over every run of this session.
    pub fn api_calls(&self, phase: Phase) -> u64 {
        self.phase_stats.get(&phase).map_or(0, |c| c.api_calls)
    }

    pub fn counters(&self, phase: Phase) -> Option<&PhaseCounters> {
        self.phase_stats.get(&phase)
    }

    /// One row per phase: processed, enriched, not found, unresolved.
    pub fn phase_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(
                [
                    "Phase", "Source", "Processed", "Enriched", "Not found", "Unresolved", "Skipped",
                    "Failed batches", "API calls",
                ]
                .into_iter()
                .map(|h| Cell::new(h).fg(Color::Cyan)),
            );
        for (phase, c) in &self.phase_stats {
            let unresolved = if c.unresolved > 0 {
                Cell::new(c.unresolved).fg(Color::Yellow)
            } else {
                Cell::new(c.unresolved)
            };
            let failed = if c.failed_batches > 0 {
                Cell::new(c.failed_batches).fg(Color::Red)
            } else {
                Cell::new(c.failed_batches)
            };
            table.add_row(vec![
                Cell::new(phase.label()),
                Cell::new(&c.source),
                Cell::new(c.processed).set_alignment(CellAlignment::Right),
                Cell::new(c.enriched).set_alignment(CellAlignment::Right),
                Cell::new(c.not_found).set_alignment(CellAlignment::Right),
                unresolved.set_alignment(CellAlignment::Right),
                Cell::new(c.skipped).set_alignment(CellAlignment::Right),
                failed.set_alignment(CellAlignment::Right),
                Cell::new(c.api_calls).set_alignment(CellAlignment::Right),
            ]);
        }
        table
    }

    pub fn source_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Source").fg(Color::Cyan),
                Cell::new("API calls").fg(Color::Cyan),
                Cell::new("Processed").fg(Color::Cyan),
                Cell::new("Enriched").fg(Color::Cyan),
            ]);
        for (source, s) in &self.source_stats {
            table.add_row(vec![
                Cell::new(source),
                Cell::new(s.api_calls),
                Cell::new(s.papers_processed),
                Cell::new(s.papers_enriched),
            ]);
        }
        table
    }

    pub fn coverage_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Field").fg(Color::Cyan),
                Cell::new("Papers").fg(Color::Cyan),
                Cell::new("Coverage").fg(Color::Cyan),
            ]);
        let total = self.coverage.total;
        for (field, n) in self.coverage.rows() {
            table.add_row(vec![
                Cell::new(field),
                Cell::new(format!("{} / {}", fmt_num(n), fmt_num(total))),
                Cell::new(format!("{:.1}%", pct(n, total))).set_alignment(CellAlignment::Right),
            ]);
        }
        table
    }

    pub fn log(&self) {
        log::info!("=== Consolidation Summary ===");
        log::info!("Session: {} ({})", self.session_id, self.outcome);
        log::info!(
            "Papers: {} ({} duplicates collapsed)",
            fmt_num(self.total_papers),
            self.duplicates_collapsed
        );
        for (phase, c) in &self.phase_stats {
            log::info!(
                "{phase} [{}]: processed {}, enriched {}, not found {}, unresolved {}, skipped {}, failed batches {}, api calls {}",
                c.source,
                c.processed,
                c.enriched,
                c.not_found,
                c.unresolved,
                c.skipped,
                c.failed_batches,
                c.api_calls
            );
        }
        let unresolved: u64 = self.phase_stats.values().map(|c| c.unresolved).sum();
        if unresolved > 0 {
            log::warn!("{unresolved} paper lookups were attempted but unresolved after retries");
        }
        if self.integrity_issues > 0 {
            log::warn!(
                "checkpoint was loaded with {} integrity issue(s)",
                self.integrity_issues
            );
        }
        if let Some(path) = &self.output_file {
            log::info!("Output: {}", path.display());
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session {} {}", self.session_id, self.outcome)?;
        writeln!(f, "{}", self.phase_table())?;
        writeln!(f, "{}", self.source_table())?;
        write!(f, "{}", self.coverage_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperlink_core::{EnrichmentRecord, PaperIdentifiers};

    fn report() -> RunReport {
        let mut phase_stats = BTreeMap::new();
        phase_stats.insert(
            Phase::IdHarvest,
            PhaseCounters {
                source: "openalex".into(),
                processed: 10,
                enriched: 7,
                not_found: 3,
                api_calls: 2,
                ..Default::default()
            },
        );
        RunReport {
            session_id: "s1".into(),
            outcome: RunOutcome::Stopped(Phase::IdHarvest),
            phase: Phase::IdHarvest,
            total_papers: 10,
            duplicates_collapsed: 0,
            phase_stats,
            source_stats: BTreeMap::new(),
            coverage: FieldCoverage::default(),
            output_file: None,
            integrity_issues: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn coverage_uses_effective_values() {
        let merger = EnrichmentMerger::new(vec!["openalex".into()]);
        let mut a = PaperRecord::new("A", &["X"], "V", None);
        a.external_ids = PaperIdentifiers {
            doi: Some("10.1/a".into()),
            ..Default::default()
        };
        a.citations.push(EnrichmentRecord::sourced("openalex", 3));
        a.abstract_text = Some("original".into());
        let b = PaperRecord::new("B", &["Y"], "V", None);

        let c = FieldCoverage::compute(&[a, b], &merger);
        assert_eq!(c.total, 2);
        assert_eq!(c.doi, 1);
        assert_eq!(c.citations, 1);
        assert_eq!(c.abstracts, 1);
        assert_eq!(c.urls, 0);
    }

    #[test]
    fn tables_render() {
        let r = report();
        assert_eq!(r.api_calls(Phase::IdHarvest), 2);
        assert_eq!(r.api_calls(Phase::BatchEnrich), 0);
        let text = r.to_string();
        assert!(text.contains("1 id-harvest"));
        assert!(text.contains("stopped after id_harvest"));
        r.log();
    }
}

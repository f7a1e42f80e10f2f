//! Three-phase consolidation driver
//!
//! ```text
//! IdHarvest ──► BatchEnrich ──► FullEnrich ──► Completed
//!  primary       secondary       primary
//!  title match   exact lookup    full records
//! ```
//!
//! Within a phase, batches are claimed from a [`WorkQueue`] by a bounded
//! rayon pool. Workers only talk to the source; every result goes over a
//! channel to the calling thread, which is the only place phase state,
//! papers and checkpoints are touched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use paperlink_core::{
    EnrichmentMerger, PaperHash, PaperIdentifiers, ProgressContext, SharedProgress, ShutdownFlag,
    SourceError, SourceRecord, WorkQueue, system_clock,
};
use paperlink_sources::client::effective_batch_size;
use paperlink_sources::{FieldSet, SourceClient, TitleQuery};
use paperlink_store::{
    CheckpointManager, CheckpointSession, CleanFilter, LoadedSession, Phase, PhaseCounters,
    PhaseState, SessionMeta, SessionRef, SessionSummary, hash_file,
};

use crate::config::Config;
use crate::corpus::Corpus;
use crate::input::{default_output_path, read_papers, write_output};
use crate::report::{FieldCoverage, RunOutcome, RunReport};

/// Hashes listed when logging an aborted batch
const MAX_LOGGED_HASHES: usize = 8;

/// A slice of one phase's work, numbered in plan order.
#[derive(Debug)]
struct Batch<T> {
    index: usize,
    items: Vec<T>,
    hashes: Vec<PaperHash>,
}

impl<T> Batch<T> {
    /// Drop items already processed; `None` if nothing is left.
    fn retain_pending(self, state: &PhaseState) -> Option<Self> {
        let (items, hashes): (Vec<T>, Vec<PaperHash>) = self
            .items
            .into_iter()
            .zip(self.hashes)
            .filter(|(_, hash)| !state.is_processed(hash))
            .unzip();
        if items.is_empty() {
            None
        } else {
            Some(Self {
                index: self.index,
                items,
                hashes,
            })
        }
    }
}

fn make_batches<T>(items: Vec<T>, size: usize, hash_of: impl Fn(&T) -> PaperHash) -> Vec<Batch<T>> {
    let mut batches = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        let items: Vec<T> = iter.by_ref().take(size.max(1)).collect();
        let hashes = items.iter().map(&hash_of).collect();
        batches.push(Batch {
            index: batches.len(),
            items,
            hashes,
        });
    }
    batches
}

/// Phase 3 work item: a title to match, unless the primary id is already known.
#[derive(Debug, Clone)]
struct FullQuery {
    query: TitleQuery,
    known_id: Option<String>,
}

/// Drives a session through the phases, owning all mutation of its state.
pub struct PhaseOrchestrator {
    config: Config,
    manager: CheckpointManager,
    primary: Arc<dyn SourceClient>,
    secondary: Arc<dyn SourceClient>,
    merger: EnrichmentMerger,
    shutdown: ShutdownFlag,
    progress: SharedProgress,
}

impl PhaseOrchestrator {
    /// Build with the sources named in the config.
    pub fn new(config: Config) -> Result<Self> {
        let clock = system_clock();
        let primary = config.primary.build(&config.sources, Arc::clone(&clock));
        let secondary = config.secondary.build(&config.sources, clock);
        Self::with_sources(config, primary, secondary)
    }

    /// Build with explicit source clients. Configuration problems are fatal here,
    /// before any phase starts.
    pub fn with_sources(
        config: Config,
        primary: Arc<dyn SourceClient>,
        secondary: Arc<dyn SourceClient>,
    ) -> Result<Self> {
        config.validate()?;
        config.validate_sources(primary.as_ref(), secondary.as_ref())?;
        let manager = CheckpointManager::new(&config.checkpoint_dir)?;
        Ok(Self {
            merger: EnrichmentMerger::new(config.source_priority()),
            config,
            manager,
            primary,
            secondary,
            shutdown: ShutdownFlag::new(),
            progress: Arc::new(ProgressContext::hidden()),
        })
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn manager(&self) -> &CheckpointManager {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a new session over `input` and run it.
    pub fn run(&self, input: &Path) -> Result<RunReport> {
        let start = Instant::now();
        let (corpus, duplicates) = Corpus::from_papers(read_papers(input)?);
        let mut session = self.manager.create_session(input, corpus.len())?;
        session.meta.duplicates_collapsed = duplicates;
        session.meta.output_file = Some(
            self.config
                .output_file
                .clone()
                .unwrap_or_else(|| default_output_path(&session.meta.input_file)),
        );
        self.manager.save_checkpoint(&mut session, corpus.papers())?;
        self.drive(session, corpus, 0, start)
    }

    /// Continue a saved session from its stored phase.
    pub fn resume(&self, reference: &SessionRef) -> Result<RunReport> {
        let start = Instant::now();
        let Some(loaded) = self.manager.load_checkpoint(reference)? else {
            bail!("no checkpoint found for {reference}");
        };
        let LoadedSession {
            mut session,
            papers,
            issues,
        } = loaded;
        log::info!(
            "resuming session {} at phase {} ({} processed in phase, {} identifiers collected)",
            session.id(),
            session.state.phase,
            session.state.processed_hashes.len(),
            session.state.identifiers_collected.len()
        );

        let input_file = session.meta.input_file.clone();
        let corpus = if input_file.exists() {
            self.warn_if_input_changed(&session.meta);
            let (corpus, from_input) = Corpus::restore(read_papers(&input_file)?, papers);
            if from_input > 0 {
                log::warn!(
                    "{from_input} paper(s) missing from the checkpoint were reloaded from {}",
                    input_file.display()
                );
            }
            corpus
        } else {
            if papers.is_empty() {
                bail!(
                    "input file {} is gone and the checkpoint holds no papers",
                    input_file.display()
                );
            }
            log::warn!(
                "input file {} is gone; continuing with {} checkpointed papers",
                input_file.display(),
                papers.len()
            );
            Corpus::from_papers(papers).0
        };

        session.meta.pid = std::process::id();
        session.meta.total_papers = corpus.len();
        session.state.last_error = None;
        if let Some(path) = &self.config.output_file {
            session.meta.output_file = Some(path.clone());
        } else if session.meta.output_file.is_none() {
            session.meta.output_file = Some(default_output_path(&input_file));
        }
        self.drive(session, corpus, issues.len(), start)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.manager.list_sessions()
    }

    pub fn clean_sessions(&self, filter: &CleanFilter, dry_run: bool) -> Result<Vec<SessionSummary>> {
        self.manager.clean_sessions(filter, dry_run)
    }

    fn warn_if_input_changed(&self, meta: &SessionMeta) {
        let Some(expected) = &meta.input_digest else { return };
        match hash_file(&meta.input_file) {
            Ok(actual) if actual.to_hex().as_str() != expected.as_str() => log::warn!(
                "input file {} changed since session {} was created; papers are matched by hash",
                meta.input_file.display(),
                meta.session_id
            ),
            Ok(_) => {}
            Err(e) => log::warn!("could not hash input file {}: {e:#}", meta.input_file.display()),
        }
    }

    /// Run the state machine until completion, `stop_after`, or shutdown.
    fn drive(
        &self,
        mut session: CheckpointSession,
        mut corpus: Corpus,
        integrity_issues: usize,
        start: Instant,
    ) -> Result<RunReport> {
        let output = session
            .meta
            .output_file
            .clone()
            .unwrap_or_else(|| default_output_path(&session.meta.input_file));

        let outcome = loop {
            if session.state.phase == Phase::Completed {
                break RunOutcome::Completed;
            }
            if session.state.phase_completed {
                let finished = session.state.phase;
                session.state.advance();
                log::info!("phase {finished} done, now at {}", session.state.phase);
                self.manager.save_checkpoint(&mut session, corpus.papers())?;
                continue;
            }
            if self.shutdown.is_requested() {
                break RunOutcome::Interrupted;
            }

            let phase = session.state.phase;
            let phase_start = Instant::now();
            log::info!("phase {phase} starting ({} papers)", corpus.len());
            let finished = match self.run_phase(phase, &mut session, &mut corpus) {
                Ok(finished) => finished,
                Err(e) => {
                    session.state.last_error = Some(format!("{phase}: {e:#}"));
                    if let Err(save_err) = self.manager.save_checkpoint(&mut session, corpus.papers()) {
                        log::error!("failed to save checkpoint after error: {save_err:#}");
                    }
                    return Err(e.context(format!("phase {phase} failed")));
                }
            };
            if !finished {
                break RunOutcome::Interrupted;
            }

            session.state.complete_phase();
            self.manager.save_checkpoint(&mut session, corpus.papers())?;
            write_output(&output, corpus.papers())?;
            log::info!(
                "phase {phase} finished in {:.1}s",
                phase_start.elapsed().as_secs_f64()
            );
            if self.config.stop_after == Some(phase) {
                log::info!("stopping after phase {phase} as requested");
                break RunOutcome::Stopped(phase);
            }
        };

        self.manager.save_checkpoint(&mut session, corpus.papers())?;
        write_output(&output, corpus.papers())?;
        if outcome == RunOutcome::Interrupted {
            log::warn!(
                "interrupted during phase {}; checkpoint saved, resume session {}",
                session.state.phase,
                session.id()
            );
        }

        let report = RunReport {
            session_id: session.id().to_string(),
            outcome,
            phase: session.state.phase,
            total_papers: corpus.len(),
            duplicates_collapsed: session.meta.duplicates_collapsed,
            phase_stats: session.meta.phase_stats.clone(),
            source_stats: session.meta.source_stats.clone(),
            coverage: FieldCoverage::compute(corpus.papers(), &self.merger),
            output_file: Some(output),
            integrity_issues,
            elapsed: start.elapsed(),
        };
        report.log();
        Ok(report)
    }

    fn source_for(&self, phase: Phase) -> &Arc<dyn SourceClient> {
        match phase {
            Phase::BatchEnrich => &self.secondary,
            _ => &self.primary,
        }
    }

    fn batch_size(&self, phase: Phase) -> usize {
        effective_batch_size(
            self.source_for(phase).capabilities().max_batch_size,
            self.config.batch_cap(phase),
        )
    }

    /// Returns false if the phase was cut short by shutdown.
    fn run_phase(&self, phase: Phase, session: &mut CheckpointSession, corpus: &mut Corpus) -> Result<bool> {
        session
            .meta
            .phase_counters_mut(phase, self.source_for(phase).name());
        let finished = match phase {
            Phase::IdHarvest => self.id_harvest(session, corpus)?,
            Phase::BatchEnrich => self.batch_enrich(session, corpus)?,
            Phase::FullEnrich => self.full_enrich(session, corpus)?,
            Phase::Completed => return Ok(true),
        };
        if finished {
            let source = self.source_for(phase).name();
            let left = leftover_counters(&session.state, phase, source, corpus.iter().map(|(hash, _)| hash));
            if left.skipped > 0 {
                record_counters(&mut session.meta, phase, source, &left);
            }
        }
        Ok(finished)
    }

    /// Phase 1: title match on the primary source, identifier fields only.
    fn id_harvest(&self, session: &mut CheckpointSession, corpus: &mut Corpus) -> Result<bool> {
        let phase = Phase::IdHarvest;
        let source = Arc::clone(&self.primary);

        let mut seeded = PhaseCounters::default();
        let mut queries = Vec::new();
        for (hash, paper) in corpus.iter() {
            if session.state.is_processed(hash) {
                continue;
            }
            if paper.external_ids.has_external_ids() {
                session.state.record_identifiers(hash, &paper.external_ids);
                session.state.mark_processed(hash.clone());
                seeded.processed += 1;
                seeded.skipped += 1;
            } else {
                queries.push(TitleQuery {
                    hash: hash.clone(),
                    title: paper.title.clone(),
                    year: paper.year,
                });
            }
        }
        if seeded.processed > 0 {
            log::info!(
                "{} papers already carry external ids, no title search needed",
                seeded.processed
            );
            record_counters(&mut session.meta, phase, source.name(), &seeded);
        }

        let size = self.batch_size(phase);
        let batches = make_batches(queries, size, |q| q.hash.clone());
        log::info!("phase {phase}: {} batches of <= {size} via {}", batches.len(), source.name());

        let worker_source = Arc::clone(&source);
        self.dispatch(
            phase,
            batches,
            session,
            corpus,
            true,
            move |queries: &[TitleQuery]| harvest_identifiers(worker_source.as_ref(), queries),
            |session, corpus, batch, result| {
                let found = match result {
                    Ok(found) => found,
                    Err(e) => return settle_failure(&mut session.state, phase, source.name(), batch, e),
                };
                let mut c = PhaseCounters::default();
                for hash in &batch.hashes {
                    match found.get(hash) {
                        Some(ids) => {
                            session.state.record_identifiers(hash, ids);
                            if let Some(paper) = corpus.get_mut(hash) {
                                paper.external_ids.merge_missing(ids);
                            }
                            c.enriched += 1;
                        }
                        None => c.not_found += 1,
                    }
                    session.state.mark_processed(hash.clone());
                    c.processed += 1;
                }
                c
            },
        )
    }

    /// Phase 2: exact batch lookup on the secondary source for papers with an external id.
    fn batch_enrich(&self, session: &mut CheckpointSession, corpus: &mut Corpus) -> Result<bool> {
        let phase = Phase::BatchEnrich;
        let source = Arc::clone(&self.secondary);

        let mut skipped = PhaseCounters::default();
        let mut eligible = Vec::new();
        for (hash, paper) in corpus.iter() {
            let mut ids = paper.external_ids.clone();
            if let Some(found) = session.state.identifiers(hash) {
                ids.merge_missing(found);
            }
            if ids.has_external_ids() {
                eligible.push((hash.clone(), ids));
            } else if session.state.mark_processed(hash.clone()) {
                skipped.processed += 1;
                skipped.skipped += 1;
            }
        }
        if skipped.processed > 0 {
            log::info!(
                "{} papers have no external id and cannot be batch-looked-up",
                skipped.processed
            );
            record_counters(&mut session.meta, phase, source.name(), &skipped);
        }

        // Planned over every eligible paper in corpus order, so batch indices
        // stay stable across resumes.
        let size = self.batch_size(phase);
        let plan = make_batches(eligible, size, |(hash, _)| hash.clone());
        session.state.set_total_batches(plan.len());
        let done = session.state.completed_batches();
        let total = plan.len();
        let batches: Vec<_> = plan
            .into_iter()
            .filter(|b| !done.contains(&b.index))
            .filter_map(|b| b.retain_pending(&session.state))
            .collect();
        log::info!(
            "phase {phase}: {} of {total} batches pending (<= {size} ids each) via {}",
            batches.len(),
            source.name()
        );

        let worker_source = Arc::clone(&source);
        self.dispatch(
            phase,
            batches,
            session,
            corpus,
            true,
            move |papers: &[(PaperHash, PaperIdentifiers)]| worker_source.fetch_by_external_ids(papers),
            |session, corpus, batch, result| {
                let c = match result {
                    Ok(records) => self.apply_records(session, corpus, source.name(), &batch.hashes, &records),
                    Err(e) => settle_failure(&mut session.state, phase, source.name(), batch, e),
                };
                if c.failed_batches == 0 {
                    session.state.mark_batch_done(batch.index);
                }
                c
            },
        )
    }

    /// Phase 3: full records from the primary source for every paper.
    /// Checkpointed at the phase boundary only.
    fn full_enrich(&self, session: &mut CheckpointSession, corpus: &mut Corpus) -> Result<bool> {
        let phase = Phase::FullEnrich;
        let source = Arc::clone(&self.primary);

        let mut reused = 0usize;
        let mut items = Vec::new();
        for (hash, paper) in corpus.iter() {
            if session.state.is_processed(hash) {
                continue;
            }
            let mut ids = paper.external_ids.clone();
            if let Some(found) = session.state.identifiers(hash) {
                ids.merge_missing(found);
            }
            let known_id = source.internal_id(&ids);
            reused += usize::from(known_id.is_some());
            items.push(FullQuery {
                query: TitleQuery {
                    hash: hash.clone(),
                    title: paper.title.clone(),
                    year: paper.year,
                },
                known_id,
            });
        }

        let size = self.batch_size(phase);
        let batches = make_batches(items, size, |item| item.query.hash.clone());
        log::info!(
            "phase {phase}: {} batches of <= {size} via {} ({reused} papers with a known id)",
            batches.len(),
            source.name()
        );

        let worker_source = Arc::clone(&source);
        self.dispatch(
            phase,
            batches,
            session,
            corpus,
            false,
            move |items: &[FullQuery]| full_records(worker_source.as_ref(), items),
            |session, corpus, batch, result| match result {
                Ok(records) => self.apply_records(session, corpus, source.name(), &batch.hashes, &records),
                Err(e) => settle_failure(&mut session.state, phase, source.name(), batch, e),
            },
        )
    }

    /// Fold fetched records into papers and mark the batch processed.
    fn apply_records(
        &self,
        session: &mut CheckpointSession,
        corpus: &mut Corpus,
        source: &str,
        hashes: &[PaperHash],
        records: &HashMap<PaperHash, SourceRecord>,
    ) -> PhaseCounters {
        let mut c = PhaseCounters::default();
        for hash in hashes {
            match records.get(hash) {
                Some(record) => {
                    if let Some(paper) = corpus.get_mut(hash) {
                        self.merger.apply_source_record(paper, source, record);
                    }
                    session.state.record_identifiers(hash, &record.identifiers);
                    c.enriched += 1;
                }
                None => c.not_found += 1,
            }
            session.state.mark_processed(hash.clone());
            c.processed += 1;
        }
        c
    }

    /// Fan batches out to a worker pool and fold results on this thread.
    ///
    /// `work` runs on pool threads and must not touch shared state; `apply`
    /// runs here, one result at a time. With `interval_checkpoints`, a
    /// checkpoint is saved after any batch once the configured interval has
    /// elapsed. Returns false if shutdown left batches unclaimed.
    #[allow(clippy::too_many_arguments)]
    fn dispatch<T, R, W, A>(
        &self,
        phase: Phase,
        batches: Vec<Batch<T>>,
        session: &mut CheckpointSession,
        corpus: &mut Corpus,
        interval_checkpoints: bool,
        work: W,
        mut apply: A,
    ) -> Result<bool>
    where
        T: Sync,
        R: Send,
        W: Fn(&[T]) -> Result<R, SourceError> + Sync,
        A: FnMut(&mut CheckpointSession, &mut Corpus, &Batch<T>, Result<R, SourceError>) -> PhaseCounters,
    {
        if batches.is_empty() {
            return Ok(true);
        }
        let source = self.source_for(phase);
        let queue = WorkQueue::new(batches);
        let workers = self.config.workers.min(queue.total()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{phase}-{i}"))
            .build()
            .context("failed to build worker pool")?;

        let pb = self.progress.phase_bar(phase.label(), queue.total());
        let abort = AtomicBool::new(false);
        let mut failure: Option<anyhow::Error> = None;
        let mut meter = CallMeter::start(source.api_calls());
        let (tx, rx) = mpsc::channel();

        pool.in_place_scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (queue, work, abort, shutdown) = (&queue, &work, &abort, &self.shutdown);
                scope.spawn(move |_| {
                    while !shutdown.is_requested() && !abort.load(Ordering::Relaxed) {
                        let Some(batch) = queue.next() else { break };
                        let result = work(&batch.items);
                        if tx.send((batch, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            // Single consumer: the only writer of session state and checkpoints
            for (batch, result) in rx {
                let spent = meter.lap(source.api_calls());
                if failure.is_some() {
                    // Result dropped, but its requests were still made
                    let drained = PhaseCounters {
                        api_calls: spent,
                        ..Default::default()
                    };
                    record_counters(&mut session.meta, phase, source.name(), &drained);
                    continue;
                }
                let mut counters = apply(&mut *session, &mut *corpus, batch, result);
                counters.api_calls = spent;
                record_counters(&mut session.meta, phase, source.name(), &counters);
                pb.inc(1);

                let due = interval_checkpoints
                    && CheckpointManager::should_checkpoint(
                        session.meta.last_checkpoint_time,
                        Utc::now(),
                        self.config.checkpoint_interval_secs,
                    );
                if due {
                    if let Err(e) = self.manager.save_checkpoint(session, corpus.papers()) {
                        abort.store(true, Ordering::Relaxed);
                        failure = Some(e);
                    }
                }
            }
        });
        pb.finish_and_clear();

        if let Some(e) = failure {
            return Err(e);
        }
        let unclaimed = queue.remaining();
        if self.shutdown.is_requested() && unclaimed > 0 {
            log::warn!("phase {phase}: shutdown requested, {unclaimed} batches not started");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Phase 1 worker: match titles, then fetch identifier fields for the matches.
fn harvest_identifiers(
    source: &dyn SourceClient,
    queries: &[TitleQuery],
) -> Result<HashMap<PaperHash, PaperIdentifiers>, SourceError> {
    let matches = source.find_candidates(queries)?;
    if matches.is_empty() {
        return Ok(HashMap::new());
    }
    let records = source.fetch_fields(&unique_ids(matches.values()), FieldSet::Identifiers)?;
    Ok(matches
        .into_iter()
        .filter_map(|(hash, id)| Some((hash, records.get(&id)?.identifiers.clone())))
        .filter(|(_, ids)| !ids.is_empty())
        .collect())
}

/// Phase 3 worker: reuse known ids, match the rest, fetch full records.
fn full_records(
    source: &dyn SourceClient,
    items: &[FullQuery],
) -> Result<HashMap<PaperHash, SourceRecord>, SourceError> {
    let mut ids: HashMap<PaperHash, String> = items
        .iter()
        .filter_map(|item| Some((item.query.hash.clone(), item.known_id.clone()?)))
        .collect();
    let searches: Vec<TitleQuery> = items
        .iter()
        .filter(|item| item.known_id.is_none())
        .map(|item| item.query.clone())
        .collect();
    if !searches.is_empty() {
        ids.extend(source.find_candidates(&searches)?);
    }
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let records = source.fetch_fields(&unique_ids(ids.values()), FieldSet::Full)?;
    Ok(ids
        .into_iter()
        .filter_map(|(hash, id)| Some((hash, records.get(&id)?.clone())))
        .collect())
}

/// Sorted, deduplicated ids so request bodies do not depend on map order.
fn unique_ids<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.cloned().collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Record a failed batch.
///
/// Exhausted retries and permanent errors still mark every paper processed so
/// the phase makes progress; they differ only in how they are counted.
/// Anything else aborts the batch without marking it.
fn settle_failure<T>(
    state: &mut PhaseState,
    phase: Phase,
    source: &str,
    batch: &Batch<T>,
    err: SourceError,
) -> PhaseCounters {
    let n = batch.hashes.len() as u64;
    let mut c = PhaseCounters::default();
    if err.is_retryable() {
        log::warn!(
            "{phase} batch {} ({source}): retries exhausted, {n} papers unresolved: {err}",
            batch.index
        );
        c.unresolved = n;
    } else if err.is_permanent() {
        log::debug!("{phase} batch {} ({source}): {err}", batch.index);
        c.not_found = n;
    } else {
        let shown: Vec<&str> = batch
            .hashes
            .iter()
            .take(MAX_LOGGED_HASHES)
            .map(PaperHash::short)
            .collect();
        log::error!(
            "{phase} batch {} ({source}) aborted: {err} [papers: {}{}]",
            batch.index,
            shown.join(", "),
            if batch.hashes.len() > MAX_LOGGED_HASHES { ", ..." } else { "" }
        );
        c.failed_batches = 1;
        return c;
    }
    for hash in &batch.hashes {
        state.mark_processed(hash.clone());
    }
    c.processed = n;
    c
}

/// Papers still unprocessed when a phase finishes. Only aborted batches leave
/// these behind, and advancing the phase drops them, so they count as skipped.
fn leftover_counters<'a>(
    state: &PhaseState,
    phase: Phase,
    source: &str,
    hashes: impl Iterator<Item = &'a PaperHash>,
) -> PhaseCounters {
    let left: Vec<&PaperHash> = hashes.filter(|hash| !state.is_processed(hash)).collect();
    let mut c = PhaseCounters::default();
    if left.is_empty() {
        return c;
    }
    let shown: Vec<&str> = left.iter().take(MAX_LOGGED_HASHES).map(|hash| hash.short()).collect();
    log::warn!(
        "phase {phase} ({source}): {} papers skipped after aborted batches [papers: {}{}]",
        left.len(),
        shown.join(", "),
        if left.len() > MAX_LOGGED_HASHES { ", ..." } else { "" }
    );
    c.skipped = left.len() as u64;
    c
}

/// Source call counter, read between consumed results.
struct CallMeter {
    last: u64,
}

impl CallMeter {
    fn start(calls: u64) -> Self {
        Self { last: calls }
    }

    /// Calls made since the previous lap.
    fn lap(&mut self, calls: u64) -> u64 {
        let spent = calls.saturating_sub(self.last);
        self.last = calls;
        spent
    }
}

fn record_counters(meta: &mut SessionMeta, phase: Phase, source: &str, c: &PhaseCounters) {
    meta.phase_counters_mut(phase, source).absorb(c);
    let stats = meta.source_stats_mut(source);
    stats.api_calls += c.api_calls;
    stats.papers_processed += c.processed;
    stats.papers_enriched += c.enriched;
}

/// Where a session writes its output, for callers that only have the metadata.
pub fn output_path(meta: &SessionMeta) -> PathBuf {
    meta.output_file
        .clone()
        .unwrap_or_else(|| default_output_path(&meta.input_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> PaperHash {
        PaperHash::from(s)
    }

    #[test]
    fn batches_are_numbered_in_order() {
        let batches = make_batches(vec!["a", "b", "c", "d", "e"], 2, |s| hash(s));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].index, 2);
        assert_eq!(batches[2].hashes, vec![hash("e")]);
        assert!(make_batches(Vec::<&str>::new(), 2, |s| hash(s)).is_empty());
    }

    #[test]
    fn retain_pending_drops_processed() {
        let mut state = PhaseState::new();
        state.mark_processed(hash("a"));
        let batch = make_batches(vec!["a", "b"], 5, |s| hash(s)).remove(0);
        let kept = batch.retain_pending(&state).unwrap();
        assert_eq!(kept.items, vec!["b"]);

        state.mark_processed(hash("b"));
        assert!(kept.retain_pending(&state).is_none());
    }

    #[test]
    fn failure_classification() {
        let batch = make_batches(vec!["a", "b"], 5, |s| hash(s)).remove(0);

        let mut state = PhaseState::new();
        let c = settle_failure(&mut state, Phase::IdHarvest, "x", &batch, SourceError::timeout("req"));
        assert_eq!((c.processed, c.unresolved, c.not_found), (2, 2, 0));
        assert!(state.is_processed(&hash("a")));

        let mut state = PhaseState::new();
        let c = settle_failure(&mut state, Phase::IdHarvest, "x", &batch, SourceError::not_found("gone"));
        assert_eq!((c.processed, c.unresolved, c.not_found), (2, 0, 2));

        let mut state = PhaseState::new();
        let c = settle_failure(
            &mut state,
            Phase::IdHarvest,
            "x",
            &batch,
            SourceError::Malformed("bad json".into()),
        );
        assert_eq!((c.processed, c.failed_batches), (0, 1));
        assert!(state.processed_hashes.is_empty());
    }

    #[test]
    fn counters_feed_phase_and_source_stats() {
        let mut meta = SessionMeta {
            session_id: "s".into(),
            input_file: PathBuf::from("in.json"),
            input_digest: None,
            output_file: None,
            created_at: Utc::now(),
            pid: 1,
            total_papers: 2,
            phase: Phase::IdHarvest,
            duplicates_collapsed: 0,
            source_stats: Default::default(),
            phase_stats: Default::default(),
            last_checkpoint_time: None,
        };
        let c = PhaseCounters {
            processed: 2,
            enriched: 1,
            api_calls: 3,
            ..Default::default()
        };
        record_counters(&mut meta, Phase::BatchEnrich, "semantic_scholar", &c);
        record_counters(&mut meta, Phase::BatchEnrich, "semantic_scholar", &c);
        assert_eq!(meta.phase_stats[&Phase::BatchEnrich].api_calls, 6);
        assert_eq!(meta.source_stats["semantic_scholar"].papers_enriched, 2);
        assert_eq!(output_path(&meta), PathBuf::from("in.consolidated.json"));
    }

    #[test]
    fn unprocessed_papers_counted_as_skipped() {
        let mut state = PhaseState::new();
        state.mark_processed(hash("a"));
        let hashes = [hash("a"), hash("b"), hash("c")];
        let c = leftover_counters(&state, Phase::IdHarvest, "openalex", hashes.iter());
        assert_eq!((c.skipped, c.processed), (2, 0));

        state.mark_processed(hash("b"));
        state.mark_processed(hash("c"));
        let c = leftover_counters(&state, Phase::IdHarvest, "openalex", hashes.iter());
        assert_eq!(c.skipped, 0);
    }

    #[test]
    fn call_meter_counts_each_call_once() {
        let mut meter = CallMeter::start(5);
        assert_eq!(meter.lap(5), 0);
        assert_eq!(meter.lap(9), 4);
        // Results consumed after a failed save still carry their calls
        assert_eq!(meter.lap(12), 3);
        assert_eq!(meter.lap(12), 0);
    }

    #[test]
    fn unique_ids_sorted() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique_ids(ids.iter()), vec!["a", "b"]);
    }
}

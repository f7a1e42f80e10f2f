//! Checkpoint manager: one directory per session
//!
//! Directory layout:
//! ```text
//! {root}/
//! └── {session-id}/
//!     ├── session.json       # SessionMeta (id, input file, pid, stats)
//!     ├── phase_state.json   # {checksum, payload: PhaseState}
//!     └── papers.json        # {totalPapers, uniquePaperIds, savedAt, checksum, papers}
//! ```
//!
//! Every file is replaced atomically (temp, fsync, rename). A save writes
//! papers first and `session.json` last, so a crash mid-save leaves papers
//! at most one batch ahead of the phase state. Replaying that batch is
//! harmless because enrichment merges are idempotent.
//!
//! Loading never fails on damaged content: checksum mismatches and
//! unreadable fields are reported as [`IntegrityIssue`]s, logged, and the
//! rest of the checkpoint is used.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use paperlink_core::{EnrichmentRecord, PaperRecord, merge_enrichments, paper_hash};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atomic::write_json_atomic;
use crate::hash::{digest_json, hash_bytes, hash_file, short_hash};
use crate::phase::{Phase, PhaseState, parse_or_report};
use crate::session::{CheckpointSession, IntegrityIssue, SessionMeta, SessionStatus, SessionSummary};

pub const SESSION_FILE: &str = "session.json";
pub const PHASE_STATE_FILE: &str = "phase_state.json";
pub const PAPERS_FILE: &str = "papers.json";

/// Distinguishes sessions created within the same nanosecond by one process.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How to find a session to resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRef {
    Id(String),
    /// Most recent resumable session for this input file
    InputFile(PathBuf),
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "session {id}"),
            Self::InputFile(path) => write!(f, "input {}", path.display()),
        }
    }
}

/// Which sessions `clean_sessions` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanFilter {
    Completed,
    Failed,
    OlderThanDays(u32),
    Id(String),
    All,
}

impl CleanFilter {
    pub fn matches(&self, summary: &SessionSummary, now: DateTime<Utc>) -> bool {
        match self {
            Self::Completed => summary.status == SessionStatus::Completed,
            Self::Failed => summary.status == SessionStatus::Failed,
            Self::OlderThanDays(days) => {
                let last = summary.last_checkpoint_time.unwrap_or(summary.created_at);
                now - last > chrono::Duration::days(i64::from(*days))
            }
            Self::Id(id) => &summary.session_id == id,
            Self::All => true,
        }
    }
}

/// A session restored from disk together with its saved papers.
#[derive(Debug)]
pub struct LoadedSession {
    pub session: CheckpointSession,
    pub papers: Vec<PaperRecord>,
    /// Damage that was worked around while loading
    pub issues: Vec<IntegrityIssue>,
}

/// `phase_state.json` on disk
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: Value,
}

/// `papers.json` on disk
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PapersFile {
    total_papers: usize,
    unique_paper_ids: usize,
    saved_at: DateTime<Utc>,
    checksum: String,
    papers: Value,
}

/// Durable, atomic persistence of pipeline progress.
pub struct CheckpointManager {
    root: PathBuf,
}

impl CheckpointManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create checkpoint dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Start a new session for `input_file` and persist its initial state.
    pub fn create_session(&self, input_file: &Path, total_papers: usize) -> Result<CheckpointSession> {
        let input_file = fs::canonicalize(input_file).unwrap_or_else(|_| input_file.to_path_buf());
        let now = Utc::now();
        let session_id = new_session_id(&input_file, now);

        let dir = self.session_dir(&session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session dir: {}", dir.display()))?;

        let state = PhaseState::new();
        let meta = SessionMeta {
            session_id,
            input_digest: hash_file(&input_file).ok().map(|h| h.to_hex().to_string()),
            input_file,
            output_file: None,
            created_at: now,
            pid: std::process::id(),
            total_papers,
            phase: state.phase,
            duplicates_collapsed: 0,
            source_stats: Default::default(),
            phase_stats: Default::default(),
            last_checkpoint_time: None,
        };
        let session = CheckpointSession { meta, state };

        self.write_phase_state(&dir, &session.state)?;
        write_json_atomic(&dir.join(SESSION_FILE), &session.meta)?;
        log::info!(
            "created session {} for {} ({total_papers} papers)",
            session.id(),
            session.meta.input_file.display()
        );
        Ok(session)
    }

    /// Persist the session and the current papers.
    ///
    /// Stamps `last_checkpoint_time`; each file is written atomically with fsync.
    pub fn save_checkpoint(&self, session: &mut CheckpointSession, papers: &[PaperRecord]) -> Result<()> {
        let dir = self.session_dir(session.id());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session dir: {}", dir.display()))?;

        let now = Utc::now();
        session.meta.phase = session.state.phase;
        session.meta.last_checkpoint_time = Some(now);

        let unique: HashSet<_> = papers.iter().map(paper_hash).collect();
        let papers_value = serde_json::to_value(papers).context("failed to serialize papers")?;
        let papers_file = PapersFile {
            total_papers: papers.len(),
            unique_paper_ids: unique.len(),
            saved_at: now,
            checksum: digest_json(&papers_value),
            papers: papers_value,
        };
        write_json_atomic(&dir.join(PAPERS_FILE), &papers_file)?;
        self.write_phase_state(&dir, &session.state)?;
        write_json_atomic(&dir.join(SESSION_FILE), &session.meta)?;

        log::debug!(
            "checkpoint {}: phase {} ({} processed, {} identifiers)",
            session.id(),
            session.state.phase,
            session.state.processed_hashes.len(),
            session.state.identifiers_collected.len()
        );
        Ok(())
    }

    fn write_phase_state(&self, dir: &Path, state: &PhaseState) -> Result<()> {
        let payload = serde_json::to_value(state).context("failed to serialize phase state")?;
        let envelope = Envelope {
            checksum: digest_json(&payload),
            payload,
        };
        write_json_atomic(&dir.join(PHASE_STATE_FILE), &envelope)
    }

    /// Load a session and its papers. `Ok(None)` if no such session exists.
    pub fn load_checkpoint(&self, reference: &SessionRef) -> Result<Option<LoadedSession>> {
        let session_id = match reference {
            SessionRef::Id(id) => id.clone(),
            SessionRef::InputFile(path) => match self.latest_for_input(path)? {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        let dir = self.session_dir(&session_id);
        if !dir.join(SESSION_FILE).exists() {
            return Ok(None);
        }

        let (session, mut issues) = read_session(&dir, &session_id)?;
        let papers = read_papers(&dir, &mut issues)?;

        for issue in &issues {
            log::warn!("checkpoint {session_id}: {issue}");
        }
        if !issues.is_empty() {
            log::warn!(
                "checkpoint {session_id}: loaded with {} integrity issue(s), continuing best-effort",
                issues.len()
            );
        }

        Ok(Some(LoadedSession {
            session,
            papers,
            issues,
        }))
    }

    /// Summaries of every session under the root, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let pattern = self.root.join("*").join(SESSION_FILE);
        let pattern_str = pattern.to_string_lossy();

        let mut summaries = Vec::new();
        for path in glob::glob(&pattern_str).context("invalid glob pattern")?.filter_map(|e| e.ok()) {
            let Some(dir) = path.parent() else { continue };
            let id = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match read_session(dir, &id) {
                Ok((session, issues)) => {
                    for issue in &issues {
                        log::debug!("session {id}: {issue}");
                    }
                    summaries.push(summarize(&session, dir));
                }
                Err(e) => log::warn!("skipping session {id}: {e:#}"),
            }
        }

        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.session_id.cmp(&b.session_id)));
        Ok(summaries)
    }

    /// Sessions that can still be resumed, optionally only those for `input_file`.
    pub fn list_resumable_sessions(&self, input_file: Option<&Path>) -> Result<Vec<SessionSummary>> {
        let wanted = input_file.map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        Ok(self
            .list_sessions()?
            .into_iter()
            .filter(|s| s.status.is_resumable())
            .filter(|s| wanted.as_ref().is_none_or(|w| &s.input_file == w))
            .collect())
    }

    fn latest_for_input(&self, input_file: &Path) -> Result<Option<String>> {
        Ok(self
            .list_resumable_sessions(Some(input_file))?
            .into_iter()
            .max_by(|a, b| {
                let ka = a.last_checkpoint_time.unwrap_or(a.created_at);
                let kb = b.last_checkpoint_time.unwrap_or(b.created_at);
                ka.cmp(&kb)
            })
            .map(|s| s.session_id))
    }

    /// True if at least `interval_secs` have passed since `last` (or never saved).
    pub fn should_checkpoint(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_secs: u64) -> bool {
        match last {
            None => true,
            Some(last) => (now - last).num_seconds().max(0) as u64 >= interval_secs,
        }
    }

    /// Append incoming records not already present by value.
    ///
    /// Replaying a checkpoint into papers that already hold its records is a no-op.
    pub fn merge_enrichments<T: PartialEq + Clone>(
        existing: &mut Vec<EnrichmentRecord<T>>,
        incoming: &[EnrichmentRecord<T>],
    ) -> usize {
        merge_enrichments(existing, incoming)
    }

    /// Remove sessions matching `filter`. With `dry_run`, only report them.
    pub fn clean_sessions(&self, filter: &CleanFilter, dry_run: bool) -> Result<Vec<SessionSummary>> {
        let now = Utc::now();
        let matching: Vec<SessionSummary> = self
            .list_sessions()?
            .into_iter()
            .filter(|s| filter.matches(s, now))
            .collect();

        if !dry_run {
            for summary in &matching {
                fs::remove_dir_all(&summary.dir)
                    .with_context(|| format!("failed to remove {}", summary.dir.display()))?;
                log::info!("removed session {} ({})", summary.session_id, summary.status);
            }
        }
        Ok(matching)
    }
}

fn new_session_id(input_file: &Path, now: DateTime<Utc>) -> String {
    let seed = format!(
        "{}:{}:{}:{}",
        input_file.display(),
        std::process::id(),
        now.timestamp_nanos_opt().unwrap_or_default(),
        SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let stem: String = input_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(32)
        .collect();
    let stem = if stem.is_empty() { "input".to_string() } else { stem };
    format!(
        "{}-{stem}-{}",
        now.format("%Y%m%d-%H%M%S"),
        short_hash(&hash_bytes(seed.as_bytes()))
    )
}

fn summarize(session: &CheckpointSession, dir: &Path) -> SessionSummary {
    SessionSummary {
        session_id: session.meta.session_id.clone(),
        input_file: session.meta.input_file.clone(),
        created_at: session.meta.created_at,
        last_checkpoint_time: session.meta.last_checkpoint_time,
        total_papers: session.meta.total_papers,
        phase: session.state.phase,
        status: session.status(),
        processed_in_phase: session.state.processed_hashes.len(),
        identifiers_found: session.state.identifiers_collected.len(),
        dir: dir.to_path_buf(),
    }
}

/// Read `path` as JSON. Missing file is `Ok(None)`; unparseable content is
/// reported and also `Ok(None)`.
fn read_json(path: &Path, issues: &mut Vec<IntegrityIssue>) -> Result<Option<Value>> {
    let file = file_label(path);
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            issues.push(IntegrityIssue::new(&file, format!("unparseable JSON: {e}")));
            Ok(None)
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Compare a stored checksum with the payload's digest.
fn verify_checksum(stored: Option<&str>, payload: &Value, file: &str, issues: &mut Vec<IntegrityIssue>) {
    match stored {
        Some(stored) if stored == digest_json(payload) => {}
        Some(_) => issues.push(IntegrityIssue::new(file, "checksum mismatch")),
        None => issues.push(IntegrityIssue::new(file, "missing checksum")),
    }
}

fn read_session(dir: &Path, session_id: &str) -> Result<(CheckpointSession, Vec<IntegrityIssue>)> {
    let mut issues = Vec::new();

    let meta = match read_json(&dir.join(SESSION_FILE), &mut issues)? {
        Some(value) => match serde_json::from_value::<SessionMeta>(value.clone()) {
            Ok(meta) => meta,
            Err(_) => meta_from_value_lossy(session_id, &value, &mut issues),
        },
        None => meta_from_value_lossy(session_id, &Value::Null, &mut issues),
    };

    let state = match read_json(&dir.join(PHASE_STATE_FILE), &mut issues)? {
        Some(value) => {
            let (checksum, payload) = match value.get("payload") {
                Some(payload) => (value.get("checksum").and_then(Value::as_str), payload.clone()),
                None => (None, value.clone()),
            };
            verify_checksum(checksum, &payload, PHASE_STATE_FILE, &mut issues);
            match serde_json::from_value::<PhaseState>(payload.clone()) {
                Ok(state) => state,
                Err(_) => PhaseState::from_value_lossy(&payload, PHASE_STATE_FILE, &mut issues),
            }
        }
        None => {
            issues.push(IntegrityIssue::new(
                PHASE_STATE_FILE,
                format!("no usable phase state; restarting phase {}", meta.phase),
            ));
            PhaseState {
                phase: meta.phase,
                ..PhaseState::new()
            }
        }
    };

    Ok((CheckpointSession { meta, state }, issues))
}

/// Best-effort session metadata from a damaged `session.json`.
fn meta_from_value_lossy(session_id: &str, value: &Value, issues: &mut Vec<IntegrityIssue>) -> SessionMeta {
    let empty = serde_json::Map::new();
    let obj = value.as_object().unwrap_or(&empty);
    if value.is_object() {
        issues.push(IntegrityIssue::new(SESSION_FILE, "metadata partially unreadable"));
    } else {
        issues.push(IntegrityIssue::new(SESSION_FILE, "metadata missing"));
    }

    fn field<T: serde::de::DeserializeOwned>(
        obj: &serde_json::Map<String, Value>,
        name: &str,
        issues: &mut Vec<IntegrityIssue>,
    ) -> Option<T> {
        obj.get(name)
            .cloned()
            .and_then(|v| parse_or_report(v, name, SESSION_FILE, issues))
    }

    SessionMeta {
        session_id: session_id.to_string(),
        input_file: field(obj, "input_file", issues).unwrap_or_default(),
        input_digest: field(obj, "input_digest", issues).flatten(),
        output_file: field(obj, "output_file", issues).flatten(),
        created_at: field(obj, "created_at", issues).unwrap_or_else(Utc::now),
        pid: field(obj, "pid", issues).unwrap_or_default(),
        total_papers: field(obj, "total_papers", issues).unwrap_or_default(),
        phase: field(obj, "phase", issues).unwrap_or(Phase::IdHarvest),
        duplicates_collapsed: field(obj, "duplicates_collapsed", issues).unwrap_or_default(),
        source_stats: field(obj, "source_stats", issues).unwrap_or_default(),
        phase_stats: field(obj, "phase_stats", issues).unwrap_or_default(),
        last_checkpoint_time: field(obj, "last_checkpoint_time", issues).flatten(),
    }
}

fn read_papers(dir: &Path, issues: &mut Vec<IntegrityIssue>) -> Result<Vec<PaperRecord>> {
    let Some(value) = read_json(&dir.join(PAPERS_FILE), issues)? else {
        return Ok(Vec::new());
    };
    let Some(papers) = value.get("papers") else {
        issues.push(IntegrityIssue::new(PAPERS_FILE, "missing papers list"));
        return Ok(Vec::new());
    };
    verify_checksum(value.get("checksum").and_then(Value::as_str), papers, PAPERS_FILE, issues);

    let Some(items) = papers.as_array() else {
        issues.push(IntegrityIssue::new(PAPERS_FILE, "papers is not a list"));
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for item in items {
        match serde_json::from_value::<PaperRecord>(item.clone()) {
            Ok(paper) => out.push(paper),
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        issues.push(IntegrityIssue::new(
            PAPERS_FILE,
            format!("dropped {dropped} unreadable paper(s); they are reloaded from the input"),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperlink_core::{PaperHash, PaperIdentifiers};

    fn input_file(dir: &Path) -> PathBuf {
        let path = dir.join("papers.json");
        fs::write(&path, "[]").unwrap();
        path
    }

    fn papers() -> Vec<PaperRecord> {
        vec![
            PaperRecord::new("Attention Is All You Need", &["Vaswani"], "NeurIPS", Some(2017)),
            PaperRecord::new("Deep Residual Learning", &["He"], "CVPR", Some(2016)),
        ]
    }

    #[test]
    fn create_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("ckpt")).unwrap();
        let input = input_file(dir.path());

        let mut session = mgr.create_session(&input, 2).unwrap();
        assert!(mgr.session_dir(session.id()).join(SESSION_FILE).exists());

        let hash = paper_hash(&papers()[0]);
        session.state.mark_processed(hash.clone());
        session.state.record_identifiers(
            &hash,
            &PaperIdentifiers {
                doi: Some("10.1/attn".into()),
                ..Default::default()
            },
        );
        session.meta.source_stats_mut("openalex").api_calls = 3;
        mgr.save_checkpoint(&mut session, &papers()).unwrap();
        assert!(session.meta.last_checkpoint_time.is_some());

        let loaded = mgr
            .load_checkpoint(&SessionRef::Id(session.id().to_string()))
            .unwrap()
            .unwrap();
        assert!(loaded.issues.is_empty(), "{:?}", loaded.issues);
        assert_eq!(loaded.session, session);
        assert_eq!(loaded.papers, papers());
    }

    #[test]
    fn unknown_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        assert!(mgr.load_checkpoint(&SessionRef::Id("nope".into())).unwrap().is_none());
        let missing = dir.path().join("missing.json");
        assert!(mgr.load_checkpoint(&SessionRef::InputFile(missing)).unwrap().is_none());
    }

    #[test]
    fn load_by_input_file_picks_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("ckpt")).unwrap();
        let input = input_file(dir.path());

        let mut done = mgr.create_session(&input, 2).unwrap();
        done.state.advance();
        done.state.advance();
        done.state.advance();
        mgr.save_checkpoint(&mut done, &papers()).unwrap();

        let mut open = mgr.create_session(&input, 2).unwrap();
        mgr.save_checkpoint(&mut open, &papers()).unwrap();

        let loaded = mgr
            .load_checkpoint(&SessionRef::InputFile(input.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.session.id(), open.id());

        let resumable = mgr.list_resumable_sessions(Some(&input)).unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(mgr.list_sessions().unwrap().len(), 2);
    }

    #[test]
    fn checksum_mismatch_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let input = input_file(dir.path());
        let mut session = mgr.create_session(&input, 1).unwrap();
        session.state.mark_processed(PaperHash::from("aaaa1111"));
        mgr.save_checkpoint(&mut session, &papers()).unwrap();

        let path = mgr.session_dir(session.id()).join(PHASE_STATE_FILE);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replacen("aaaa1111", "aaaa1112", 1)).unwrap();

        let loaded = mgr
            .load_checkpoint(&SessionRef::Id(session.id().to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].detail, "checksum mismatch");
        assert!(loaded.session.state.is_processed(&PaperHash::from("aaaa1112")));
        assert_eq!(loaded.papers.len(), 2);
    }

    #[test]
    fn unparseable_phase_state_falls_back_to_session_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let input = input_file(dir.path());
        let mut session = mgr.create_session(&input, 1).unwrap();
        session.state.advance();
        mgr.save_checkpoint(&mut session, &papers()).unwrap();

        let path = mgr.session_dir(session.id()).join(PHASE_STATE_FILE);
        fs::write(&path, "{\"checksum\": \"x\", \"payl").unwrap();

        let loaded = mgr
            .load_checkpoint(&SessionRef::Id(session.id().to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.session.state.phase, Phase::BatchEnrich);
        assert_eq!(loaded.issues.len(), 2);
    }

    #[test]
    fn damaged_paper_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let input = input_file(dir.path());
        let mut session = mgr.create_session(&input, 2).unwrap();
        mgr.save_checkpoint(&mut session, &papers()).unwrap();

        let path = mgr.session_dir(session.id()).join(PAPERS_FILE);
        let mut v: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        v["papers"][1]["title"] = Value::from(7);
        fs::write(&path, serde_json::to_vec(&v).unwrap()).unwrap();

        let loaded = mgr
            .load_checkpoint(&SessionRef::Id(session.id().to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.papers.len(), 1);
        // checksum mismatch + dropped paper
        assert_eq!(loaded.issues.len(), 2);
    }

    #[test]
    fn papers_wrapper_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let input = input_file(dir.path());
        let mut session = mgr.create_session(&input, 3).unwrap();
        let mut list = papers();
        list.push(list[0].clone());
        mgr.save_checkpoint(&mut session, &list).unwrap();

        let path = mgr.session_dir(session.id()).join(PAPERS_FILE);
        let v: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["totalPapers"], 3);
        assert_eq!(v["uniquePaperIds"], 2);
        assert!(v["savedAt"].is_string());
    }

    #[test]
    fn should_checkpoint_interval() {
        let now = Utc::now();
        assert!(CheckpointManager::should_checkpoint(None, now, 300));
        let recent = now - chrono::Duration::seconds(10);
        assert!(!CheckpointManager::should_checkpoint(Some(recent), now, 300));
        assert!(CheckpointManager::should_checkpoint(Some(recent), now, 10));
        assert!(CheckpointManager::should_checkpoint(Some(now), now, 0));
    }

    #[test]
    fn replaying_enrichments_is_idempotent() {
        let mut existing = vec![EnrichmentRecord::sourced("semantic_scholar", 12u64)];
        let replay = vec![EnrichmentRecord::sourced("semantic_scholar", 12u64)];
        assert_eq!(CheckpointManager::merge_enrichments(&mut existing, &replay), 0);
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn clean_by_status_and_id() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("ckpt")).unwrap();
        let input = input_file(dir.path());

        let mut done = mgr.create_session(&input, 1).unwrap();
        for _ in 0..3 {
            done.state.advance();
        }
        mgr.save_checkpoint(&mut done, &[]).unwrap();
        let mut failed = mgr.create_session(&input, 1).unwrap();
        failed.state.last_error = Some("source credentials rejected".into());
        mgr.save_checkpoint(&mut failed, &[]).unwrap();
        let pending = mgr.create_session(&input, 1).unwrap();

        let dry = mgr.clean_sessions(&CleanFilter::Completed, true).unwrap();
        assert_eq!(dry.len(), 1);
        assert!(mgr.session_dir(done.id()).exists());

        mgr.clean_sessions(&CleanFilter::Completed, false).unwrap();
        assert!(!mgr.session_dir(done.id()).exists());

        let removed = mgr.clean_sessions(&CleanFilter::Failed, false).unwrap();
        assert_eq!(removed[0].session_id, failed.id());

        assert!(mgr.clean_sessions(&CleanFilter::OlderThanDays(1), false).unwrap().is_empty());
        mgr.clean_sessions(&CleanFilter::Id(pending.id().to_string()), false).unwrap();
        assert!(mgr.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn session_ids_are_unique() {
        let now = Utc::now();
        let a = new_session_id(Path::new("/data/papers.json"), now);
        let b = new_session_id(Path::new("/data/papers.json"), now);
        assert_ne!(a, b);
        assert!(a.contains("-papers-"));
    }
}

//! Phase state machine and its persisted progress

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use paperlink_core::{PaperHash, PaperIdentifiers};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::IntegrityIssue;

/// `batch_progress` key: highest batch index such that it and every earlier
/// batch are done.
pub const LAST_BATCH_INDEX: &str = "last_batch_index";
/// `batch_progress` key: every completed batch index.
pub const COMPLETED_BATCHES: &str = "completed_batches";
/// `batch_progress` key: number of batches in the phase plan.
pub const TOTAL_BATCHES: &str = "total_batches";

/// Pipeline phase. Phases run strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IdHarvest,
    BatchEnrich,
    FullEnrich,
    Completed,
}

impl Phase {
    pub const RUNNABLE: [Phase; 3] = [Phase::IdHarvest, Phase::BatchEnrich, Phase::FullEnrich];

    pub fn name(self) -> &'static str {
        match self {
            Self::IdHarvest => "id_harvest",
            Self::BatchEnrich => "batch_enrich",
            Self::FullEnrich => "full_enrich",
            Self::Completed => "completed",
        }
    }

    /// Human label for tables and progress bars.
    pub fn label(self) -> &'static str {
        match self {
            Self::IdHarvest => "1 id-harvest",
            Self::BatchEnrich => "2 batch-enrich",
            Self::FullEnrich => "3 full-enrich",
            Self::Completed => "completed",
        }
    }

    pub fn next(self) -> Phase {
        match self {
            Self::IdHarvest => Self::BatchEnrich,
            Self::BatchEnrich => Self::FullEnrich,
            Self::FullEnrich | Self::Completed => Self::Completed,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "id_harvest" | "1" => Ok(Self::IdHarvest),
            "batch_enrich" | "2" => Ok(Self::BatchEnrich),
            "full_enrich" | "3" => Ok(Self::FullEnrich),
            "completed" => Ok(Self::Completed),
            other => Err(format!(
                "unknown phase '{other}' (expected id_harvest, batch_enrich or full_enrich)"
            )),
        }
    }
}

/// Progress of the whole pipeline, persisted as `phase_state.json`.
///
/// `processed_hashes` and `batch_progress` belong to the current phase and are
/// cleared on [`advance`](PhaseState::advance). `identifiers_collected`
/// accumulates across phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub phase_completed: bool,
    pub identifiers_collected: BTreeMap<PaperHash, PaperIdentifiers>,
    pub processed_hashes: BTreeSet<PaperHash>,
    pub batch_progress: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub phase_started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::IdHarvest,
            phase_completed: false,
            identifiers_collected: BTreeMap::new(),
            processed_hashes: BTreeSet::new(),
            batch_progress: BTreeMap::new(),
            started_at: now,
            phase_started_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn is_processed(&self, hash: &PaperHash) -> bool {
        self.processed_hashes.contains(hash)
    }

    /// Returns true if the hash was not yet processed.
    pub fn mark_processed(&mut self, hash: PaperHash) -> bool {
        self.updated_at = Utc::now();
        self.processed_hashes.insert(hash)
    }

    /// Merge discovered identifiers for a paper; existing values win.
    ///
    /// Returns true if anything new was learned.
    pub fn record_identifiers(&mut self, hash: &PaperHash, ids: &PaperIdentifiers) -> bool {
        if ids.is_empty() {
            return false;
        }
        self.updated_at = Utc::now();
        match self.identifiers_collected.get_mut(hash) {
            Some(existing) => existing.merge_missing(ids),
            None => {
                self.identifiers_collected.insert(hash.clone(), ids.clone());
                true
            }
        }
    }

    pub fn identifiers(&self, hash: &PaperHash) -> Option<&PaperIdentifiers> {
        self.identifiers_collected.get(hash)
    }

    /// Mark the current phase finished. The next run of the state machine
    /// advances past it without re-executing any of its work.
    pub fn complete_phase(&mut self) {
        self.phase_completed = true;
        self.updated_at = Utc::now();
    }

    /// Move to the next phase, clearing per-phase progress.
    pub fn advance(&mut self) {
        if self.phase == Phase::Completed {
            return;
        }
        let now = Utc::now();
        self.phase = self.phase.next();
        self.processed_hashes.clear();
        self.batch_progress.clear();
        self.phase_started_at = now;
        self.updated_at = now;
        self.phase_completed = self.phase == Phase::Completed;
        if self.phase == Phase::Completed {
            self.completed_at = Some(now);
        }
    }

    /// Batch indices already done in the current phase.
    ///
    /// Union of `completed_batches` and everything up to `last_batch_index`,
    /// so either record alone is enough to skip work.
    pub fn completed_batches(&self) -> BTreeSet<usize> {
        let mut done: BTreeSet<usize> = self
            .batch_progress
            .get(COMPLETED_BATCHES)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if let Some(last) = self.last_batch_index() {
            done.extend(0..=last);
        }
        done
    }

    pub fn last_batch_index(&self) -> Option<usize> {
        self.batch_progress
            .get(LAST_BATCH_INDEX)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    pub fn set_total_batches(&mut self, total: usize) {
        self.batch_progress
            .insert(TOTAL_BATCHES.to_string(), Value::from(total));
    }

    /// Record a finished batch and advance `last_batch_index` over any
    /// contiguous run of completed batches.
    pub fn mark_batch_done(&mut self, index: usize) {
        let mut done = self.completed_batches();
        done.insert(index);

        let mut last: Option<usize> = None;
        for i in 0.. {
            if done.contains(&i) {
                last = Some(i);
            } else {
                break;
            }
        }

        self.batch_progress.insert(
            COMPLETED_BATCHES.to_string(),
            Value::from(done.into_iter().collect::<Vec<_>>()),
        );
        if let Some(last) = last {
            self.batch_progress
                .insert(LAST_BATCH_INDEX.to_string(), Value::from(last));
        }
        self.updated_at = Utc::now();
    }

    /// Rebuild state from a possibly damaged JSON value, field by field.
    ///
    /// Fields that fail to parse fall back to their defaults and are reported
    /// in `issues`. Individual bad entries of the identifier map and hash set
    /// are dropped rather than discarding the whole collection.
    pub fn from_value_lossy(value: &Value, file: &str, issues: &mut Vec<IntegrityIssue>) -> Self {
        let mut state = Self::new();
        let Some(obj) = value.as_object() else {
            issues.push(IntegrityIssue::new(file, "payload is not an object; starting from empty state"));
            return state;
        };

        let field = |name: &str, issues: &mut Vec<IntegrityIssue>| -> Option<Value> {
            let v = obj.get(name).cloned();
            if v.is_none() {
                issues.push(IntegrityIssue::new(file, format!("missing field '{name}'")));
            }
            v
        };

        if let Some(phase) = field("phase", issues).and_then(|v| parse_or_report(v, "phase", file, issues)) {
            state.phase = phase;
        }
        if let Some(done) = field("phase_completed", issues)
            .and_then(|v| parse_or_report(v, "phase_completed", file, issues))
        {
            state.phase_completed = done;
        }
        if let Some(v) = field("identifiers_collected", issues) {
            state.identifiers_collected = lossy_map(&v, "identifiers_collected", file, issues);
        }
        if let Some(v) = field("processed_hashes", issues) {
            state.processed_hashes = lossy_set(&v, "processed_hashes", file, issues);
        }
        if let Some(v) = field("batch_progress", issues) {
            if let Some(map) = parse_or_report(v, "batch_progress", file, issues) {
                state.batch_progress = map;
            }
        }
        for (name, slot) in [
            ("started_at", &mut state.started_at),
            ("phase_started_at", &mut state.phase_started_at),
            ("updated_at", &mut state.updated_at),
        ] {
            if let Some(ts) = obj.get(name).cloned().and_then(|v| parse_or_report(v, name, file, issues)) {
                *slot = ts;
            }
        }
        state.completed_at = obj
            .get("completed_at")
            .cloned()
            .and_then(|v| parse_or_report(v, "completed_at", file, issues))
            .flatten();
        state.last_error = obj
            .get("last_error")
            .cloned()
            .and_then(|v| parse_or_report(v, "last_error", file, issues))
            .flatten();
        state
    }
}

pub(crate) fn parse_or_report<T: DeserializeOwned>(
    value: Value,
    name: &str,
    file: &str,
    issues: &mut Vec<IntegrityIssue>,
) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            issues.push(IntegrityIssue::new(file, format!("field '{name}' unreadable: {e}")));
            None
        }
    }
}

fn lossy_map(
    value: &Value,
    name: &str,
    file: &str,
    issues: &mut Vec<IntegrityIssue>,
) -> BTreeMap<PaperHash, PaperIdentifiers> {
    let Some(obj) = value.as_object() else {
        issues.push(IntegrityIssue::new(file, format!("field '{name}' is not an object")));
        return BTreeMap::new();
    };
    let mut map = BTreeMap::new();
    let mut dropped = 0usize;
    for (key, entry) in obj {
        match serde_json::from_value::<PaperIdentifiers>(entry.clone()) {
            Ok(ids) => {
                map.insert(PaperHash::from(key.as_str()), ids);
            }
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        issues.push(IntegrityIssue::new(file, format!("dropped {dropped} unreadable entries of '{name}'")));
    }
    map
}

fn lossy_set(value: &Value, name: &str, file: &str, issues: &mut Vec<IntegrityIssue>) -> BTreeSet<PaperHash> {
    let Some(items) = value.as_array() else {
        issues.push(IntegrityIssue::new(file, format!("field '{name}' is not an array")));
        return BTreeSet::new();
    };
    let dropped = items.iter().filter(|v| !v.is_string()).count();
    if dropped > 0 {
        issues.push(IntegrityIssue::new(file, format!("dropped {dropped} unreadable entries of '{name}'")));
    }
    items
        .iter()
        .filter_map(Value::as_str)
        .map(PaperHash::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> PaperHash {
        PaperHash::from(s)
    }

    #[test]
    fn phases_advance_in_order() {
        let mut state = PhaseState::new();
        assert_eq!(state.phase, Phase::IdHarvest);
        state.mark_processed(h("a"));
        state.mark_batch_done(0);

        state.advance();
        assert_eq!(state.phase, Phase::BatchEnrich);
        assert!(state.processed_hashes.is_empty());
        assert!(state.batch_progress.is_empty());
        assert!(!state.phase_completed);

        state.advance();
        state.advance();
        assert_eq!(state.phase, Phase::Completed);
        assert!(state.phase_completed);
        assert!(state.completed_at.is_some());

        state.advance();
        assert_eq!(state.phase, Phase::Completed);
    }

    #[test]
    fn identifiers_survive_advance() {
        let mut state = PhaseState::new();
        let ids = PaperIdentifiers {
            doi: Some("10.1/x".into()),
            ..Default::default()
        };
        assert!(state.record_identifiers(&h("a"), &ids));
        assert!(!state.record_identifiers(&h("a"), &ids));
        assert!(!state.record_identifiers(&h("b"), &PaperIdentifiers::default()));
        state.advance();
        assert_eq!(state.identifiers(&h("a")), Some(&ids));
    }

    #[test]
    fn batch_progress_tracks_contiguous_prefix() {
        let mut state = PhaseState::new();
        state.mark_batch_done(1);
        assert_eq!(state.last_batch_index(), None);
        state.mark_batch_done(0);
        assert_eq!(state.last_batch_index(), Some(1));
        state.mark_batch_done(3);
        assert_eq!(state.last_batch_index(), Some(1));
        assert_eq!(state.completed_batches(), BTreeSet::from([0, 1, 3]));
    }

    #[test]
    fn last_batch_index_alone_skips_prefix() {
        let mut state = PhaseState::new();
        state
            .batch_progress
            .insert(LAST_BATCH_INDEX.into(), Value::from(2));
        assert_eq!(state.completed_batches(), BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn phase_from_str() {
        assert_eq!("id-harvest".parse::<Phase>().unwrap(), Phase::IdHarvest);
        assert_eq!("BATCH_ENRICH".parse::<Phase>().unwrap(), Phase::BatchEnrich);
        assert_eq!("3".parse::<Phase>().unwrap(), Phase::FullEnrich);
        assert!("phase4".parse::<Phase>().is_err());
    }

    #[test]
    fn serde_roundtrip_uses_snake_case() {
        let mut state = PhaseState::new();
        state.mark_processed(h("abc"));
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["phase"], "id_harvest");
        assert_eq!(v["processed_hashes"][0], "abc");
        let back: PhaseState = serde_json::from_value(v).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn lossy_parse_keeps_good_fields() {
        let mut state = PhaseState::new();
        state.advance();
        state.mark_processed(h("abc"));
        state.record_identifiers(
            &h("abc"),
            &PaperIdentifiers {
                doi: Some("10.1/x".into()),
                ..Default::default()
            },
        );
        let mut v = serde_json::to_value(&state).unwrap();
        v["phase_completed"] = Value::from("yes");
        v["identifiers_collected"]["broken"] = Value::from(42);
        v["processed_hashes"].as_array_mut().unwrap().push(Value::Null);

        let mut issues = Vec::new();
        let back = PhaseState::from_value_lossy(&v, "phase_state.json", &mut issues);
        assert_eq!(back.phase, Phase::BatchEnrich);
        assert!(!back.phase_completed);
        assert_eq!(back.identifiers_collected.len(), 1);
        assert!(back.is_processed(&h("abc")));
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn lossy_parse_of_non_object() {
        let mut issues = Vec::new();
        let state = PhaseState::from_value_lossy(&Value::from(1), "phase_state.json", &mut issues);
        assert_eq!(state.phase, Phase::IdHarvest);
        assert_eq!(issues.len(), 1);
    }
}

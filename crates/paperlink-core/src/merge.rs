//! Provenance-preserving merge of multi-source field values
//!
//! Values are appended to per-field lists and never overwritten. Appends are
//! idempotent by value: a record equal to an existing one in source, original
//! flag and data is dropped even if its timestamp differs, since a resumed run
//! may re-query a source and get the same data with a fresh timestamp.
//!
//! Effective values are reduced per field:
//! - citations: maximum across all sources
//! - abstract: an original (input) value wins, else the first non-empty value
//!   by source priority
//! - urls / affiliations: ordered union, URLs deduplicated after normalization

use crate::paper::{EnrichmentField, EnrichmentRecord, PaperRecord, SourceRecord};

/// A record tagged with the field it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    Citations(EnrichmentRecord<u64>),
    Abstract(EnrichmentRecord<String>),
    Urls(EnrichmentRecord<Vec<String>>),
    Affiliations(EnrichmentRecord<Vec<String>>),
}

impl Enrichment {
    pub fn field(&self) -> EnrichmentField {
        match self {
            Self::Citations(_) => EnrichmentField::Citations,
            Self::Abstract(_) => EnrichmentField::Abstract,
            Self::Urls(_) => EnrichmentField::Urls,
            Self::Affiliations(_) => EnrichmentField::Affiliations,
        }
    }
}

/// Append `record` unless an equal value is already present.
///
/// Returns true if the list grew.
pub fn push_unique<T: PartialEq>(list: &mut Vec<EnrichmentRecord<T>>, record: EnrichmentRecord<T>) -> bool {
    if list.iter().any(|r| r.same_value(&record)) {
        return false;
    }
    list.push(record);
    true
}

/// Merge `incoming` into `existing`, skipping records already present.
///
/// Replaying the same checkpoint twice leaves `existing` unchanged.
/// Returns the number of records appended.
pub fn merge_enrichments<T: PartialEq + Clone>(
    existing: &mut Vec<EnrichmentRecord<T>>,
    incoming: &[EnrichmentRecord<T>],
) -> usize {
    incoming
        .iter()
        .filter(|r| push_unique(existing, (*r).clone()))
        .count()
}

/// Merge one copy of a paper into another with the same identity.
///
/// Scalar fields of `existing` win; identifiers fill gaps; every provenance
/// list is merged idempotently. Returns the number of records appended.
pub fn merge_papers(existing: &mut PaperRecord, incoming: &PaperRecord) -> usize {
    existing.external_ids.merge_missing(&incoming.external_ids);
    if existing.abstract_text.is_none() {
        existing.abstract_text.clone_from(&incoming.abstract_text);
    }
    for (key, value) in &incoming.extra {
        existing.extra.entry(key.clone()).or_insert_with(|| value.clone());
    }
    merge_enrichments(&mut existing.citations, &incoming.citations)
        + merge_enrichments(&mut existing.abstracts, &incoming.abstracts)
        + merge_enrichments(&mut existing.urls, &incoming.urls)
        + merge_enrichments(&mut existing.affiliations, &incoming.affiliations)
}

/// Normalize a URL for dedup: scheme, `www.`, case, fragment and trailing slash
/// do not distinguish two URLs.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let lower = without_fragment.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

/// Effective value of one field, as computed by its reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectiveValue {
    Citations(Option<u64>),
    Abstract(Option<String>),
    Urls(Vec<String>),
    Affiliations(Vec<String>),
}

/// Applies enrichments and reduces provenance lists to effective values.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentMerger {
    /// Source names, highest priority first; unknown sources rank last
    priority: Vec<String>,
}

impl EnrichmentMerger {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    fn rank(&self, source: &str) -> usize {
        self.priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.priority.len())
    }

    /// Append a record to its field list. No-op if an equal value exists.
    pub fn apply_enrichment(&self, paper: &mut PaperRecord, enrichment: Enrichment) -> bool {
        match enrichment {
            Enrichment::Citations(r) => push_unique(&mut paper.citations, r),
            Enrichment::Abstract(r) => push_unique(&mut paper.abstracts, r),
            Enrichment::Urls(r) => push_unique(&mut paper.urls, r),
            Enrichment::Affiliations(r) => push_unique(&mut paper.affiliations, r),
        }
    }

    /// Fold a normalized source record into the paper.
    ///
    /// Identifiers fill gaps in `external_ids`; every present field becomes a
    /// sourced enrichment record. Returns the number of records appended.
    pub fn apply_source_record(&self, paper: &mut PaperRecord, source: &str, record: &SourceRecord) -> usize {
        paper.external_ids.merge_missing(&record.identifiers);

        let mut enrichments = Vec::with_capacity(4);
        if let Some(count) = record.citation_count {
            enrichments.push(Enrichment::Citations(EnrichmentRecord::sourced(source, count)));
        }
        if let Some(text) = record.abstract_text.as_deref().map(str::trim) {
            if !text.is_empty() {
                enrichments.push(Enrichment::Abstract(EnrichmentRecord::sourced(source, text.to_string())));
            }
        }
        if !record.urls.is_empty() {
            enrichments.push(Enrichment::Urls(EnrichmentRecord::sourced(source, record.urls.clone())));
        }
        if !record.affiliations.is_empty() {
            enrichments.push(Enrichment::Affiliations(EnrichmentRecord::sourced(
                source,
                record.affiliations.clone(),
            )));
        }

        enrichments
            .into_iter()
            .map(|e| self.apply_enrichment(paper, e))
            .filter(|added| *added)
            .count()
    }

    /// Highest citation count reported by any source.
    pub fn effective_citations(&self, paper: &PaperRecord) -> Option<u64> {
        paper.citations.iter().map(|r| r.data).max()
    }

    /// Original abstract if present, else the first non-empty one by source priority.
    pub fn effective_abstract<'a>(&self, paper: &'a PaperRecord) -> Option<&'a str> {
        let non_empty = |r: &&'a EnrichmentRecord<String>| !r.data.trim().is_empty();

        if let Some(original) = paper.abstracts.iter().filter(non_empty).find(|r| r.original) {
            return Some(&original.data);
        }
        if let Some(text) = paper.abstract_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(text);
        }
        // min_by_key keeps the earliest of equal ranks
        paper
            .abstracts
            .iter()
            .filter(non_empty)
            .min_by_key(|r| self.rank(&r.source))
            .map(|r| r.data.as_str())
    }

    /// Union of all URLs, first spelling of each normalized URL kept.
    pub fn effective_urls(&self, paper: &PaperRecord) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        paper
            .urls
            .iter()
            .flat_map(|r| r.data.iter())
            .filter(|u| !u.trim().is_empty() && seen.insert(normalize_url(u)))
            .cloned()
            .collect()
    }

    /// Union of affiliation strings from the input authors and all sources.
    pub fn effective_affiliations(&self, paper: &PaperRecord) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        paper
            .authors
            .iter()
            .filter_map(|a| a.affiliation())
            .chain(paper.affiliations.iter().flat_map(|r| r.data.iter().map(String::as_str)))
            .map(str::trim)
            .filter(|a| !a.is_empty() && seen.insert(a.to_lowercase()))
            .map(String::from)
            .collect()
    }

    pub fn effective_value(&self, paper: &PaperRecord, field: EnrichmentField) -> EffectiveValue {
        match field {
            EnrichmentField::Citations => EffectiveValue::Citations(self.effective_citations(paper)),
            EnrichmentField::Abstract => {
                EffectiveValue::Abstract(self.effective_abstract(paper).map(String::from))
            }
            EnrichmentField::Urls => EffectiveValue::Urls(self.effective_urls(paper)),
            EnrichmentField::Affiliations => {
                EffectiveValue::Affiliations(self.effective_affiliations(paper))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperIdentifiers;

    fn merger() -> EnrichmentMerger {
        EnrichmentMerger::new(vec!["openalex".into(), "semantic_scholar".into()])
    }

    fn paper() -> PaperRecord {
        PaperRecord::new("T", &["A"], "V", Some(2020))
    }

    #[test]
    fn identical_record_applied_twice_is_noop() {
        let m = merger();
        let mut p = paper();
        let rec = EnrichmentRecord::sourced("openalex", 42u64);
        assert!(m.apply_enrichment(&mut p, Enrichment::Citations(rec.clone())));
        assert!(!m.apply_enrichment(&mut p, Enrichment::Citations(rec)));
        assert_eq!(p.citations.len(), 1);
    }

    #[test]
    fn fresh_timestamp_same_data_is_noop() {
        let m = merger();
        let mut p = paper();
        m.apply_enrichment(&mut p, Enrichment::Citations(EnrichmentRecord::sourced("openalex", 7)));
        let mut later = EnrichmentRecord::sourced("openalex", 7);
        later.timestamp += chrono::Duration::hours(1);
        assert!(!m.apply_enrichment(&mut p, Enrichment::Citations(later)));
        assert_eq!(p.citations.len(), 1);
    }

    #[test]
    fn different_data_same_source_appends() {
        let m = merger();
        let mut p = paper();
        m.apply_enrichment(&mut p, Enrichment::Citations(EnrichmentRecord::sourced("openalex", 7)));
        m.apply_enrichment(&mut p, Enrichment::Citations(EnrichmentRecord::sourced("openalex", 8)));
        assert_eq!(p.citations.len(), 2);
    }

    #[test]
    fn citations_reducer_takes_max() {
        let m = merger();
        let mut p = paper();
        for (source, n) in [("openalex", 10), ("semantic_scholar", 25), ("crossref", 3)] {
            m.apply_enrichment(&mut p, Enrichment::Citations(EnrichmentRecord::sourced(source, n)));
        }
        assert_eq!(m.effective_citations(&p), Some(25));
        assert_eq!(m.effective_citations(&paper()), None);
    }

    #[test]
    fn original_abstract_wins_regardless_of_order() {
        let m = merger();
        let mut p = paper();
        m.apply_enrichment(
            &mut p,
            Enrichment::Abstract(EnrichmentRecord::sourced("openalex", "sourced".to_string())),
        );
        m.apply_enrichment(
            &mut p,
            Enrichment::Abstract(EnrichmentRecord::original("original".to_string())),
        );
        assert_eq!(m.effective_abstract(&p), Some("original"));

        let mut q = paper();
        m.apply_enrichment(
            &mut q,
            Enrichment::Abstract(EnrichmentRecord::original("original".to_string())),
        );
        m.apply_enrichment(
            &mut q,
            Enrichment::Abstract(EnrichmentRecord::sourced("openalex", "sourced".to_string())),
        );
        assert_eq!(m.effective_abstract(&q), Some("original"));
    }

    #[test]
    fn abstract_follows_source_priority() {
        let m = merger();
        let mut p = paper();
        for (source, text) in [("crossref", "c"), ("semantic_scholar", "s2"), ("openalex", "")] {
            m.apply_enrichment(
                &mut p,
                Enrichment::Abstract(EnrichmentRecord::sourced(source, text.to_string())),
            );
        }
        // empty openalex value is skipped, semantic_scholar outranks crossref
        assert_eq!(m.effective_abstract(&p), Some("s2"));
    }

    #[test]
    fn urls_union_dedups_normalized() {
        let m = merger();
        let mut p = paper();
        m.apply_enrichment(
            &mut p,
            Enrichment::Urls(EnrichmentRecord::sourced(
                "openalex",
                vec!["https://example.org/paper/".into(), "https://arxiv.org/abs/1".into()],
            )),
        );
        m.apply_enrichment(
            &mut p,
            Enrichment::Urls(EnrichmentRecord::sourced(
                "semantic_scholar",
                vec!["http://www.Example.org/paper".into(), "https://s2.org/p".into()],
            )),
        );
        assert_eq!(
            m.effective_urls(&p),
            vec!["https://example.org/paper/", "https://arxiv.org/abs/1", "https://s2.org/p"]
        );
    }

    #[test]
    fn apply_source_record_fills_ids_and_lists() {
        let m = merger();
        let mut p = paper();
        let record = SourceRecord {
            identifiers: PaperIdentifiers {
                doi: Some("10.1/x".into()),
                ..Default::default()
            },
            abstract_text: Some("text".into()),
            citation_count: Some(3),
            urls: vec!["https://a".into()],
            ..Default::default()
        };
        assert_eq!(m.apply_source_record(&mut p, "openalex", &record), 3);
        assert_eq!(m.apply_source_record(&mut p, "openalex", &record), 0);
        assert_eq!(p.external_ids.doi.as_deref(), Some("10.1/x"));
        assert_eq!(p.abstracts.len(), 1);
    }

    #[test]
    fn merge_enrichments_is_idempotent() {
        let mut existing = vec![EnrichmentRecord::sourced("a", 1u64)];
        let incoming = vec![
            EnrichmentRecord::sourced("a", 1u64),
            EnrichmentRecord::sourced("b", 2u64),
        ];
        assert_eq!(merge_enrichments(&mut existing, &incoming), 1);
        assert_eq!(merge_enrichments(&mut existing, &incoming), 0);
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn merge_papers_keeps_existing_scalars() {
        let mut a = paper();
        a.abstract_text = Some("mine".into());
        let mut b = paper();
        b.abstract_text = Some("theirs".into());
        b.external_ids.doi = Some("10.1/b".into());
        b.citations.push(EnrichmentRecord::sourced("openalex", 4));
        assert_eq!(merge_papers(&mut a, &b), 1);
        assert_eq!(a.abstract_text.as_deref(), Some("mine"));
        assert_eq!(a.external_ids.doi.as_deref(), Some("10.1/b"));
        assert_eq!(merge_papers(&mut a, &b), 0);
    }

    #[test]
    fn affiliations_union_includes_input_authors() {
        let m = merger();
        let mut p = paper();
        p.authors = vec![crate::paper::Author::Detailed {
            name: "A".into(),
            affiliation: Some("MIT".into()),
        }];
        m.apply_enrichment(
            &mut p,
            Enrichment::Affiliations(EnrichmentRecord::sourced(
                "openalex",
                vec!["mit".into(), "Stanford University".into()],
            )),
        );
        assert_eq!(m.effective_affiliations(&p), vec!["MIT", "Stanford University"]);
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("HTTPS://www.Foo.org/a/#sec"), "foo.org/a");
        assert_eq!(normalize_url("http://foo.org/a"), "foo.org/a");
    }
}

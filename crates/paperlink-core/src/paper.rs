//! Paper records and per-field provenance
//!
//! A [`PaperRecord`] is loaded from the input file, mutated in place by every
//! phase, and written back out with its provenance lists. Enrichment lists are
//! append-only: the effective value of a field is computed by the reducers in
//! [`crate::merge`], never stored.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Source name recorded on values carried over from the input file.
pub const INPUT_SOURCE: &str = "input";

/// Author entry as found in scraped venue data.
///
/// Scrapers emit either a bare name or a name/affiliation object; both are
/// accepted and written back in the shape they came in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affiliation: Option<String>,
    },
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    pub fn affiliation(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { affiliation, .. } => affiliation.as_deref(),
        }
    }
}

/// Cross-reference identifiers for one paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openalex_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_scholar_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubmed_id: Option<String>,
    /// Identifiers without a dedicated slot (e.g. `mag`, `dblp`, `corpusId`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, String>,
}

impl PaperIdentifiers {
    /// True if the paper carries a canonical ID usable for exact batch lookup.
    pub fn has_external_ids(&self) -> bool {
        self.doi.is_some() || self.arxiv_id.is_some() || self.pubmed_id.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.arxiv_id.is_none()
            && self.openalex_id.is_none()
            && self.semantic_scholar_id.is_none()
            && self.pubmed_id.is_none()
            && self.other.is_empty()
    }

    /// Fill slots that are still empty from `other`. Existing values win.
    ///
    /// Returns true if anything changed.
    pub fn merge_missing(&mut self, other: &PaperIdentifiers) -> bool {
        let mut changed = false;
        for (slot, value) in [
            (&mut self.doi, &other.doi),
            (&mut self.arxiv_id, &other.arxiv_id),
            (&mut self.openalex_id, &other.openalex_id),
            (&mut self.semantic_scholar_id, &other.semantic_scholar_id),
            (&mut self.pubmed_id, &other.pubmed_id),
        ] {
            if slot.is_none() && value.is_some() {
                slot.clone_from(value);
                changed = true;
            }
        }
        for (key, value) in &other.other {
            if !self.other.contains_key(key) {
                self.other.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Normalize every slot in place (DOI/arXiv prefixes, case, whitespace).
    pub fn normalized(mut self) -> Self {
        self.doi = self.doi.as_deref().and_then(normalize_doi);
        self.arxiv_id = self.arxiv_id.as_deref().and_then(normalize_arxiv_id);
        self.openalex_id = self.openalex_id.as_deref().and_then(normalize_openalex_id);
        self.semantic_scholar_id = non_empty(self.semantic_scholar_id.as_deref());
        self.pubmed_id = self
            .pubmed_id
            .as_deref()
            .map(|s| s.trim().trim_start_matches("https://pubmed.ncbi.nlm.nih.gov/"))
            .map(|s| s.trim_end_matches('/'))
            .and_then(|s| non_empty(Some(s)));
        self
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Normalize a DOI: strip resolver prefixes, lowercase, require the `10.` prefix.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|p| lower.strip_prefix(p))
        .unwrap_or(&lower)
        .trim();
    stripped.starts_with("10.").then(|| stripped.to_string())
}

/// Normalize an arXiv ID: strip URL/`arXiv:` prefixes and the version suffix.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let start = ["https://arxiv.org/abs/", "http://arxiv.org/abs/", "arxiv:"]
        .iter()
        .find(|p| lower.starts_with(*p))
        .map_or(0, |p| p.len());
    let id = &trimmed[start..];
    let id = match id.rfind('v') {
        Some(pos) if pos > 0 && id[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos + 1 < id.len() => {
            &id[..pos]
        }
        _ => id,
    };
    non_empty(Some(id))
}

/// Normalize an OpenAlex work ID to its bare `W…` form.
pub fn normalize_openalex_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let id = trimmed.rsplit('/').next().unwrap_or(trimmed);
    non_empty(Some(id)).map(|s| s.to_uppercase())
}

/// Field of a paper that carries a provenance list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentField {
    Citations,
    Abstract,
    Urls,
    Affiliations,
}

impl EnrichmentField {
    pub fn all() -> &'static [EnrichmentField] {
        &[Self::Citations, Self::Abstract, Self::Urls, Self::Affiliations]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Citations => "citations",
            Self::Abstract => "abstract",
            Self::Urls => "urls",
            Self::Affiliations => "affiliations",
        }
    }
}

impl fmt::Display for EnrichmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One sourced value for a field. Never overwritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord<T> {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Value came from the input file rather than an external source
    #[serde(default)]
    pub original: bool,
    pub data: T,
}

impl<T> EnrichmentRecord<T> {
    /// Value fetched from an external source, stamped now.
    pub fn sourced(source: impl Into<String>, data: T) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            original: false,
            data,
        }
    }

    /// Value carried over from the input file.
    pub fn original(data: T) -> Self {
        Self {
            source: INPUT_SOURCE.to_string(),
            timestamp: Utc::now(),
            original: true,
            data,
        }
    }
}

impl<T: PartialEq> EnrichmentRecord<T> {
    /// Equality ignoring the timestamp: a re-query that returns identical data
    /// is the same finding.
    pub fn same_value(&self, other: &Self) -> bool {
        self.source == other.source && self.original == other.original && self.data == other.data
    }
}

/// Canonical representation of one paper as it flows through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub venue: String,
    #[serde(default, deserialize_with = "deserialize_year")]
    pub year: Option<i32>,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "PaperIdentifiers::is_empty")]
    pub external_ids: PaperIdentifiers,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<EnrichmentRecord<u64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abstracts: Vec<EnrichmentRecord<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<EnrichmentRecord<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<EnrichmentRecord<Vec<String>>>,
    /// Scraper fields this pipeline does not interpret, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PaperRecord {
    pub fn new(title: impl Into<String>, authors: &[&str], venue: &str, year: Option<i32>) -> Self {
        Self {
            title: title.into(),
            authors: authors.iter().map(|a| Author::Name((*a).to_string())).collect(),
            venue: venue.to_string(),
            year,
            ..Default::default()
        }
    }

    pub fn author_names(&self) -> impl Iterator<Item = &str> {
        self.authors.iter().map(Author::name)
    }

    /// Check the fields the pipeline depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("missing title".to_string());
        }
        if let Some(year) = self.year {
            if !(1000..=9999).contains(&year) {
                return Err(format!("implausible year {year}"));
            }
        }
        Ok(())
    }

    /// Record input-file values as original provenance entries (idempotent).
    pub fn seed_original_provenance(&mut self) {
        let Some(text) = self.abstract_text.as_deref().map(str::trim) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let already = self.abstracts.iter().any(|r| r.original && r.data == text);
        if !already {
            self.abstracts.push(EnrichmentRecord::original(text.to_string()));
        }
    }
}

/// Year may arrive as a number, a numeric string, or null.
fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Fields fetched from one source for one paper, normalized at the boundary.
///
/// Every source client converts its wire format into this shape immediately,
/// so nothing downstream branches on source or API version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    /// The source's own ID for the paper
    pub source_id: Option<String>,
    pub identifiers: PaperIdentifiers,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
    pub citation_count: Option<u64>,
    pub urls: Vec<String>,
    pub affiliations: Vec<String>,
}

impl SourceRecord {
    /// True if the record carries anything beyond identifiers.
    pub fn has_enrichment(&self) -> bool {
        self.abstract_text.is_some()
            || self.citation_count.is_some()
            || !self.urls.is_empty()
            || !self.affiliations.is_empty()
    }
}

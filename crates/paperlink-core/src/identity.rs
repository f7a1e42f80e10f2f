//! Content-derived paper identity
//!
//! The hash covers only what a venue scraper produces: title, authors, venue
//! and year. External IDs and the abstract are the fields this pipeline
//! discovers, so they are excluded; two independent runs over the same input
//! therefore converge on the same identity for the same paper.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paper::PaperRecord;

/// Separates fields inside the hashed identity key.
const FIELD_SEP: char = '\u{1f}';
/// Separates author names inside the author field.
const AUTHOR_SEP: char = '\u{1e}';

/// Blake3 digest (hex) identifying a paper across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperHash(String);

impl PaperHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for PaperHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaperHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical identity string: lowercased/trimmed title, sorted lowercased
/// author names, lowercased venue, year.
pub fn identity_key(paper: &PaperRecord) -> String {
    let title = paper.title.trim().to_lowercase();

    let mut authors: Vec<String> = paper
        .author_names()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    authors.sort();
    let authors = authors.join(&AUTHOR_SEP.to_string());

    let venue = paper.venue.trim().to_lowercase();
    let year = paper.year.map(|y| y.to_string()).unwrap_or_default();

    format!("{title}{FIELD_SEP}{authors}{FIELD_SEP}{venue}{FIELD_SEP}{year}")
}

/// Stable content hash used for dedup and resume tracking.
pub fn paper_hash(paper: &PaperRecord) -> PaperHash {
    let digest = blake3::hash(identity_key(paper).as_bytes());
    PaperHash(digest.to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::{EnrichmentRecord, PaperIdentifiers};

    fn sample() -> PaperRecord {
        PaperRecord::new(
            "Deep Residual Learning",
            &["Kaiming He", "Xiangyu Zhang"],
            "CVPR",
            Some(2016),
        )
    }

    #[test]
    fn hash_deterministic() {
        assert_eq!(paper_hash(&sample()), paper_hash(&sample()));
        assert_eq!(paper_hash(&sample()).as_str().len(), 64);
    }

    #[test]
    fn hash_ignores_discovered_fields() {
        let base = paper_hash(&sample());
        let mut p = sample();
        p.external_ids = PaperIdentifiers {
            doi: Some("10.1109/cvpr.2016.90".into()),
            ..Default::default()
        };
        p.abstract_text = Some("We present a residual learning framework".into());
        p.citations.push(EnrichmentRecord::sourced("openalex", 100_000));
        assert_eq!(paper_hash(&p), base);
    }

    #[test]
    fn hash_normalizes_case_whitespace_and_author_order() {
        let p = PaperRecord::new(
            "  deep residual LEARNING ",
            &["xiangyu zhang", "Kaiming He"],
            "cvpr",
            Some(2016),
        );
        assert_eq!(paper_hash(&p), paper_hash(&sample()));
    }

    #[test]
    fn hash_changes_with_identity_fields() {
        let base = paper_hash(&sample());

        let mut p = sample();
        p.title = "Deep Residual Learning for Image Recognition".into();
        assert_ne!(paper_hash(&p), base);

        let mut p = sample();
        p.authors.pop();
        assert_ne!(paper_hash(&p), base);

        let mut p = sample();
        p.venue = "ICCV".into();
        assert_ne!(paper_hash(&p), base);

        let mut p = sample();
        p.year = Some(2015);
        assert_ne!(paper_hash(&p), base);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // Moving text between title and venue must not collide
        let a = PaperRecord::new("ab", &[], "c", None);
        let b = PaperRecord::new("a", &[], "bc", None);
        assert_ne!(paper_hash(&a), paper_hash(&b));
    }

    #[test]
    fn short_hash_length() {
        assert_eq!(paper_hash(&sample()).short().len(), 8);
    }
}

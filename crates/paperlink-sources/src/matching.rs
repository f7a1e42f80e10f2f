//! Fuzzy title matching shared by title-search sources

use strsim::normalized_levenshtein;

/// Default similarity a candidate title must reach to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.9;

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity in `[0, 1]` of two titles after normalization.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_title(a), normalize_title(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    normalized_levenshtein(&a, &b)
}

/// A search hit to be matched against a query title.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
}

/// Pick the most similar candidate at or above `threshold`.
///
/// Years more than one apart disqualify a candidate (preprint vs. proceedings
/// is allowed to differ by one). Ties keep the earlier candidate, i.e. the
/// source's own ranking.
pub fn best_match<'a>(
    title: &str,
    year: Option<i32>,
    candidates: &'a [Candidate],
    threshold: f64,
) -> Option<&'a Candidate> {
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in candidates {
        if let (Some(want), Some(got)) = (year, candidate.year) {
            if (want - got).abs() > 1 {
                continue;
            }
        }
        let score = title_similarity(title, &candidate.title);
        if score < threshold {
            continue;
        }
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, title: &str, year: Option<i32>) -> Candidate {
        Candidate {
            id: id.into(),
            title: title.into(),
            year,
        }
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(
            normalize_title("  BERT: Pre-training of Deep   Bidirectional Transformers "),
            "bert pre training of deep bidirectional transformers"
        );
    }

    #[test]
    fn exact_match_after_normalization() {
        assert_eq!(title_similarity("Attention Is All You Need.", "attention is all you need"), 1.0);
        assert_eq!(title_similarity("", "x"), 0.0);
    }

    #[test]
    fn picks_best_above_threshold() {
        let cands = vec![
            cand("W1", "Attention Is All You Need: A Survey", Some(2017)),
            cand("W2", "Attention is all you need", Some(2017)),
        ];
        let m = best_match("Attention Is All You Need", Some(2017), &cands, 0.9).unwrap();
        assert_eq!(m.id, "W2");
    }

    #[test]
    fn rejects_far_year_and_low_similarity() {
        let cands = vec![
            cand("W1", "Attention is all you need", Some(2009)),
            cand("W2", "Something else entirely", Some(2017)),
        ];
        assert!(best_match("Attention Is All You Need", Some(2017), &cands, 0.9).is_none());
        let m = best_match("Attention Is All You Need", None, &cands, 0.9).unwrap();
        assert_eq!(m.id, "W1");
    }
}

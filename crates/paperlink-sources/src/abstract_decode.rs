//! Decode OpenAlex abstract inverted index to plaintext
//!
//! OpenAlex stores abstracts as inverted indexes for legal reasons:
//! ```json
//! {"Despite": [0], "growing": [1], "interest": [2, 50], ...}
//! ```
//!
//! Words are placed back by position.

use serde_json::{Map, Value};

/// Decode inverted index to plaintext abstract
///
/// # Example
/// ```
/// use serde_json::json;
/// use paperlink_sources::abstract_decode::decode_inverted_index;
///
/// let index = json!({"Hello": [0], "world": [1]});
/// let text = decode_inverted_index(index.as_object().unwrap());
/// assert_eq!(text, "Hello world");
/// ```
pub fn decode_inverted_index(index: &Map<String, Value>) -> String {
    let mut pairs: Vec<(u64, &str)> = index
        .iter()
        .filter_map(|(word, positions)| Some((word, positions.as_array()?)))
        .flat_map(|(word, positions)| {
            positions
                .iter()
                .filter_map(Value::as_u64)
                .map(move |p| (p, word.as_str()))
        })
        .collect();

    // Object iteration order says nothing about word order
    pairs.sort_by_key(|(pos, _)| *pos);
    pairs.into_iter().map(|(_, w)| w).collect::<Vec<_>>().join(" ")
}

/// Decode an optional `abstract_inverted_index` value.
///
/// Null, non-object and empty indexes all yield `None`.
pub fn decode_abstract(value: Option<&Value>) -> Option<String> {
    let text = decode_inverted_index(value?.as_object()?);
    if text.trim().is_empty() { None } else { Some(text) }
}

//! The source contract the orchestrator programs against

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use paperlink_core::http::{http_client, send_json};
use paperlink_core::{
    BackoffPolicy, Clock, PaperHash, PaperIdentifiers, RateLimiter, SourceError, SourceRecord,
    retry_with_backoff,
};
use serde_json::Value;

use crate::config::SourceSettings;

/// What a source can do, queried by the orchestrator instead of hard-coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest number of ids accepted by one batch call
    pub max_batch_size: usize,
    /// Exact lookup of many papers by DOI / arXiv / PubMed id in one call
    pub supports_batch_lookup: bool,
    /// Fuzzy title search (`find_candidates`)
    pub supports_title_search: bool,
}

/// One paper to look up by title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleQuery {
    pub hash: PaperHash,
    pub title: String,
    pub year: Option<i32>,
}

/// How much of a record `fetch_fields` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
    /// Cross-reference identifiers only (cheap)
    Identifiers,
    /// Identifiers plus abstract, citation count, URLs and affiliations
    Full,
}

/// An external bibliographic source.
///
/// Every method issues its HTTP requests through the source's own rate
/// limiter and retries transient failures with backoff before returning.
/// Results are normalized into [`SourceRecord`] at this boundary.
pub trait SourceClient: Send + Sync {
    /// Stable name recorded as provenance (`"openalex"`, `"semantic_scholar"`).
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Map each query to the source's internal id of its best title match.
    /// Queries without an acceptable match are absent from the result.
    fn find_candidates(&self, queries: &[TitleQuery]) -> Result<HashMap<PaperHash, String>, SourceError>;

    /// Fetch records by the source's internal ids. Unknown ids are absent.
    fn fetch_fields(&self, ids: &[String], fields: FieldSet) -> Result<HashMap<String, SourceRecord>, SourceError>;

    /// Exact lookup by external identifiers in as few calls as possible.
    fn fetch_by_external_ids(
        &self,
        papers: &[(PaperHash, PaperIdentifiers)],
    ) -> Result<HashMap<PaperHash, SourceRecord>, SourceError> {
        let _ = papers;
        Err(SourceError::Unsupported(format!("{}: batch lookup by external id", self.name())))
    }

    /// The source's internal id for a paper, if already known.
    fn internal_id(&self, ids: &PaperIdentifiers) -> Option<String>;

    /// HTTP requests sent so far, retries included.
    fn api_calls(&self) -> u64;
}

/// Rate-limited, retrying JSON transport shared by the HTTP sources.
#[derive(Debug)]
pub struct SourceHttp {
    name: &'static str,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    timeout: Duration,
    calls: AtomicU64,
}

impl SourceHttp {
    pub fn new(name: &'static str, settings: &SourceSettings, default_rate: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            limiter: RateLimiter::new(settings.requests_per_second(default_rate), clock),
            backoff: settings.backoff(),
            timeout: settings.timeout(),
            calls: AtomicU64::new(0),
        }
    }

    /// Send a request built by `build`, once per attempt.
    ///
    /// Each attempt waits on the rate limiter first, so retries are paced too.
    pub fn send(&self, what: &str, build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder) -> Result<Value, SourceError> {
        let label = format!("{} {what}", self.name);
        retry_with_backoff(&label, &self.backoff, self.limiter.clock().as_ref(), || {
            self.limiter.acquire();
            self.calls.fetch_add(1, Ordering::Relaxed);
            send_json(build(http_client()), self.timeout)
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Clamp a source's hard batch limit by an optional configured cap.
pub fn effective_batch_size(source_max: usize, configured: Option<usize>) -> usize {
    configured.map_or(source_max, |c| c.min(source_max)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TitleOnly;

    impl SourceClient for TitleOnly {
        fn name(&self) -> &str {
            "title_only"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                max_batch_size: 10,
                supports_batch_lookup: false,
                supports_title_search: true,
            }
        }
        fn find_candidates(&self, _: &[TitleQuery]) -> Result<HashMap<PaperHash, String>, SourceError> {
            Ok(HashMap::new())
        }
        fn fetch_fields(&self, _: &[String], _: FieldSet) -> Result<HashMap<String, SourceRecord>, SourceError> {
            Ok(HashMap::new())
        }
        fn internal_id(&self, _: &PaperIdentifiers) -> Option<String> {
            None
        }
        fn api_calls(&self) -> u64 {
            0
        }
    }

    #[test]
    fn batch_lookup_defaults_to_unsupported() {
        let err = TitleOnly.fetch_by_external_ids(&[]).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported(_)));
    }

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(effective_batch_size(50, None), 50);
        assert_eq!(effective_batch_size(50, Some(10)), 10);
        assert_eq!(effective_batch_size(50, Some(500)), 50);
    }
}

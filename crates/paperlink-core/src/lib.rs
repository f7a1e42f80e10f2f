//! Paperlink Core - shared model and infrastructure for metadata consolidation
//!
//! Paper records with per-field provenance, content-derived paper identity,
//! the enrichment merger, and the plumbing every source client needs:
//! rate limiting, retry with backoff, and a shared HTTP client.

pub mod clock;
pub mod error;
pub mod http;
pub mod identity;
pub mod logging;
pub mod merge;
pub mod paper;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod shutdown;
pub mod work_queue;

// Re-exports for convenience
pub use clock::{Clock, FakeClock, SystemClock, system_clock};
pub use error::SourceError;
pub use identity::{PaperHash, paper_hash};
pub use logging::{IndicatifLogger, init_logging};
pub use merge::{Enrichment, EnrichmentMerger, merge_enrichments, merge_papers};
pub use paper::{
    Author, EnrichmentField, EnrichmentRecord, INPUT_SOURCE, PaperIdentifiers, PaperRecord,
    SourceRecord,
};
pub use progress::{ProgressContext, SharedProgress};
pub use rate_limit::RateLimiter;
pub use retry::{BackoffPolicy, retry_with_backoff};
pub use shutdown::ShutdownFlag;
pub use work_queue::WorkQueue;

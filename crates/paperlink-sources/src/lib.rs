//! paperlink-sources: External bibliographic sources
//!
//! Every source implements [`SourceClient`] and normalizes its wire format
//! into [`paperlink_core::SourceRecord`] before returning. The orchestrator
//! picks sources through [`SourceKind`] and reads their [`Capabilities`]
//! instead of assuming batch limits.

pub mod abstract_decode;
pub mod client;
pub mod config;
pub mod matching;
pub mod openalex;
pub mod registry;
pub mod semantic_scholar;

pub use client::{Capabilities, FieldSet, SourceClient, SourceHttp, TitleQuery};
pub use config::{SourceSettings, SourcesConfig};
pub use matching::{Candidate, best_match, normalize_title, title_similarity};
pub use openalex::OpenAlexClient;
pub use registry::SourceKind;
pub use semantic_scholar::SemanticScholarClient;

//! paperlink-store: Durable checkpoints for the consolidation pipeline
//!
//! One directory per session holds the session metadata, the phase state
//! and the papers saved so far. Every write is atomic and fsynced, and every
//! payload carries a blake3 integrity digest that is checked, but never
//! enforced, on load.

pub mod atomic;
pub mod checkpoint;
pub mod hash;
pub mod phase;
pub mod session;

pub use atomic::{write_atomic, write_json_atomic};
pub use checkpoint::{CheckpointManager, CleanFilter, LoadedSession, SessionRef};
pub use hash::{digest_json, hash_bytes, hash_file, short_hash};
pub use phase::{Phase, PhaseState};
pub use session::{
    CheckpointSession, IntegrityIssue, PhaseCounters, SessionMeta, SessionStatus, SessionSummary,
    SourceStats,
};

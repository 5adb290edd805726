//! TTL cache for collaborator results.
//!
//! This module provides:
//! - `TtlCache`, keyed storage with expiry persisted to one JSON index
//! - `CachedCollaborator`, which skips redundant external calls

mod cached;
mod ttl;

pub use cached::{cache_key, CachedCollaborator, FORCE_REFRESH};
pub use ttl::{CacheEntry, TtlCache, DEFAULT_TTL_SECONDS};

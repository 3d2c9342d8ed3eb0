//! Storage engine
//!
//! Embedded SQLite store with a vector sidecar, FTS5 shadow, and the
//! retrieval engine layered on top.

pub mod migrations;
mod retrieval;
mod sqlite;

pub use sqlite::{
    vector_from_bytes, vector_to_bytes, IntegrityReport, Result, Storage, StorageError,
    CONFIG_EMBEDDING_DIM, CONFIG_LAST_SCAN_TIME_MS, CONFIG_PROFILE_SLUG, CONFIG_SCHEMA_VERSION,
    DEFAULT_SCAN_COOLDOWN_SECS,
};

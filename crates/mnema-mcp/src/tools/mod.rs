//! MCP tools
//!
//! One module per tool family. Each module exposes `schema()` (JSON
//! Schema for the tool's arguments) and an `execute` function returning
//! a [`crate::envelope::ToolResult`]; the server wraps outcomes in the
//! uniform envelope.

use std::sync::Arc;

use mnema_core::{Indexer, Storage};

pub mod causal;
pub mod checkpoint;
pub mod context;
pub mod delete;
pub mod health;
pub mod index_scan;
pub mod list;
pub mod save;
pub mod search;
pub mod stats;
pub mod task;
pub mod triggers;
pub mod update;

/// Shared handles every tool executes against
#[derive(Clone)]
pub struct ToolContext {
    pub storage: Arc<Storage>,
    pub indexer: Arc<Indexer>,
}

impl ToolContext {
    pub fn new(storage: Arc<Storage>, indexer: Arc<Indexer>) -> Self {
        Self { storage, indexer }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use mnema_core::testing::stub_storage;
    use tempfile::TempDir;

    /// Context over a stub-embedded store in a temp directory
    pub fn test_context() -> (ToolContext, TempDir) {
        let (storage, dir) = stub_storage();
        let storage = Arc::new(storage);
        let indexer = Arc::new(Indexer::new(Arc::clone(&storage), dir.path().to_path_buf()));
        (ToolContext::new(storage, indexer), dir)
    }

    /// Write a memory file under the temp base dir
    pub fn write_memory_file(dir: &TempDir, rel: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }
}

//! Shared harness for the e2e suites
//!
//! Builds isolated workspaces: a temp directory holding the memory
//! roots plus a store on the deterministic stub embedder, so no test
//! downloads a model.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use mnema_core::testing::{StubEmbedder, STUB_DIM};
use mnema_core::{Indexer, Storage};

/// An isolated workspace: base dir with memory roots + open store
pub struct Workspace {
    pub storage: Arc<Storage>,
    pub indexer: Arc<Indexer>,
    /// Kept alive so the temp directory survives the test
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let provider = Arc::new(StubEmbedder::new(STUB_DIM));
        let storage = Arc::new(
            Storage::open(Some(dir.path().join("context-index-test.sqlite")), provider)
                .expect("failed to open test storage"),
        );
        let indexer = Arc::new(Indexer::new(Arc::clone(&storage), dir.path().to_path_buf()));
        Self {
            storage,
            indexer,
            dir,
        }
    }

    /// Write a memory file under the base dir, returning its absolute path
    pub fn write_memory_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(path.parent().expect("file has a parent")).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Reset the scan cooldown so consecutive scans run in one test
    pub fn reset_scan_cooldown(&self) {
        self.storage
            .config_set(mnema_core::storage::CONFIG_LAST_SCAN_TIME_MS, "0")
            .unwrap();
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory file with front-matter in the recognized layout
pub fn memory_file(
    title: &str,
    context_type: &str,
    tier: &str,
    triggers: &[&str],
    body: &str,
) -> String {
    format!(
        "---\ntitle: {title}\ncontext_type: {context_type}\nimportance_tier: {tier}\ntrigger_phrases: [{}]\n---\n{body}\n",
        triggers.join(", ")
    )
}

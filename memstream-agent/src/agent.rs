//! One agent's memory on disk and in RAM.
//!
//! ```text
//! <agent dir>/
//!   associative_memory/
//!     nodes.json
//!     kw_strength.json
//!     embeddings.json
//!   spatial_memory.json
//!   scratch.json
//! ```

use std::path::Path;
use std::time::Instant;

use memstream_core::memory::{MemoryStore, MemoryTree};
use memstream_core::persistence::files::{load_dir, save_dir};
use memstream_core::persistence::sqlite::CheckpointStore;
use memstream_core::{MemstreamConfig, Result};
use tracing::info;

use crate::scratch::PersonaScratch;

/// Subdirectory holding the memory stream.
pub const ASSOCIATIVE_DIR: &str = "associative_memory";
/// Spatial tree file.
pub const SPATIAL_FILE: &str = "spatial_memory.json";
/// Scratch file.
pub const SCRATCH_FILE: &str = "scratch.json";

/// A simulated agent's memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Tunables, counters, conversation.
    pub scratch: PersonaScratch,
    /// Long-term memory stream.
    pub store: MemoryStore,
    /// Known places.
    pub spatial: MemoryTree,
}

impl Agent {
    /// A fresh agent with empty memory.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &MemstreamConfig) -> Self {
        Self {
            scratch: PersonaScratch::new(name, config),
            store: MemoryStore::new(),
            spatial: MemoryTree::new(),
        }
    }

    /// Agent name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.scratch.name
    }

    /// Load an agent directory. Every part must load or nothing is returned.
    ///
    /// # Errors
    ///
    /// Fails on the first missing or malformed file.
    pub fn load(dir: &Path) -> Result<Self> {
        let start = Instant::now();
        let store = load_dir(&dir.join(ASSOCIATIVE_DIR))?;
        let spatial = MemoryTree::load(&dir.join(SPATIAL_FILE))?;
        let scratch = PersonaScratch::load(&dir.join(SCRATCH_FILE))?;
        info!(
            agent = %scratch.name,
            nodes = store.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Agent loaded"
        );
        Ok(Self { scratch, store, spatial })
    }

    /// Write the agent directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if any file cannot be written.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        save_dir(&self.store, &dir.join(ASSOCIATIVE_DIR))?;
        self.spatial.save(&dir.join(SPATIAL_FILE))?;
        self.scratch.save(&dir.join(SCRATCH_FILE))?;
        info!(agent = %self.name(), nodes = self.store.len(), dir = %dir.display(), "Agent saved");
        Ok(())
    }

    /// Checkpoint the memory stream into a SQLite store under this agent's name.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn checkpoint(&self, db: &CheckpointStore) -> Result<()> {
        db.save_store(self.name(), &self.store)
    }

    /// Replace the memory stream with this agent's last checkpoint.
    ///
    /// Returns `false` and leaves the store alone if there is none.
    ///
    /// # Errors
    ///
    /// A corrupt checkpoint is an error.
    pub fn restore_checkpoint(&mut self, db: &CheckpointStore) -> Result<bool> {
        match db.load_store(self.name())? {
            Some(store) => {
                self.store = store;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

//! Directory backend: the three artifacts as plain JSON files.
//!
//! ```text
//! <dir>/nodes.json
//! <dir>/kw_strength.json
//! <dir>/embeddings.json
//! ```
//!
//! Saving overwrites each file whole. Loading needs all three; a missing
//! or unparsable file aborts the load.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug_span, info};

use super::{EMBEDDINGS_FILE, KW_STRENGTH_FILE, NODES_FILE, StoreSnapshot};
use crate::error::{MemstreamError, Result};
use crate::memory::MemoryStore;
use crate::metrics;

/// Write `store` into `dir`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`MemstreamError::Io`] if a file cannot be written.
pub fn save_dir(store: &MemoryStore, dir: &Path) -> Result<()> {
    let _span = debug_span!("memstream::persist::save", dir = %dir.display()).entered();
    let start = Instant::now();

    std::fs::create_dir_all(dir)?;
    let mut bytes = 0;
    for (name, data) in StoreSnapshot::capture(store)?.to_artifacts()? {
        bytes += data.len();
        std::fs::write(dir.join(name), data)?;
    }

    metrics::global()
        .counters
        .saves_completed
        .fetch_add(1, Ordering::Relaxed);
    info!(
        dir = %dir.display(),
        nodes = store.len(),
        bytes,
        elapsed_us = start.elapsed().as_micros(),
        "Saved memory store"
    );
    Ok(())
}

/// Rebuild a store from `dir`.
///
/// # Errors
///
/// Returns [`MemstreamError::Corrupt`] if an artifact is missing or
/// malformed.
pub fn load_dir(dir: &Path) -> Result<MemoryStore> {
    let _span = debug_span!("memstream::persist::load", dir = %dir.display()).entered();
    let start = Instant::now();

    let nodes = read_artifact(dir, NODES_FILE)?;
    let kw_strength = read_artifact(dir, KW_STRENGTH_FILE)?;
    let embeddings = read_artifact(dir, EMBEDDINGS_FILE)?;
    let store = StoreSnapshot::from_artifacts(&nodes, &kw_strength, &embeddings)?.restore()?;

    metrics::global()
        .counters
        .loads_completed
        .fetch_add(1, Ordering::Relaxed);
    info!(
        dir = %dir.display(),
        nodes = store.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Loaded memory store"
    );
    Ok(store)
}

fn read_artifact(dir: &Path, name: &str) -> Result<Vec<u8>> {
    std::fs::read(dir.join(name)).map_err(|e| MemstreamError::Corrupt {
        artifact: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::tests::sample_store;

    #[test]
    fn directory_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = sample_store();
        save_dir(&store, dir.path()).expect("save");

        for name in [NODES_FILE, KW_STRENGTH_FILE, EMBEDDINGS_FILE] {
            assert!(dir.path().join(name).exists(), "{name} written");
        }
        let loaded = load_dir(dir.path()).expect("load");
        assert_eq!(loaded, store);
    }

    #[test]
    fn save_creates_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("klaus").join("associative_memory");
        save_dir(&MemoryStore::new(), &target).expect("save");
        let loaded = load_dir(&target).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_artifact_aborts_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_dir(&sample_store(), dir.path()).expect("save");
        std::fs::remove_file(dir.path().join(EMBEDDINGS_FILE)).expect("remove");

        let err = load_dir(dir.path());
        assert!(matches!(
            err,
            Err(MemstreamError::Corrupt { ref artifact, .. }) if artifact == EMBEDDINGS_FILE
        ));
    }

    #[test]
    fn truncated_node_table_aborts_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_dir(&sample_store(), dir.path()).expect("save");
        std::fs::write(dir.path().join(NODES_FILE), b"{\"node_1\": {").expect("truncate");

        assert!(matches!(
            load_dir(dir.path()),
            Err(MemstreamError::Corrupt { ref artifact, .. }) if artifact == NODES_FILE
        ));
    }
}

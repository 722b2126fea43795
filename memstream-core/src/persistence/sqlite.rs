//! SQLite checkpoint backend.
//!
//! Each agent's three artifacts are stored as rows of one table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memory_artifacts (
//!     agent      TEXT NOT NULL,
//!     artifact   TEXT NOT NULL,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT,
//!     PRIMARY KEY (agent, artifact)
//! );
//! ```
//!
//! - WAL mode so checkpoints can be read while a simulation runs
//! - the three rows of one agent are written in a single transaction
//! - a CRC-32 per row; a mismatch on load is fatal
//! - online backups with rotation

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, debug_span, info};

use super::{EMBEDDINGS_FILE, KW_STRENGTH_FILE, NODES_FILE, StoreSnapshot};
use crate::config::PersistenceConfig;
use crate::error::{MemstreamError, Result};
use crate::memory::MemoryStore;
use crate::metrics;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memory_artifacts (
    agent      TEXT NOT NULL,
    artifact   TEXT NOT NULL,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT,
    PRIMARY KEY (agent, artifact)
);";

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

/// CRC-32 (ISO 3309 / ITU-T V.42).
fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Handle to an SQLite database of agent memory checkpoints.
///
/// ```no_run
/// # use memstream_core::persistence::sqlite::CheckpointStore;
/// # use memstream_core::config::PersistenceConfig;
/// # use memstream_core::MemoryStore;
/// let db = CheckpointStore::open("town.db", &PersistenceConfig::default())?;
/// db.save_store("Klaus Mueller", &MemoryStore::new())?;
/// let restored = db.load_store("Klaus Mueller")?;
/// # Ok::<(), memstream_core::MemstreamError>(())
/// ```
pub struct CheckpointStore {
    conn: Connection,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "Checkpoint store opened");

        Ok(Self {
            conn,
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Checkpoints
    // ------------------------------------------------------------------

    /// Replace `agent`'s checkpoint with `store`.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if encoding fails, or
    /// [`MemstreamError::Database`] on SQLite failures. On error nothing
    /// is written.
    pub fn save_store(&self, agent: &str, store: &MemoryStore) -> Result<()> {
        let _span = debug_span!("memstream::persist::save", agent).entered();
        let start = Instant::now();
        let artifacts = StoreSnapshot::capture(store)?.to_artifacts()?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.unchecked_transaction()?;
        let mut bytes = 0;
        for (artifact, data) in &artifacts {
            let checksum = self.config.checksum_enabled.then(|| crc32_hex(data));
            bytes += data.len();
            tx.execute(
                "INSERT INTO memory_artifacts (agent, artifact, data, updated_at, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(agent, artifact) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at,
                    checksum = excluded.checksum",
                params![agent, artifact, data, now, checksum],
            )?;
        }
        tx.commit()?;

        metrics::global()
            .counters
            .saves_completed
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            agent,
            nodes = store.len(),
            bytes,
            elapsed_us = start.elapsed().as_micros(),
            "Saved checkpoint"
        );
        Ok(())
    }

    /// Load `agent`'s checkpoint. `None` if the agent was never saved.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Corrupt`] if only some artifacts exist, a
    /// checksum does not match, or an artifact fails to decode.
    pub fn load_store(&self, agent: &str) -> Result<Option<MemoryStore>> {
        let _span = debug_span!("memstream::persist::load", agent).entered();
        let start = Instant::now();

        let mut stmt = self.conn.prepare_cached(
            "SELECT artifact, data, checksum FROM memory_artifacts WHERE agent = ?1",
        )?;
        let rows = stmt.query_map(params![agent], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut nodes = None;
        let mut kw_strength = None;
        let mut embeddings = None;
        let mut found = 0;
        for row in rows {
            let (artifact, data, stored) = row?;
            found += 1;
            if self.config.checksum_enabled {
                if let Some(expected) = stored {
                    let actual = crc32_hex(&data);
                    if expected != actual {
                        return Err(MemstreamError::Corrupt {
                            artifact,
                            reason: format!("checksum {actual} does not match stored {expected}"),
                        });
                    }
                }
            }
            match artifact.as_str() {
                NODES_FILE => nodes = Some(data),
                KW_STRENGTH_FILE => kw_strength = Some(data),
                EMBEDDINGS_FILE => embeddings = Some(data),
                _ => debug!(agent, artifact = %artifact, "Ignoring unknown artifact row"),
            }
        }
        if found == 0 {
            return Ok(None);
        }

        let missing = |name: &str| MemstreamError::Corrupt {
            artifact: name.to_string(),
            reason: format!("checkpoint for '{agent}' has no such row"),
        };
        let nodes = nodes.ok_or_else(|| missing(NODES_FILE))?;
        let kw_strength = kw_strength.ok_or_else(|| missing(KW_STRENGTH_FILE))?;
        let embeddings = embeddings.ok_or_else(|| missing(EMBEDDINGS_FILE))?;
        let store = StoreSnapshot::from_artifacts(&nodes, &kw_strength, &embeddings)?.restore()?;

        metrics::global()
            .counters
            .loads_completed
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            agent,
            nodes = store.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Loaded checkpoint"
        );
        Ok(Some(store))
    }

    /// Delete `agent`'s checkpoint. Returns `true` if anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn delete_agent(&self, agent: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM memory_artifacts WHERE agent = ?1", params![agent])?;
        Ok(deleted > 0)
    }

    /// Agents with a checkpoint, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn list_agents(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT agent FROM memory_artifacts ORDER BY agent")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Number of agents with a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn agent_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT agent) FROM memory_artifacts",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
        backup.run_to_completion(256, std::time::Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Checkpoint backup completed"
        );
        Ok(())
    }

    /// Write `<db>.bak.1`, shifting older backups up and keeping at most
    /// `config.backup_count`.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] or [`MemstreamError::Io`].
    pub fn create_rotating_backup(&self) -> Result<()> {
        if self.db_path.as_os_str() == ":memory:" {
            return Ok(());
        }
        let max = self.config.backup_count;
        if max == 0 {
            return Ok(());
        }

        for i in (1..max).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                std::fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        self.backup(self.backup_path(1))?;

        info!(max_backups = max, "Rotating backup created");
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Path of the database file, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// `Ok(true)` if `PRAGMA integrity_check` reports no problems.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Reclaim unused space.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Database`] on SQLite failures.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}

//! Persisted form of a [`MemoryStore`].
//!
//! A store is persisted as three artifacts that are always written and
//! read together:
//!
//! | Artifact           | Content                                       |
//! |--------------------|-----------------------------------------------|
//! | `nodes.json`       | `node_<n>` → [`NodeRecord`]                   |
//! | `kw_strength.json` | event / thought keyword strength tables       |
//! | `embeddings.json`  | embedding key → vector                        |
//!
//! Indices are never persisted. [`StoreSnapshot::restore`] replays every
//! node through the normal insert path in id order, then lets a non-empty
//! persisted strength table replace the recomputed one.
//!
//! Two backends move snapshots to disk: [`files`] (one directory per
//! agent) and [`sqlite`] (checksummed rows in a checkpoint database).

pub mod files;
pub mod sqlite;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemstreamError, Result};
use crate::memory::{Evidence, KeywordStrength, MemoryNode, MemoryStore, NodeDraft};
use crate::types::{
    Embedding, NodeId, NodeKind, Timestamp, Triple, option_timestamp_format, timestamp_format,
};

/// Node table file name.
pub const NODES_FILE: &str = "nodes.json";
/// Keyword strength file name.
pub const KW_STRENGTH_FILE: &str = "kw_strength.json";
/// Embedding table file name.
pub const EMBEDDINGS_FILE: &str = "embeddings.json";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Numeric id.
    pub node_count: u64,
    /// Position within its kind.
    pub type_count: u64,
    /// `event`, `thought` or `chat`.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Derivation depth.
    pub depth: u32,
    /// Creation time.
    #[serde(with = "timestamp_format")]
    pub created: Timestamp,
    /// Expiry, if any.
    #[serde(with = "option_timestamp_format")]
    pub expiration: Option<Timestamp>,
    /// Last retrieval time. Older tables omit it; the creation time is used.
    #[serde(
        default,
        with = "option_timestamp_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_accessed: Option<Timestamp>,
    /// Triple subject.
    pub subject: String,
    /// Triple predicate.
    pub predicate: String,
    /// Triple object.
    pub object: String,
    /// Human-readable text.
    pub description: String,
    /// Key into the embedding table.
    pub embedding_key: String,
    /// Importance.
    pub poignancy: f32,
    /// Keywords, case preserved.
    pub keywords: Vec<String>,
    /// Evidence: node ids, a transcript, or `null`.
    pub filling: Value,
}

impl NodeRecord {
    /// Capture a node.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if the evidence cannot be
    /// encoded.
    pub fn from_node(node: &MemoryNode) -> Result<Self> {
        Ok(Self {
            node_count: node.id.get(),
            type_count: node.sequence_index,
            kind: node.kind,
            depth: node.depth,
            created: node.created_at,
            expiration: node.expires_at,
            last_accessed: Some(node.last_accessed_at),
            subject: node.triple.subject.clone(),
            predicate: node.triple.predicate.clone(),
            object: node.triple.object.clone(),
            description: node.description.clone(),
            embedding_key: node.embedding_key.clone(),
            poignancy: node.importance,
            keywords: node.keywords.iter().cloned().collect(),
            filling: node.evidence.to_filling()?,
        })
    }
}

/// Persisted keyword strength for events and thoughts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordStrengthTable {
    /// Event keyword counts.
    #[serde(default)]
    pub kw_strength_event: KeywordStrength,
    /// Thought keyword counts.
    #[serde(default)]
    pub kw_strength_thought: KeywordStrength,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The three persisted artifacts of one store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Node table in id order.
    pub nodes: BTreeMap<NodeId, NodeRecord>,
    /// Keyword strength override.
    pub kw_strength: KeywordStrengthTable,
    /// Embedding table.
    pub embeddings: BTreeMap<String, Embedding>,
}

impl StoreSnapshot {
    /// Capture everything needed to rebuild `store`.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if a node's evidence
    /// cannot be encoded.
    pub fn capture(store: &MemoryStore) -> Result<Self> {
        let nodes = store
            .iter()
            .map(|n| Ok((n.id, NodeRecord::from_node(n)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let strength = |kind| store.keyword_strength(kind).cloned().unwrap_or_default();
        Ok(Self {
            nodes,
            kw_strength: KeywordStrengthTable {
                kw_strength_event: strength(NodeKind::Event),
                kw_strength_thought: strength(NodeKind::Thought),
            },
            embeddings: store
                .embeddings()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Rebuild a store by replaying `node_1..=node_N` through the insert
    /// operations.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Corrupt`] if an id in the sequence is
    /// missing, a record disagrees with its key, or a node's embedding key
    /// has no vector. Evidence that does not match the node kind is a
    /// [`MemstreamError::Serialization`] error.
    pub fn restore(self) -> Result<MemoryStore> {
        let Self {
            mut nodes,
            kw_strength,
            embeddings,
        } = self;
        let mut store = MemoryStore::new();

        for n in 1..=nodes.len() as u64 {
            let id = NodeId(n);
            let record = nodes
                .remove(&id)
                .ok_or_else(|| corrupt_nodes(format!("{id} is missing")))?;
            if record.node_count != n {
                return Err(corrupt_nodes(format!(
                    "{id} records node_count {}",
                    record.node_count
                )));
            }
            let vector = embeddings.get(&record.embedding_key).cloned().ok_or_else(|| {
                MemstreamError::Corrupt {
                    artifact: EMBEDDINGS_FILE.to_string(),
                    reason: format!("no vector for embedding key '{}'", record.embedding_key),
                }
            })?;

            let kind = record.kind;
            let last_accessed = record.last_accessed;
            let keywords: BTreeSet<String> = record.keywords.into_iter().collect();
            let mut draft = NodeDraft::new(
                record.created,
                Triple::new(record.subject, record.predicate, record.object),
                record.description,
            )
            .keywords(keywords)
            .importance(record.poignancy)
            .embedding(record.embedding_key, vector)
            .evidence(Evidence::from_filling(kind, record.filling)?);
            if let Some(at) = record.expiration {
                draft = draft.expires(at);
            }

            let inserted = store.replay(kind, draft);
            if let Some(at) = last_accessed {
                store.mark_accessed(inserted, at)?;
            }
        }

        if !kw_strength.kw_strength_event.is_empty() {
            store.override_strength(NodeKind::Event, kw_strength.kw_strength_event);
        }
        if !kw_strength.kw_strength_thought.is_empty() {
            store.override_strength(NodeKind::Thought, kw_strength.kw_strength_thought);
        }
        Ok(store)
    }

    /// Encode the three artifacts as JSON bytes, in
    /// `[nodes, kw_strength, embeddings]` order.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if encoding fails.
    pub fn to_artifacts(&self) -> Result<[(&'static str, Vec<u8>); 3]> {
        Ok([
            (NODES_FILE, serde_json::to_vec(&self.nodes)?),
            (KW_STRENGTH_FILE, serde_json::to_vec(&self.kw_strength)?),
            (EMBEDDINGS_FILE, serde_json::to_vec(&self.embeddings)?),
        ])
    }

    /// Decode the three artifacts. Each one is required.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Corrupt`] naming the artifact that failed
    /// to parse.
    pub fn from_artifacts(nodes: &[u8], kw_strength: &[u8], embeddings: &[u8]) -> Result<Self> {
        Ok(Self {
            nodes: parse(NODES_FILE, nodes)?,
            kw_strength: parse(KW_STRENGTH_FILE, kw_strength)?,
            embeddings: parse(EMBEDDINGS_FILE, embeddings)?,
        })
    }
}

fn parse<T: serde::de::DeserializeOwned>(artifact: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| MemstreamError::Corrupt {
        artifact: artifact.to_string(),
        reason: e.to_string(),
    })
}

fn corrupt_nodes(reason: String) -> MemstreamError {
    MemstreamError::Corrupt {
        artifact: NODES_FILE.to_string(),
        reason,
    }
}

//! Memory nodes: one unit of memory (event, thought or chat).
//!
//! A node is a value object. Apart from `last_accessed_at`, which the
//! retrieval engine refreshes, nothing about it changes after insertion.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemstreamError, Result};
use crate::types::{NodeId, NodeKind, Timestamp, Triple};

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

/// One conversational turn: who spoke and what they said.
///
/// Serializes as a two-element array `[speaker, line]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Utterance {
    /// Name of the speaker.
    pub speaker: String,
    /// What they said.
    pub line: String,
}

impl Utterance {
    /// Create a new utterance.
    #[must_use]
    pub fn new(speaker: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            line: line.into(),
        }
    }
}

impl From<(String, String)> for Utterance {
    fn from((speaker, line): (String, String)) -> Self {
        Self { speaker, line }
    }
}

impl From<Utterance> for (String, String) {
    fn from(u: Utterance) -> Self {
        (u.speaker, u.line)
    }
}

/// What a node was derived from.
///
/// Thoughts cite the nodes they were synthesized from; events may cite
/// the chat node they produced; chats carry their transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// Supporting node ids.
    Nodes(Vec<NodeId>),
    /// Turn-by-turn conversation transcript.
    Transcript(Vec<Utterance>),
}

impl Default for Evidence {
    fn default() -> Self {
        Self::Nodes(Vec::new())
    }
}

impl Evidence {
    /// Supporting node ids, empty for transcripts.
    #[must_use]
    pub fn node_ids(&self) -> &[NodeId] {
        match self {
            Self::Nodes(ids) => ids,
            Self::Transcript(_) => &[],
        }
    }

    /// Transcript turns, empty for node evidence.
    #[must_use]
    pub fn transcript(&self) -> &[Utterance] {
        match self {
            Self::Nodes(_) => &[],
            Self::Transcript(turns) => turns,
        }
    }

    /// `true` if there is no evidence at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Nodes(ids) => ids.is_empty(),
            Self::Transcript(turns) => turns.is_empty(),
        }
    }

    /// Persisted `filling` value. Empty evidence is written as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if encoding fails.
    pub fn to_filling(&self) -> Result<Value> {
        if self.is_empty() {
            return Ok(Value::Null);
        }
        let value = match self {
            Self::Nodes(ids) => serde_json::to_value(ids)?,
            Self::Transcript(turns) => serde_json::to_value(turns)?,
        };
        Ok(value)
    }

    /// Decode a persisted `filling` value, using `kind` to pick the variant.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::Serialization`] if the value does not have
    /// the shape expected for `kind`.
    pub fn from_filling(kind: NodeKind, filling: Value) -> Result<Self> {
        if filling.is_null() {
            return Ok(match kind {
                NodeKind::Chat => Self::Transcript(Vec::new()),
                NodeKind::Event | NodeKind::Thought => Self::Nodes(Vec::new()),
            });
        }
        match kind {
            NodeKind::Chat => Ok(Self::Transcript(serde_json::from_value(filling)?)),
            NodeKind::Event | NodeKind::Thought => Ok(Self::Nodes(
                serde_json::from_value(filling).map_err(|e| {
                    MemstreamError::Serialization(format!("{kind} filling: {e}"))
                })?,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryNode
// ---------------------------------------------------------------------------

/// A single memory record.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    /// Store-wide identifier, assigned at insertion.
    pub id: NodeId,
    /// 1-based position within its own kind's insertion order.
    pub sequence_index: u64,
    /// Event, thought or chat.
    pub kind: NodeKind,
    /// 0 for events and chats; derivation depth for thoughts.
    pub depth: u32,
    /// When the node was recorded.
    pub created_at: Timestamp,
    /// Optional expiry.
    pub expires_at: Option<Timestamp>,
    /// Last time retrieval returned this node.
    pub last_accessed_at: Timestamp,
    /// Subject-predicate-object meaning.
    pub triple: Triple,
    /// Human-readable text.
    pub description: String,
    /// Key into the store's embedding table.
    pub embedding_key: String,
    /// Poignancy, as scored by the collaborator.
    pub importance: f32,
    /// Case-preserved keywords.
    pub keywords: BTreeSet<String>,
    /// What this node was derived from.
    pub evidence: Evidence,
}

impl MemoryNode {
    /// The subject-predicate-object triple.
    #[must_use]
    pub fn spo(&self) -> &Triple {
        &self.triple
    }

    /// Refresh the access time. Never moves it before `created_at`.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_accessed_at = now.max(self.created_at);
    }

    /// `true` if the embedding key carries the idle marker.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.embedding_key.contains(crate::types::IDLE_MARKER)
    }
}

/// Rewrite an event description that carries a parenthesized clause to
/// "first three words + clause content", dropping the final character.
///
/// `"Isabella Rodriguez is idle (sleeping)"` becomes
/// `"Isabella Rodriguez is sleeping"`.
#[must_use]
pub fn normalize_event_description(description: &str) -> String {
    if !description.contains('(') {
        return description.to_string();
    }
    let head = description
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    let mut clause = description
        .rsplit('(')
        .next()
        .unwrap_or_default()
        .to_string();
    clause.pop();
    format!("{head} {clause}")
}

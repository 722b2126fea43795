//! The memory store and its associative indices.
//!
//! [`MemoryStore`] owns every node an agent has recorded, plus:
//!
//! - one most-recent-first sequence per [`NodeKind`]
//! - one lower-cased keyword index per kind
//! - keyword-strength counters for events and thoughts
//! - the embedding table (embedding key → vector)
//!
//! Nodes are never removed. All indices are updated inside the same
//! `&mut self` call that makes a node visible, so no reader can observe a
//! node that is missing from an index.

pub mod index;
pub mod node;
pub mod spatial;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use tracing::debug;

use crate::error::{MemstreamError, Result};
use crate::types::{Embedding, NodeId, NodeKind, Timestamp, Triple};

pub use index::{KeywordIndex, KeywordStrength};
pub use node::{Evidence, MemoryNode, Utterance, normalize_event_description};
pub use spatial::MemoryTree;

// ---------------------------------------------------------------------------
// Insertion input
// ---------------------------------------------------------------------------

/// Everything the caller supplies when inserting a node.
///
/// Identity, sequence position and depth are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    /// When the node was recorded.
    pub created: Timestamp,
    /// Optional expiry.
    pub expires: Option<Timestamp>,
    /// Subject-predicate-object meaning.
    pub triple: Triple,
    /// Human-readable text.
    pub description: String,
    /// Case-preserved keywords.
    pub keywords: BTreeSet<String>,
    /// Poignancy.
    pub importance: f32,
    /// Key into the embedding table.
    pub embedding_key: String,
    /// Vector stored under `embedding_key`.
    pub embedding: Embedding,
    /// Supporting nodes or transcript.
    pub evidence: Evidence,
}

impl NodeDraft {
    /// Start a draft. The embedding key defaults to the description.
    #[must_use]
    pub fn new(created: Timestamp, triple: Triple, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            created,
            expires: None,
            triple,
            embedding_key: description.clone(),
            description,
            keywords: BTreeSet::new(),
            importance: 1.0,
            embedding: Embedding(Vec::new()),
            evidence: Evidence::default(),
        }
    }

    /// Set the expiry.
    #[must_use]
    pub fn expires(mut self, at: Timestamp) -> Self {
        self.expires = Some(at);
        self
    }

    /// Set the keywords.
    #[must_use]
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the poignancy.
    #[must_use]
    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    /// Set the embedding key and vector.
    #[must_use]
    pub fn embedding(mut self, key: impl Into<String>, vector: Embedding) -> Self {
        self.embedding_key = key.into();
        self.embedding = vector;
        self
    }

    /// Set the evidence.
    #[must_use]
    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// One agent's associative memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    /// Node `n` lives at index `n - 1`.
    nodes: Vec<MemoryNode>,
    seq_event: VecDeque<NodeId>,
    seq_thought: VecDeque<NodeId>,
    seq_chat: VecDeque<NodeId>,
    kw_event: KeywordIndex,
    kw_thought: KeywordIndex,
    kw_chat: KeywordIndex,
    strength_event: KeywordStrength,
    strength_thought: KeywordStrength,
    embeddings: HashMap<String, Embedding>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- insertion ----------------------------------------------------------

    /// Record an observed event.
    ///
    /// A description containing a parenthesized clause is normalized with
    /// [`normalize_event_description`].
    pub fn insert_event(&mut self, mut draft: NodeDraft) -> &MemoryNode {
        draft.description = normalize_event_description(&draft.description);
        self.insert(NodeKind::Event, draft, 0)
    }

    /// Record a synthesized thought.
    ///
    /// Depth is `1 + max(depth of each evidence node)`. Evidence ids that
    /// are not in the store contribute nothing.
    pub fn insert_thought(&mut self, draft: NodeDraft) -> &MemoryNode {
        let deepest = draft
            .evidence
            .node_ids()
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|n| n.depth)
            .max()
            .unwrap_or(0);
        self.insert(NodeKind::Thought, draft, deepest + 1)
    }

    /// Record a conversation. Chat keywords are indexed but never counted
    /// toward keyword strength.
    pub fn insert_chat(&mut self, draft: NodeDraft) -> &MemoryNode {
        self.insert(NodeKind::Chat, draft, 0)
    }

    /// Re-insert a persisted node. Event descriptions were normalized when
    /// first recorded and are kept verbatim.
    pub(crate) fn replay(&mut self, kind: NodeKind, draft: NodeDraft) -> NodeId {
        match kind {
            NodeKind::Event => self.insert(NodeKind::Event, draft, 0).id,
            NodeKind::Thought => self.insert_thought(draft).id,
            NodeKind::Chat => self.insert_chat(draft).id,
        }
    }

    fn insert(&mut self, kind: NodeKind, draft: NodeDraft, depth: u32) -> &MemoryNode {
        let id = NodeId(self.nodes.len() as u64 + 1);
        let sequence_index = self.sequence(kind).len() as u64 + 1;

        let lowered: BTreeSet<String> = draft.keywords.iter().map(|k| k.to_lowercase()).collect();
        let counted = kind != NodeKind::Chat && !draft.triple.is_idle();

        {
            let index = self.keyword_index_mut(kind);
            for kw in &lowered {
                index.push_front(kw, id);
            }
        }
        if counted {
            if let Some(strength) = self.strength_mut(kind) {
                for kw in &lowered {
                    strength.increment(kw);
                }
            }
        }
        self.sequence_mut(kind).push_front(id);
        self.embeddings
            .insert(draft.embedding_key.clone(), draft.embedding);

        self.nodes.push(MemoryNode {
            id,
            sequence_index,
            kind,
            depth,
            created_at: draft.created,
            expires_at: draft.expires,
            last_accessed_at: draft.created,
            triple: draft.triple,
            description: draft.description,
            embedding_key: draft.embedding_key,
            importance: draft.importance,
            keywords: draft.keywords,
            evidence: draft.evidence,
        });

        debug!(node = %id, %kind, depth, keywords = lowered.len(), "Inserted memory node");
        crate::metrics::global().counters.record_insert(kind);

        let last = self.nodes.len() - 1;
        &self.nodes[last]
    }

    // -- associative lookups ------------------------------------------------

    /// Distinct triples of the `retention` most recent events.
    #[must_use]
    pub fn summarized_recent_event_triples(&self, retention: usize) -> HashSet<Triple> {
        self.seq_event
            .iter()
            .take(retention)
            .filter_map(|id| self.node(*id))
            .map(|n| n.triple.clone())
            .collect()
    }

    /// Events whose keywords match any of `subject`, `predicate`, `object`.
    #[must_use]
    pub fn relevant_events(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Vec<&MemoryNode> {
        self.probe(&self.kw_event, subject, predicate, object)
    }

    /// Thoughts whose keywords match any of `subject`, `predicate`, `object`.
    #[must_use]
    pub fn relevant_thoughts(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Vec<&MemoryNode> {
        self.probe(&self.kw_thought, subject, predicate, object)
    }

    /// Probe an index with each string independently and union the hits,
    /// keeping first-seen order. The predicate must match a key exactly;
    /// subject and object fall back to their lower-cased form.
    fn probe(
        &self,
        index: &KeywordIndex,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Vec<&MemoryNode> {
        fn lookup<'a>(
            index: &'a KeywordIndex,
            probe: &str,
            fold: bool,
        ) -> Option<&'a VecDeque<NodeId>> {
            index
                .get(probe)
                .or_else(|| if fold { index.get(&probe.to_lowercase()) } else { None })
        }

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let probes = [
            lookup(index, subject, true),
            lookup(index, predicate, false),
            lookup(index, object, true),
        ];
        for ids in probes.into_iter().flatten() {
            for id in ids {
                if seen.insert(*id) {
                    if let Some(node) = self.node(*id) {
                        hits.push(node);
                    }
                }
            }
        }
        hits
    }

    /// Most recent chat node with `name`, if the agent ever chatted with them.
    #[must_use]
    pub fn last_chat_with(&self, name: &str) -> Option<&MemoryNode> {
        self.kw_chat
            .get(&name.to_lowercase())
            .and_then(|ids| ids.front())
            .and_then(|id| self.node(*id))
    }

    // -- accessors ----------------------------------------------------------

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&MemoryNode> {
        let idx = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.nodes.get(idx)
    }

    /// Look up a node by id, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::NodeNotFound`] for unknown ids.
    pub fn get(&self, id: NodeId) -> Result<&MemoryNode> {
        self.node(id).ok_or(MemstreamError::NodeNotFound(id))
    }

    /// Set a node's last access time (clamped to its creation time).
    ///
    /// # Errors
    ///
    /// Returns [`MemstreamError::NodeNotFound`] for unknown ids.
    pub fn mark_accessed(&mut self, id: NodeId, now: Timestamp) -> Result<()> {
        let idx = usize::try_from(id.0)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or(MemstreamError::NodeNotFound(id))?;
        let node = self
            .nodes
            .get_mut(idx)
            .ok_or(MemstreamError::NodeNotFound(id))?;
        node.touch(now);
        Ok(())
    }

    /// All nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryNode> {
        self.nodes.iter()
    }

    /// Ids of one kind, most recent first.
    #[must_use]
    pub fn sequence(&self, kind: NodeKind) -> &VecDeque<NodeId> {
        match kind {
            NodeKind::Event => &self.seq_event,
            NodeKind::Thought => &self.seq_thought,
            NodeKind::Chat => &self.seq_chat,
        }
    }

    /// Nodes of one kind, most recent first.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &MemoryNode> {
        self.sequence(kind).iter().filter_map(|id| self.node(*id))
    }

    /// Events, most recent first.
    pub fn events(&self) -> impl Iterator<Item = &MemoryNode> {
        self.nodes_of(NodeKind::Event)
    }

    /// Thoughts, most recent first.
    pub fn thoughts(&self) -> impl Iterator<Item = &MemoryNode> {
        self.nodes_of(NodeKind::Thought)
    }

    /// Chats, most recent first.
    pub fn chats(&self) -> impl Iterator<Item = &MemoryNode> {
        self.nodes_of(NodeKind::Chat)
    }

    /// The keyword index for one kind.
    #[must_use]
    pub fn keyword_index(&self, kind: NodeKind) -> &KeywordIndex {
        match kind {
            NodeKind::Event => &self.kw_event,
            NodeKind::Thought => &self.kw_thought,
            NodeKind::Chat => &self.kw_chat,
        }
    }

    /// Keyword strength for events or thoughts. Chats have none.
    #[must_use]
    pub fn keyword_strength(&self, kind: NodeKind) -> Option<&KeywordStrength> {
        match kind {
            NodeKind::Event => Some(&self.strength_event),
            NodeKind::Thought => Some(&self.strength_thought),
            NodeKind::Chat => None,
        }
    }

    /// Replace a strength table wholesale. Used when a persisted table
    /// overrides the counts recomputed during replay.
    pub fn override_strength(&mut self, kind: NodeKind, strength: KeywordStrength) {
        if let Some(slot) = self.strength_mut(kind) {
            *slot = strength;
        }
    }

    /// Vector stored under `key`.
    #[must_use]
    pub fn embedding(&self, key: &str) -> Option<&Embedding> {
        self.embeddings.get(key)
    }

    /// The whole embedding table.
    #[must_use]
    pub fn embeddings(&self) -> &HashMap<String, Embedding> {
        &self.embeddings
    }

    /// Total nodes ever inserted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes of one kind.
    #[must_use]
    pub fn count(&self, kind: NodeKind) -> usize {
        self.sequence(kind).len()
    }

    /// `true` if there is at least one event or thought.
    #[must_use]
    pub fn has_reflectable(&self) -> bool {
        !self.seq_event.is_empty() || !self.seq_thought.is_empty()
    }

    // -- text dumps ---------------------------------------------------------

    /// One line per event, most recent first.
    #[must_use]
    pub fn describe_events(&self) -> String {
        self.describe_seq(NodeKind::Event, "Event")
    }

    /// One line per thought, most recent first.
    #[must_use]
    pub fn describe_thoughts(&self) -> String {
        self.describe_seq(NodeKind::Thought, "Thought")
    }

    /// Every chat with its transcript, most recent first.
    #[must_use]
    pub fn describe_chats(&self) -> String {
        let mut out = String::new();
        for chat in self.chats() {
            let _ = writeln!(out, "with {} ({})", chat.triple.object, chat.description);
            let _ = writeln!(out, "{}", chat.created_at.format("%B %d, %Y, %H:%M:%S"));
            for turn in chat.evidence.transcript() {
                let _ = writeln!(out, "{}: {}", turn.speaker, turn.line);
            }
        }
        out
    }

    fn describe_seq(&self, kind: NodeKind, label: &str) -> String {
        let total = self.count(kind);
        let mut out = String::new();
        for (i, node) in self.nodes_of(kind).enumerate() {
            let _ = writeln!(
                out,
                "{label} {}: {} -- {}",
                total - i,
                node.triple,
                node.description
            );
        }
        out
    }

    // -- internals ----------------------------------------------------------

    fn sequence_mut(&mut self, kind: NodeKind) -> &mut VecDeque<NodeId> {
        match kind {
            NodeKind::Event => &mut self.seq_event,
            NodeKind::Thought => &mut self.seq_thought,
            NodeKind::Chat => &mut self.seq_chat,
        }
    }

    fn keyword_index_mut(&mut self, kind: NodeKind) -> &mut KeywordIndex {
        match kind {
            NodeKind::Event => &mut self.kw_event,
            NodeKind::Thought => &mut self.kw_thought,
            NodeKind::Chat => &mut self.kw_chat,
        }
    }

    fn strength_mut(&mut self, kind: NodeKind) -> Option<&mut KeywordStrength> {
        match kind {
            NodeKind::Event => Some(&mut self.strength_event),
            NodeKind::Thought => Some(&mut self.strength_thought),
            NodeKind::Chat => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

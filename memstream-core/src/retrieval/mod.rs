//! Memory retrieval: fused recency / relevance / importance ranking.
//!
//! For each focal point:
//!
//! 1. Candidates are every event and thought whose embedding key is not
//!    idle, ordered by last access, oldest first.
//! 2. Raw recency, relevance and importance are computed per candidate and
//!    each is min-max normalized over the candidate set ([`scoring`]).
//! 3. The weighted signals are fused and the top `n` are returned.
//! 4. Every returned node's last access time is set to `now`.
//!
//! Ties on the fused score go to the more recently accessed node, then to
//! the higher node id.

pub mod scoring;

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{RetrievalConfig, RetrievalWeights};
use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::memory::{MemoryNode, MemoryStore};
use crate::metrics;
use crate::types::{Embedding, NodeId, RetrievalScore, Timestamp};

/// Breakdown of a fused score into its weighted components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// `recency_w · recency' · 0.5`
    pub recency: f64,
    /// `relevance_w · relevance' · 3`
    pub relevance: f64,
    /// `importance_w · importance' · 2`
    pub importance: f64,
}

impl ScoreBreakdown {
    /// Sum of the three components.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.recency + self.relevance + self.importance
    }
}

/// One ranked node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// The retrieved node.
    pub node_id: NodeId,
    /// Fused score.
    pub score: RetrievalScore,
    /// Per-signal contributions.
    pub breakdown: ScoreBreakdown,
}

/// Ranked nodes for one focal point, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocalRetrieval {
    /// The query text.
    pub focal_point: String,
    /// Best-first results, at most `top_n`.
    pub results: Vec<RetrievalResult>,
}

impl FocalRetrieval {
    /// Ids of the results, best first.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.results.iter().map(|r| r.node_id).collect()
    }
}

/// Keyword-associated memories for one perceived event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociativeRetrieval {
    /// The perceived event.
    pub event: NodeId,
    /// Events sharing a keyword with it (may include the event itself).
    pub events: Vec<NodeId>,
    /// Thoughts sharing a keyword with it.
    pub thoughts: Vec<NodeId>,
}

/// Tunables for one retrieval call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Signal weights.
    pub weights: RetrievalWeights,
    /// Geometric recency decay per access step.
    pub recency_decay: f64,
    /// Results per focal point.
    pub top_n: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            weights: cfg.weights,
            recency_decay: cfg.recency_decay,
            top_n: cfg.top_n,
        }
    }
}

/// Ranks memories against focal points.
#[derive(Debug, Clone, Default)]
pub struct RetrievalEngine {
    params: RetrievalParams,
}

impl RetrievalEngine {
    /// Create an engine with explicit parameters.
    #[must_use]
    pub fn new(params: RetrievalParams) -> Self {
        Self { params }
    }

    /// Same engine, different result count.
    #[must_use]
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.params.top_n = top_n;
        self
    }

    /// Current parameters.
    #[must_use]
    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Rank the store against each focal point and mark the winners as
    /// accessed at `now`.
    ///
    /// A focal point the embedder cannot embed gets an empty result; the
    /// remaining focal points are still ranked.
    pub fn retrieve<S: AsRef<str>>(
        &self,
        store: &mut MemoryStore,
        embedder: &dyn EmbeddingProvider,
        focal_points: &[S],
        now: Timestamp,
    ) -> Vec<FocalRetrieval> {
        let _span = tracing::debug_span!("memstream::retrieve", focal_points = focal_points.len())
            .entered();
        let mut out = Vec::with_capacity(focal_points.len());
        for focal in focal_points {
            let focal = focal.as_ref();
            let results = match embedder.embed(focal) {
                Ok(query) => {
                    let _timer = metrics::global().retrieval_latency.start();
                    self.rank(store, &query)
                }
                Err(e) => {
                    warn!(focal_point = focal, error = %e, "Focal point embedding failed");
                    Vec::new()
                }
            };
            for r in &results {
                // Ranked ids come from the store itself.
                let _ = store.mark_accessed(r.node_id, now);
            }
            metrics::global()
                .counters
                .retrievals
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(focal_point = focal, returned = results.len(), "Ranked focal point");
            out.push(FocalRetrieval {
                focal_point: focal.to_string(),
                results,
            });
        }
        out
    }

    /// Rank without side effects.
    #[must_use]
    pub fn rank(&self, store: &MemoryStore, query: &Embedding) -> Vec<RetrievalResult> {
        let candidates = candidates(store);
        if candidates.is_empty() {
            return Vec::new();
        }

        let recency = scoring::normalize_scores(
            &scoring::recency_scores(candidates.len(), self.params.recency_decay),
            0.0,
            1.0,
        );
        let importance: Vec<f64> = candidates.iter().map(|n| f64::from(n.importance)).collect();
        let importance = scoring::normalize_scores(&importance, 0.0, 1.0);
        let relevance: Vec<f64> = candidates
            .iter()
            .map(|n| {
                store
                    .embedding(&n.embedding_key)
                    .map_or(0.0, |e| cosine_similarity(query, e))
            })
            .collect();
        let relevance = scoring::normalize_scores(&relevance, 0.0, 1.0);

        let mut scored: Vec<(&MemoryNode, ScoreBreakdown)> = candidates
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let b = scoring::fuse(
                    &self.params.weights,
                    recency[i],
                    relevance[i],
                    importance[i],
                );
                (*node, b)
            })
            .collect();

        scored.sort_by(|(na, a), (nb, b)| {
            b.total()
                .total_cmp(&a.total())
                .then_with(|| nb.last_accessed_at.cmp(&na.last_accessed_at))
                .then_with(|| nb.id.cmp(&na.id))
        });
        scored.truncate(self.params.top_n);

        scored
            .into_iter()
            .map(|(node, breakdown)| RetrievalResult {
                node_id: node.id,
                score: RetrievalScore::new(breakdown.total()),
                breakdown,
            })
            .collect()
    }

    /// For each perceived event, the events and thoughts that share a
    /// keyword with its subject, predicate or object.
    #[must_use]
    pub fn related_to_events(
        store: &MemoryStore,
        perceived: &[NodeId],
    ) -> Vec<AssociativeRetrieval> {
        perceived
            .iter()
            .filter_map(|id| store.node(*id))
            .map(|event| {
                let t = event.spo();
                let ids = |nodes: Vec<&MemoryNode>| nodes.iter().map(|n| n.id).collect::<Vec<_>>();
                AssociativeRetrieval {
                    event: event.id,
                    events: ids(store.relevant_events(&t.subject, &t.predicate, &t.object)),
                    thoughts: ids(store.relevant_thoughts(&t.subject, &t.predicate, &t.object)),
                }
            })
            .collect()
    }
}

/// Non-idle events and thoughts, oldest access first (id breaks ties).
fn candidates(store: &MemoryStore) -> Vec<&MemoryNode> {
    let mut nodes: Vec<&MemoryNode> = store
        .events()
        .chain(store.thoughts())
        .filter(|n| !n.is_idle())
        .collect();
    nodes.sort_by(|a, b| match a.last_accessed_at.cmp(&b.last_accessed_at) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
    nodes
}

/// Distinct node ids across several focal retrievals, in first-seen order.
#[must_use]
pub fn union_of(retrievals: &[FocalRetrieval]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    retrievals
        .iter()
        .flat_map(|r| r.results.iter().map(|x| x.node_id))
        .filter(|id| seen.insert(*id))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingEmbeddingProvider, StubEmbeddingProvider};
    use crate::memory::NodeDraft;
    use crate::types::Triple;
    use chrono::NaiveDate;

    fn at(minute: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2023, 2, 13)
            .and_then(|d| d.and_hms_opt(10, minute, 0))
            .expect("valid time")
    }

    fn add(store: &mut MemoryStore, minute: u32, desc: &str, importance: f32) -> NodeId {
        let draft = NodeDraft::new(at(minute), Triple::new("x", "is", desc), desc)
            .importance(importance)
            .embedding(desc, Embedding(vec![1.0, 0.0, 0.0]));
        store.insert_event(draft).id
    }

    #[test]
    fn ranking_scenario_matches_formula_exactly() {
        let mut store = MemoryStore::new();
        // Access order oldest to newest: C, B, A.
        let c = add(&mut store, 0, "c happens", 5.0);
        let b = add(&mut store, 1, "b happens", 10.0);
        let a = add(&mut store, 2, "a happens", 1.0);

        let engine = RetrievalEngine::new(RetrievalParams {
            weights: RetrievalWeights::default(),
            recency_decay: 0.99,
            top_n: 3,
        });
        let query = Embedding(vec![1.0, 0.0, 0.0]);
        let ranked = engine.rank(&store, &query);
        let ids: Vec<_> = ranked.iter().map(|r| r.node_id).collect();
        assert_eq!(ids, vec![b, c, a]);

        let d = 0.99_f64;
        let (d1, d2, d3) = (d.powi(1), d.powi(2), d.powi(3));
        let rec_b = (d2 - d3) * (1.0 - 0.0) / (d1 - d3) + 0.0;
        let expected_b = 1.0 * rec_b * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * 1.0 * 2.0;
        assert_eq!(ranked[0].score.value(), expected_b);

        let imp_c = (5.0 - 1.0) * (1.0 - 0.0) / (10.0 - 1.0) + 0.0;
        let expected_c = 1.0 * 0.0 * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * imp_c * 2.0;
        assert_eq!(ranked[1].score.value(), expected_c);
        let expected_a = 1.0 * 1.0 * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * 0.0 * 2.0;
        assert_eq!(ranked[2].score.value(), expected_a);
    }

    #[test]
    fn retrieve_top_one_touches_only_the_winner() {
        let mut store = MemoryStore::new();
        let c = add(&mut store, 0, "c happens", 5.0);
        let b = add(&mut store, 1, "b happens", 10.0);
        add(&mut store, 2, "a happens", 1.0);

        let engine = RetrievalEngine::new(RetrievalParams {
            weights: RetrievalWeights::default(),
            recency_decay: 0.99,
            top_n: 1,
        });
        let out = engine.retrieve(&mut store, &StubEmbeddingProvider::new(3), &["coffee"], at(30));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node_ids(), vec![b]);
        assert_eq!(store.get(b).expect("b").last_accessed_at, at(30));
        assert_eq!(store.get(c).expect("c").last_accessed_at, at(0));
    }

    #[test]
    fn idle_nodes_and_chats_are_never_candidates() {
        let mut store = MemoryStore::new();
        let idle = store
            .insert_event(
                NodeDraft::new(at(0), Triple::new("bed", "is", "idle"), "bed is idle")
                    .embedding("idle", Embedding(vec![1.0])),
            )
            .id;
        store.insert_chat(
            NodeDraft::new(at(1), Triple::new("a", "chat with", "b"), "talk")
                .embedding("talk", Embedding(vec![1.0])),
        );
        let engine = RetrievalEngine::default();
        let ranked = engine.rank(&store, &Embedding(vec![1.0]));
        assert!(ranked.is_empty());

        let real = add(&mut store, 2, "stove is on", 3.0);
        let ids: Vec<_> = engine
            .rank(&store, &Embedding(vec![1.0, 0.0, 0.0]))
            .iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(ids, vec![real]);
        assert!(!ids.contains(&idle));
    }

    #[test]
    fn empty_store_yields_empty_results_per_focal_point() {
        let mut store = MemoryStore::new();
        let out = RetrievalEngine::default().retrieve(
            &mut store,
            &StubEmbeddingProvider::new(3),
            &["a", "b"],
            at(0),
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|f| f.results.is_empty()));
    }

    #[test]
    fn ties_prefer_most_recently_accessed() {
        let mut store = MemoryStore::new();
        let first = add(&mut store, 0, "same", 1.0);
        let second = add(&mut store, 0, "same", 1.0);
        store.mark_accessed(first, at(5)).expect("touch");
        // Without the recency term both nodes score identically.
        let engine = RetrievalEngine::new(RetrievalParams {
            weights: RetrievalWeights {
                recency: 0.0,
                ..RetrievalWeights::default()
            },
            ..RetrievalParams::default()
        });
        let ranked = engine.rank(&store, &Embedding(vec![1.0, 0.0, 0.0]));
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].node_id, first);
        assert_eq!(ranked[1].node_id, second);
    }

    #[test]
    fn relevance_follows_embedding_similarity() {
        let embedder = HashingEmbeddingProvider::new(128);
        let mut store = MemoryStore::new();
        let texts = [
            (0, "Klaus is writing his research paper"),
            (1, "Isabella opens the cafe"),
        ];
        for (m, text) in texts {
            let emb = embedder.embed(text).expect("embed");
            store.insert_event(
                NodeDraft::new(at(m), Triple::new("x", "is", "y"), text)
                    .importance(5.0)
                    .embedding(text, emb),
            );
        }
        let engine = RetrievalEngine::default().with_top_n(1);
        let out = engine.retrieve(&mut store, &embedder, &["research paper"], at(10));
        assert_eq!(out[0].node_ids(), vec![NodeId(1)]);
    }

    #[test]
    fn associative_lookup_uses_keywords() {
        let mut store = MemoryStore::new();
        let e1 = store
            .insert_event(
                NodeDraft::new(at(0), Triple::new("Klaus", "is", "reading"), "Klaus reads")
                    .keywords(["Klaus", "reading"]),
            )
            .id;
        let t1 = store
            .insert_thought(
                NodeDraft::new(at(1), Triple::new("Klaus", "likes", "books"), "Klaus likes books")
                    .keywords(["klaus"]),
            )
            .id;
        let related = RetrievalEngine::related_to_events(&store, &[e1]);
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].events, vec![e1]);
        assert_eq!(related[0].thoughts, vec![t1]);
    }

    #[test]
    fn union_keeps_first_seen_order() {
        let r = |ids: &[u64]| FocalRetrieval {
            focal_point: String::new(),
            results: ids
                .iter()
                .map(|i| RetrievalResult {
                    node_id: NodeId(*i),
                    score: RetrievalScore::new(0.0),
                    breakdown: ScoreBreakdown::default(),
                })
                .collect(),
        };
        assert_eq!(
            union_of(&[r(&[3, 1]), r(&[1, 2])]),
            vec![NodeId(3), NodeId(1), NodeId(2)]
        );
    }
}

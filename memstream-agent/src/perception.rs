//! Perception: turn what the agent sees into memory.
//!
//! Every visible tile teaches the spatial tree. Events on tiles in the
//! agent's own arena are de-duplicated, ordered nearest first and cut to
//! the attention bandwidth; those not already among the recent events are
//! written to the store as event nodes.

use std::collections::HashSet;

use memstream_core::cognition::{Cognition, PersonaContext, importance_of};
use memstream_core::embedding::EmbeddingProvider;
use memstream_core::memory::spatial::{MemoryTree, TileAddress};
use memstream_core::memory::{Evidence, MemoryStore, NodeDraft, Utterance};
use memstream_core::reflection::ReflectionCounters;
use memstream_core::{Embedding, NodeId, NodeKind, Result, Timestamp, Triple};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One event happening on a tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceivedEvent {
    /// Actor, possibly a colon path (`"the Ville:cafe:counter:stove"`).
    pub subject: String,
    /// `None` when nothing is happening to the subject.
    pub predicate: Option<String>,
    /// Target, possibly a colon path.
    pub object: String,
    /// Short description of what the subject is doing.
    pub description: String,
}

impl PerceivedEvent {
    /// An active event.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: Some(predicate.into()),
            object: object.into(),
            description: description.into(),
        }
    }

    /// An object with nothing going on.
    #[must_use]
    pub fn idle(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: None,
            object: String::new(),
            description: String::new(),
        }
    }
}

/// A visible tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceivedTile {
    /// Where the tile is.
    pub address: TileAddress,
    /// Events on it.
    #[serde(default)]
    pub events: Vec<PerceivedEvent>,
    /// Distance from the agent, in tiles.
    pub distance: f64,
}

/// The agent's own in-flight action, needed when it observes itself chatting.
#[derive(Debug, Clone, Default)]
pub struct SelfAction<'a> {
    /// Triple of the action.
    pub event: Option<Triple>,
    /// Description of the action.
    pub description: Option<&'a str>,
    /// Ongoing transcript.
    pub transcript: &'a [Utterance],
}

/// Perception limits.
#[derive(Debug, Clone, Copy)]
pub struct PerceptionLimits {
    /// Events perceived per tick.
    pub attention_bandwidth: usize,
    /// Recent events an observation is checked against.
    pub retention: usize,
}

/// Everything perception borrows besides the store.
pub struct PerceptionContext<'a, C> {
    /// Importance scoring.
    pub cognition: &'a C,
    /// Embeddings for new descriptions.
    pub embedder: &'a dyn EmbeddingProvider,
    /// Who is perceiving.
    pub persona: &'a PersonaContext,
    /// Bandwidth and retention.
    pub limits: PerceptionLimits,
    /// Current action, for self-chat.
    pub action: SelfAction<'a>,
}

fn tail(path: &str) -> &str {
    path.rsplit(':').next().unwrap_or(path)
}

/// Text the description is embedded and scored under: the parenthesised
/// part when present, else the whole description.
#[must_use]
pub fn embedding_key(description: &str) -> &str {
    match description.split_once('(') {
        Some((_, rest)) => rest.split(')').next().unwrap_or(rest).trim(),
        None => description,
    }
}

/// Triple, description and keywords stored for a perceived event.
#[must_use]
pub fn normalize(event: &PerceivedEvent) -> (Triple, String, Vec<String>) {
    let (triple, desc) = match &event.predicate {
        Some(p) if !p.is_empty() => (
            Triple::new(event.subject.clone(), p.clone(), event.object.clone()),
            event.description.as_str(),
        ),
        _ => (Triple::new(event.subject.clone(), "is", "idle"), "idle"),
    };
    let description = format!("{} is {desc}", tail(&event.subject));
    let keywords = vec![tail(&triple.subject).to_string(), tail(&triple.object).to_string()];
    (triple, description, keywords)
}

/// Events the agent attends to this tick: tiles in `arena` only (all when
/// `None`), each event once, nearest first, at most `bandwidth`.
#[must_use]
pub fn attend(
    tiles: &[PerceivedTile],
    arena: Option<&str>,
    bandwidth: usize,
) -> Vec<PerceivedEvent> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<(f64, &PerceivedEvent)> = Vec::new();
    for tile in tiles {
        if arena.is_some_and(|a| tile.address.arena_path() != a) {
            continue;
        }
        for event in &tile.events {
            if seen.insert(event) {
                candidates.push((tile.distance, event));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    candidates
        .into_iter()
        .take(bandwidth)
        .map(|(_, e)| e.clone())
        .collect()
}

fn embedding_for(
    store: &MemoryStore,
    embedder: &dyn EmbeddingProvider,
    key: &str,
) -> Result<Embedding> {
    match store.embedding(key) {
        Some(v) => Ok(v.clone()),
        None => embedder.embed(key),
    }
}

/// Perceive one tick's worth of tiles.
///
/// Returns the ids of the event nodes written, in perception order. Each
/// one spends its importance from `counters`.
///
/// # Errors
///
/// Propagates embedding and collaborator failures; nodes written before
/// the failure stay written.
#[instrument(
    name = "memstream::perceive",
    skip_all,
    fields(agent = %ctx.persona.name, tiles = tiles.len())
)]
pub async fn perceive<C: Cognition>(
    store: &mut MemoryStore,
    tree: &mut MemoryTree,
    counters: &mut ReflectionCounters,
    ctx: &PerceptionContext<'_, C>,
    tiles: &[PerceivedTile],
    arena: Option<&str>,
    now: Timestamp,
) -> Result<Vec<NodeId>> {
    for tile in tiles {
        tree.learn(&tile.address);
    }

    let attended = attend(tiles, arena, ctx.limits.attention_bandwidth);
    let mut inserted = Vec::new();

    for event in &attended {
        let (triple, description, keywords) = normalize(event);
        if store
            .summarized_recent_event_triples(ctx.limits.retention)
            .contains(&triple)
        {
            debug!(%triple, "already perceived recently");
            continue;
        }

        let key = embedding_key(&description).to_string();
        let vector = embedding_for(store, ctx.embedder, &key)?;
        let importance = importance_of(ctx.cognition, NodeKind::Event, &key, ctx.persona).await?;

        let mut evidence = Vec::new();
        if triple.subject == ctx.persona.name && triple.predicate == "chat with" {
            evidence.push(record_self_chat(store, ctx, &keywords, now).await?);
        }

        let id = store
            .insert_event(
                NodeDraft::new(now, triple, description)
                    .keywords(keywords)
                    .importance(importance)
                    .embedding(key, vector)
                    .evidence(Evidence::Nodes(evidence)),
            )
            .id;
        counters.record_event(importance);
        inserted.push(id);
    }

    debug!(attended = attended.len(), inserted = inserted.len(), "perception done");
    Ok(inserted)
}

async fn record_self_chat<C: Cognition>(
    store: &mut MemoryStore,
    ctx: &PerceptionContext<'_, C>,
    keywords: &[String],
    now: Timestamp,
) -> Result<NodeId> {
    let description = ctx.action.description.unwrap_or_default().to_string();
    let triple = ctx
        .action
        .event
        .clone()
        .unwrap_or_else(|| Triple::new(ctx.persona.name.clone(), "chat with", ""));
    let vector = embedding_for(store, ctx.embedder, &description)?;
    let importance = importance_of(ctx.cognition, NodeKind::Chat, &description, ctx.persona).await?;

    let id = store
        .insert_chat(
            NodeDraft::new(now, triple, description.clone())
                .keywords(keywords.iter().cloned())
                .importance(importance)
                .embedding(description, vector)
                .evidence(Evidence::Transcript(ctx.action.transcript.to_vec())),
        )
        .id;
    debug!(chat = %id, "recorded own conversation");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstream_core::cognition::RuleBasedCognition;
    use memstream_core::embedding::HashingEmbeddingProvider;
    use memstream_core::parse_timestamp;

    fn addr(arena: &str, object: &str) -> TileAddress {
        TileAddress {
            world: "the Ville".into(),
            sector: "Hobbs Cafe".into(),
            arena: arena.into(),
            game_object: object.into(),
        }
    }

    fn tile(
        arena: &str,
        object: &str,
        distance: f64,
        events: Vec<PerceivedEvent>,
    ) -> PerceivedTile {
        PerceivedTile { address: addr(arena, object), events, distance }
    }

    fn ctx<'a>(
        cognition: &'a RuleBasedCognition,
        embedder: &'a HashingEmbeddingProvider,
        persona: &'a PersonaContext,
        action: SelfAction<'a>,
    ) -> PerceptionContext<'a, RuleBasedCognition> {
        PerceptionContext {
            cognition,
            embedder,
            persona,
            limits: PerceptionLimits { attention_bandwidth: 3, retention: 5 },
            action,
        }
    }

    #[test]
    fn idle_events_are_normalized() {
        let stove = PerceivedEvent::idle("the Ville:cafe:counter:stove");
        let (triple, desc, keywords) = normalize(&stove);
        assert_eq!(triple, Triple::new("the Ville:cafe:counter:stove", "is", "idle"));
        assert_eq!(desc, "stove is idle");
        assert_eq!(keywords, vec!["stove".to_string(), "idle".to_string()]);
    }

    #[test]
    fn active_events_keep_their_description() {
        let event = PerceivedEvent::new(
            "Isabella Rodriguez",
            "is",
            "the Ville:cafe:counter:coffee machine",
            "brewing coffee (making coffee for customers)",
        );
        let (triple, desc, keywords) = normalize(&event);
        assert_eq!(triple.predicate, "is");
        assert_eq!(desc, "Isabella Rodriguez is brewing coffee (making coffee for customers)");
        assert_eq!(keywords, vec!["Isabella Rodriguez".to_string(), "coffee machine".to_string()]);
        assert_eq!(embedding_key(&desc), "making coffee for customers");
        assert_eq!(embedding_key("bed is idle"), "bed is idle");
    }

    #[test]
    fn attention_keeps_nearest_unique_events_in_arena() {
        let a = PerceivedEvent::new("A", "is", "x", "a");
        let b = PerceivedEvent::new("B", "is", "x", "b");
        let c = PerceivedEvent::new("C", "is", "x", "c");
        let elsewhere = PerceivedEvent::new("D", "is", "x", "d");
        let tiles = vec![
            tile("cafe", "", 3.0, vec![a.clone()]),
            tile("cafe", "", 1.0, vec![b.clone(), a.clone()]),
            tile("kitchen", "", 0.0, vec![elsewhere]),
            tile("cafe", "", 2.0, vec![c.clone()]),
        ];
        let picked = attend(&tiles, Some("the Ville:Hobbs Cafe:cafe"), 2);
        assert_eq!(picked, vec![b, a.clone()]);
        assert_eq!(attend(&tiles, None, 10).len(), 4);
    }

    #[tokio::test]
    async fn perceive_writes_new_events_and_spends_budget() {
        let cognition = RuleBasedCognition::new();
        let embedder = HashingEmbeddingProvider::new(16);
        let persona = PersonaContext::new("Klaus Mueller", "student");
        let ctx = ctx(&cognition, &embedder, &persona, SelfAction::default());
        let mut store = MemoryStore::new();
        let mut tree = MemoryTree::new();
        let mut counters = ReflectionCounters::new(150.0);
        let now = parse_timestamp("2023-02-13 09:00:00").expect("ts");

        let tiles = vec![
            tile(
                "cafe",
                "stove",
                1.0,
                vec![PerceivedEvent::idle("the Ville:Hobbs Cafe:cafe:stove")],
            ),
            tile(
                "cafe",
                "counter",
                2.0,
                vec![PerceivedEvent::new(
                    "Isabella Rodriguez",
                    "is",
                    "counter",
                    "planning a party",
                )],
            ),
        ];
        let ids = perceive(&mut store, &mut tree, &mut counters, &ctx, &tiles, None, now)
            .await
            .expect("perceive");
        assert_eq!(ids.len(), 2);
        assert_eq!(counters.new_node_count, 2);
        let stove = store.get(ids[0]).expect("stove");
        assert_eq!(stove.importance, 1.0);
        assert!(counters.importance_budget_remaining < 149.0);
        assert_eq!(tree.accessible_objects("the Ville:Hobbs Cafe:cafe"), "stove, counter");

        // Same scene again: nothing new.
        let again = perceive(&mut store, &mut tree, &mut counters, &ctx, &tiles, None, now)
            .await
            .expect("perceive");
        assert!(again.is_empty());
        assert_eq!(store.count(NodeKind::Event), 2);
    }

    #[tokio::test]
    async fn observing_own_chat_links_a_chat_node() {
        let cognition = RuleBasedCognition::new();
        let embedder = HashingEmbeddingProvider::new(16);
        let persona = PersonaContext::new("Klaus Mueller", "student");
        let transcript = vec![
            Utterance::new("Klaus Mueller", "Are you going to the party?"),
            Utterance::new("Maria Lopez", "Yes!"),
        ];
        let action = SelfAction {
            event: Some(Triple::new("Klaus Mueller", "chat with", "Maria Lopez")),
            description: Some("conversing about the party"),
            transcript: &transcript,
        };
        let ctx = ctx(&cognition, &embedder, &persona, action);
        let mut store = MemoryStore::new();
        let mut tree = MemoryTree::new();
        let mut counters = ReflectionCounters::new(150.0);
        let now = parse_timestamp("2023-02-13 12:00:00").expect("ts");

        let tiles = vec![tile(
            "cafe",
            "",
            0.0,
            vec![PerceivedEvent::new(
                "Klaus Mueller",
                "chat with",
                "Maria Lopez",
                "conversing about the party",
            )],
        )];
        let ids = perceive(&mut store, &mut tree, &mut counters, &ctx, &tiles, None, now)
            .await
            .expect("perceive");

        assert_eq!(ids.len(), 1);
        let event = store.get(ids[0]).expect("event");
        let chat_id = event.evidence.node_ids()[0];
        let chat = store.get(chat_id).expect("chat");
        assert_eq!(chat.kind, NodeKind::Chat);
        assert_eq!(chat.description, "conversing about the party");
        assert_eq!(store.last_chat_with("Maria Lopez").map(|n| n.id), Some(chat_id));
        assert_eq!(counters.new_node_count, 1);
    }
}

//! Reflection: the importance-budget trigger, insight synthesis and
//! conversation closeout.
//!
//! Two paths mint Thought nodes:
//!
//! 1. **Importance trigger.** Each perceived event spends its importance
//!    from a budget. Once the budget is used up the agent picks focal
//!    points from its most recent memories, retrieves evidence for each,
//!    asks the collaborator for insights and records them as thoughts.
//!    The budget is refilled whether or not anything was synthesized.
//! 2. **Conversation closeout.** One tick before a scheduled chat ends the
//!    agent writes a planning thought and a memo thought about it, both
//!    pointing at the chat node.
//!
//! Failures local to one focal point are logged and skipped.

use std::sync::atomic::Ordering;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cognition::{Cognition, ConversationThought, Insight, PersonaContext, importance_of};
use crate::config::ReflectionConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemstreamError, Result};
use crate::memory::{Evidence, MemoryStore, NodeDraft, Utterance};
use crate::metrics;
use crate::retrieval::RetrievalEngine;
use crate::types::{NodeId, NodeKind, Timestamp};

// ---------------------------------------------------------------------------
// Trigger state
// ---------------------------------------------------------------------------

/// Importance budget and new-node counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionCounters {
    /// Budget the counter is refilled to after each reflection.
    pub importance_trigger_max: f64,
    /// Importance left before the next reflection.
    pub importance_budget_remaining: f64,
    /// Events recorded since the last reflection.
    pub new_node_count: usize,
}

impl ReflectionCounters {
    /// A full budget of `max`.
    #[must_use]
    pub fn new(max: f64) -> Self {
        Self {
            importance_trigger_max: max,
            importance_budget_remaining: max,
            new_node_count: 0,
        }
    }

    /// Spend one event's importance.
    pub fn record_event(&mut self, importance: f32) {
        self.importance_budget_remaining -= f64::from(importance);
        self.new_node_count += 1;
    }

    /// True once the budget is used up and there is something to reflect on.
    #[must_use]
    pub fn should_reflect(&self, store: &MemoryStore) -> bool {
        self.importance_budget_remaining <= 0.0 && store.has_reflectable()
    }

    /// Refill the budget and zero the counter.
    pub fn reset(&mut self) {
        self.importance_budget_remaining = self.importance_trigger_max;
        self.new_node_count = 0;
    }
}

impl From<&ReflectionConfig> for ReflectionCounters {
    fn from(cfg: &ReflectionConfig) -> Self {
        Self::new(cfg.importance_trigger_max)
    }
}

/// An ongoing conversation the agent will reflect on when it ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Interlocutor name.
    pub chatting_with: Option<String>,
    /// Turns so far.
    pub transcript: Vec<Utterance>,
    /// Scheduled end of the conversation.
    pub end_time: Option<Timestamp>,
    /// Set once the closeout thoughts have been written.
    #[serde(default)]
    pub closed_out: bool,
}

impl ConversationState {
    /// A fresh conversation with `name` ending at `end_time`.
    #[must_use]
    pub fn new(name: impl Into<String>, end_time: Timestamp) -> Self {
        Self {
            chatting_with: Some(name.into()),
            transcript: Vec::new(),
            end_time: Some(end_time),
            closed_out: false,
        }
    }

    /// True when the next tick reaches the end time and no closeout has run.
    #[must_use]
    pub fn is_due(&self, now: Timestamp, tick_seconds: u32) -> bool {
        match (&self.chatting_with, self.end_time) {
            (Some(_), Some(end)) => {
                !self.closed_out && now + Duration::seconds(i64::from(tick_seconds)) >= end
            }
            _ => false,
        }
    }

    /// `speaker: line` per turn, newline terminated.
    #[must_use]
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|u| format!("{}: {}\n", u.speaker, u.line))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Everything a reflection run borrows besides the store.
pub struct ReflectionContext<'a, C> {
    /// Text-generation collaborator.
    pub cognition: &'a C,
    /// Embeds new thoughts and focal points.
    pub embedder: &'a dyn EmbeddingProvider,
    /// Who is reflecting.
    pub persona: &'a PersonaContext,
    /// Focal point / insight counts and thought lifetime.
    pub config: &'a ReflectionConfig,
    /// Weights and decay for evidence retrieval.
    pub retrieval: &'a RetrievalEngine,
}

/// What one call to [`reflect`] produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionOutcome {
    /// Whether the importance trigger fired.
    pub triggered: bool,
    /// Thoughts minted by the importance path.
    pub thoughts: Vec<NodeId>,
    /// Planning and memo thoughts from a conversation closeout.
    pub closeout: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run both reflection paths for one tick.
///
/// # Errors
///
/// Only a failed conversation closeout is returned; importance-path
/// failures are logged per focal point.
#[instrument(name = "memstream::reflect", skip_all, fields(persona = %ctx.persona.name))]
pub async fn reflect<C: Cognition>(
    store: &mut MemoryStore,
    counters: &mut ReflectionCounters,
    conversation: &mut ConversationState,
    ctx: &ReflectionContext<'_, C>,
    now: Timestamp,
) -> Result<ReflectionOutcome> {
    let mut outcome = ReflectionOutcome::default();

    if counters.should_reflect(store) {
        info!(
            budget = counters.importance_budget_remaining,
            new_nodes = counters.new_node_count,
            "Importance budget spent; reflecting"
        );
        outcome.triggered = true;
        outcome.thoughts = run_reflection(store, counters.new_node_count, ctx, now).await;
        counters.reset();
    }

    if conversation.is_due(now, ctx.config.tick_seconds) {
        outcome.closeout = conversation_closeout(store, conversation, ctx, now).await?;
    }

    Ok(outcome)
}

/// Generate focal points from the `recent` most recently accessed
/// non-idle events and thoughts.
///
/// A `recent` of zero considers every such node.
///
/// # Errors
///
/// Propagates collaborator failures.
pub async fn generate_focal_points<C: Cognition>(
    store: &MemoryStore,
    recent: usize,
    ctx: &ReflectionContext<'_, C>,
) -> Result<Vec<String>> {
    let mut nodes: Vec<_> = store
        .events()
        .chain(store.thoughts())
        .filter(|n| !n.is_idle())
        .collect();
    nodes.sort_by(|a, b| {
        a.last_accessed_at
            .cmp(&b.last_accessed_at)
            .then(a.id.cmp(&b.id))
    });
    let skip = if recent == 0 {
        0
    } else {
        nodes.len().saturating_sub(recent)
    };
    let statements: Vec<String> = nodes[skip..]
        .iter()
        .map(|n| n.embedding_key.clone())
        .collect();

    ctx.cognition
        .focal_points(&statements, ctx.config.focal_point_count, ctx.persona)
        .await
}

/// One importance-triggered reflection. Returns the thoughts it minted.
pub async fn run_reflection<C: Cognition>(
    store: &mut MemoryStore,
    recent: usize,
    ctx: &ReflectionContext<'_, C>,
    now: Timestamp,
) -> Vec<NodeId> {
    metrics::global()
        .counters
        .reflections
        .fetch_add(1, Ordering::Relaxed);

    let focal_points = match generate_focal_points(store, recent, ctx).await {
        Ok(fps) => fps,
        Err(e) => {
            warn!(error = %e, "Focal point generation failed; nothing to reflect on");
            return Vec::new();
        }
    };
    debug!(?focal_points, "Generated focal points");

    let engine = ctx
        .retrieval
        .clone()
        .with_top_n(ctx.config.retrieval_per_focal_point);
    let retrieved = engine.retrieve(store, ctx.embedder, &focal_points, now);

    let mut minted = Vec::new();
    for focal in retrieved {
        let evidence_pool = focal.node_ids();
        let statements: Vec<String> = evidence_pool
            .iter()
            .filter_map(|id| store.node(*id))
            .map(|n| n.embedding_key.clone())
            .collect();

        let insights = match ctx
            .cognition
            .insights(&statements, ctx.config.insights_per_focal_point, ctx.persona)
            .await
            .and_then(|raw| resolve_evidence(raw, &evidence_pool))
        {
            Ok(insights) => insights,
            Err(e) => {
                warn!(focal_point = %focal.focal_point, error = %e, "Skipping insight synthesis");
                metrics::global()
                    .counters
                    .insight_syntheses_skipped
                    .fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        for (text, evidence) in insights {
            match synthesize_thought(store, ctx, &text, evidence, now).await {
                Ok(id) => minted.push(id),
                Err(e) => warn!(thought = %text, error = %e, "Dropping synthesized thought"),
            }
        }
    }

    info!(thoughts = minted.len(), "Reflection complete");
    minted
}

/// Write the planning and memo thoughts for a finished conversation.
///
/// The conversation is marked closed before the collaborator is called,
/// so a failure is not retried on the next tick.
///
/// # Errors
///
/// Propagates collaborator and embedding failures.
pub async fn conversation_closeout<C: Cognition>(
    store: &mut MemoryStore,
    conversation: &mut ConversationState,
    ctx: &ReflectionContext<'_, C>,
    now: Timestamp,
) -> Result<Vec<NodeId>> {
    conversation.closed_out = true;
    metrics::global()
        .counters
        .conversation_closeouts
        .fetch_add(1, Ordering::Relaxed);

    let partner = conversation.chatting_with.clone().unwrap_or_default();
    let evidence = match store.last_chat_with(&partner) {
        Some(chat) => vec![chat.id],
        None => {
            warn!(partner = %partner, "No chat node for closing conversation");
            Vec::new()
        }
    };
    let transcript = conversation.transcript_text();
    let name = &ctx.persona.name;

    let planning = ctx
        .cognition
        .conversation_thought(ConversationThought::Planning, &transcript, ctx.persona)
        .await?;
    let planning = format!("For {name}'s planning: {planning}");
    let planning_id = synthesize_thought(store, ctx, &planning, evidence.clone(), now).await?;

    let memo = ctx
        .cognition
        .conversation_thought(ConversationThought::Memo, &transcript, ctx.persona)
        .await?;
    let memo = format!("{name} {memo}");
    let memo_id = synthesize_thought(store, ctx, &memo, evidence, now).await?;

    info!(partner = %partner, "Conversation closed out");
    Ok(vec![planning_id, memo_id])
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map statement indices back onto node ids. Any out-of-range index
/// invalidates the whole batch.
fn resolve_evidence(raw: Vec<Insight>, pool: &[NodeId]) -> Result<Vec<(String, Vec<NodeId>)>> {
    raw.into_iter()
        .map(|insight| {
            let ids = insight
                .evidence
                .iter()
                .map(|&i| {
                    pool.get(i).copied().ok_or_else(|| {
                        MemstreamError::Collaborator(format!(
                            "insight cites statement {i} of {}",
                            pool.len()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((insight.text, ids))
        })
        .collect()
}

async fn synthesize_thought<C: Cognition>(
    store: &mut MemoryStore,
    ctx: &ReflectionContext<'_, C>,
    text: &str,
    evidence: Vec<NodeId>,
    now: Timestamp,
) -> Result<NodeId> {
    let triple = ctx.cognition.event_triple(text, ctx.persona).await?;
    let importance = importance_of(ctx.cognition, NodeKind::Thought, text, ctx.persona).await?;
    let embedding = ctx.embedder.embed(text)?;
    let keywords = [
        triple.subject.clone(),
        triple.predicate.clone(),
        triple.object.clone(),
    ];

    let draft = NodeDraft::new(now, triple, text)
        .expires(now + Duration::days(i64::from(ctx.config.thought_ttl_days)))
        .keywords(keywords)
        .importance(importance)
        .embedding(text, embedding)
        .evidence(Evidence::Nodes(evidence));
    Ok(store.insert_thought(draft).id)
}

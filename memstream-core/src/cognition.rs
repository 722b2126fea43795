//! The text-generation collaborator boundary.
//!
//! Reflection and perception need scores, triples and free text that a
//! language model normally produces. [`Cognition`] is that seam.
//!
//! - [`RuleBasedCognition`]: deterministic keyword heuristics, no model
//!   (the offline fallback, and what the tests run against)
//! - `memstream_llm::LlmCognition`: prompt-driven, over HTTP

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{NodeKind, Triple};

/// Who is thinking. Passed to every collaborator call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaContext {
    /// Agent name, e.g. "Klaus Mueller".
    pub name: String,
    /// One-paragraph identity summary used in prompts.
    pub summary: String,
}

impl PersonaContext {
    /// Build a context.
    #[must_use]
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
        }
    }
}

/// One synthesized insight and the statements that support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    /// The insight sentence.
    pub text: String,
    /// 0-based indices into the statement list the insight was drawn from.
    pub evidence: Vec<usize>,
}

/// Which reflection to draw from a finished conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationThought {
    /// What the agent should remember for planning.
    Planning,
    /// What the agent found interesting.
    Memo,
}

/// Text-generation collaborator.
///
/// Every method is async and may fail; callers decide whether a failure is
/// fatal. None of them retries.
pub trait Cognition: Send + Sync {
    /// Poignancy of a node's text on a 1–10 scale.
    fn score_importance(
        &self,
        kind: NodeKind,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<f32>> + Send;

    /// Up to `n` salient questions raised by `statements`.
    fn focal_points(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Up to `n` insights, each citing indices into `statements`.
    fn insights(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<Insight>>> + Send;

    /// Subject-predicate-object triple for a sentence.
    fn event_triple(
        &self,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Triple>> + Send;

    /// A planning or memo reflection on a `speaker: line` transcript.
    fn conversation_thought(
        &self,
        kind: ConversationThought,
        transcript: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Importance with the idle shortcut applied: anything that reads
/// "is idle" scores 1 without asking the collaborator.
///
/// # Errors
///
/// Propagates collaborator failures.
pub async fn importance_of<C: Cognition>(
    cognition: &C,
    kind: NodeKind,
    text: &str,
    persona: &PersonaContext,
) -> Result<f32> {
    if text.contains("is idle") {
        return Ok(1.0);
    }
    cognition.score_importance(kind, text, persona).await
}

// ---------------------------------------------------------------------------
// Rule-based implementation
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "for", "from", "has", "have", "her", "his", "in", "is",
    "it", "of", "on", "or", "that", "the", "their", "to", "was", "were", "with",
];

const SALIENT: &[&str] = &[
    "argument", "birthday", "broke", "died", "election", "engaged", "fight", "fired", "hired",
    "love", "married", "party", "plan", "promotion", "secret", "sick", "wedding",
];

/// Deterministic collaborator built from keyword heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedCognition;

impl RuleBasedCognition {
    /// Create the collaborator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
    }

    /// Content words ordered by how many statements mention them; ties go
    /// to the word seen first.
    fn ranked_words(statements: &[String]) -> Vec<(String, Vec<usize>)> {
        let mut order: Vec<String> = Vec::new();
        let mut hits: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, s) in statements.iter().enumerate() {
            for w in Self::content_words(s) {
                let entry = hits.entry(w.clone()).or_default();
                if entry.last() != Some(&i) {
                    if entry.is_empty() {
                        order.push(w);
                    }
                    entry.push(i);
                }
            }
        }
        let mut ranked: Vec<(String, Vec<usize>)> = order
            .into_iter()
            .filter_map(|w| hits.remove(&w).map(|ids| (w, ids)))
            .collect();
        ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        ranked
    }
}

impl Cognition for RuleBasedCognition {
    fn score_importance(
        &self,
        kind: NodeKind,
        text: &str,
        _persona: &PersonaContext,
    ) -> impl Future<Output = Result<f32>> + Send {
        async move {
            let base = if kind == NodeKind::Chat { 3.0 } else { 2.0 };
            let salient = Self::content_words(text)
                .filter(|w| SALIENT.contains(&w.as_str()))
                .count();
            #[allow(clippy::cast_precision_loss)]
            let score = base + 2.0 * salient as f32;
            Ok(score.clamp(1.0, 10.0))
        }
    }

    fn focal_points(
        &self,
        statements: &[String],
        n: usize,
        _persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            Ok(Self::ranked_words(statements)
                .into_iter()
                .take(n)
                .map(|(w, _)| format!("What do I know about {w}?"))
                .collect())
        }
    }

    fn insights(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<Insight>>> + Send {
        async move {
            Ok(Self::ranked_words(statements)
                .into_iter()
                .filter(|(_, ids)| ids.len() > 1)
                .take(n)
                .map(|(w, ids)| Insight {
                    text: format!("{} keeps noticing things about {w}", persona.name),
                    evidence: ids,
                })
                .collect())
        }
    }

    fn event_triple(
        &self,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Triple>> + Send {
        async move {
            let rest = text
                .strip_prefix(persona.name.as_str())
                .unwrap_or(text)
                .trim();
            let mut words = rest.splitn(2, char::is_whitespace);
            let predicate = words.next().filter(|w| !w.is_empty()).unwrap_or("is");
            let object = words.next().map_or("idle", str::trim);
            Ok(Triple::new(persona.name.clone(), predicate, object))
        }
    }

    fn conversation_thought(
        &self,
        kind: ConversationThought,
        transcript: &str,
        _persona: &PersonaContext,
    ) -> impl Future<Output = Result<String>> + Send {
        async move {
            let turns = transcript.lines().filter(|l| !l.trim().is_empty()).count();
            let last = transcript
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default()
                .trim();
            Ok(match kind {
                ConversationThought::Planning => {
                    format!("I should follow up on \"{last}\"")
                }
                ConversationThought::Memo => {
                    format!("had a {turns}-turn conversation that ended with \"{last}\"")
                }
            })
        }
    }
}

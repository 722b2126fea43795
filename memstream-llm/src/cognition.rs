//! [`Cognition`] backed by prompt templates and an [`LlmClient`].
//!
//! Every call renders one template, asks for JSON, parses it into the
//! matching response type and validates it. A reply that parses but makes
//! no sense (poignancy 42, evidence pointing at statement 9 of 3) is a
//! `SchemaValidation` error, which reaches the store as `Collaborator`.

use std::future::Future;

use memstream_core::cognition::{Cognition, ConversationThought, Insight, PersonaContext};
use memstream_core::config::LlmConfig;
use memstream_core::{NodeKind, Result, Triple};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::client::{LlmClient, parse_structured};
use crate::error::LlmError;
use crate::prompt::{PromptEngine, PromptId, numbered};
use crate::types::{
    FocalPointsResponse, InsightsResponse, LlmRequest, PoignancyResponse, ThoughtResponse,
    TripleResponse,
};

/// LLM-backed collaborator.
#[derive(Debug, Clone)]
pub struct LlmCognition {
    client: LlmClient,
    prompts: PromptEngine,
}

impl LlmCognition {
    /// Wrap a client and a prompt set.
    #[must_use]
    pub fn new(client: LlmClient, prompts: PromptEngine) -> Self {
        Self { client, prompts }
    }

    /// Client and prompts from the `[llm]` config section; `prompt_dir`
    /// overrides the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a bad provider or prompt directory.
    pub fn from_config(config: &LlmConfig) -> std::result::Result<Self, LlmError> {
        let prompts = match &config.prompt_dir {
            Some(dir) => PromptEngine::from_directory(dir)?,
            None => PromptEngine::builtin(),
        };
        Ok(Self::new(LlmClient::from_config(config)?, prompts))
    }

    /// The prompt set in use.
    #[must_use]
    pub fn prompts(&self) -> &PromptEngine {
        &self.prompts
    }

    #[instrument(name = "memstream::llm::ask", skip_all, fields(prompt = %id))]
    async fn ask<T: DeserializeOwned>(
        &self,
        id: PromptId,
        persona: &PersonaContext,
        vars: &[(&str, &str)],
    ) -> std::result::Result<T, LlmError> {
        let tpl = self
            .prompts
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        let mut all_vars = vec![
            ("persona_name", persona.name.as_str()),
            ("persona_summary", persona.summary.as_str()),
        ];
        all_vars.extend_from_slice(vars);
        let (system, user) = self.prompts.render(id, &all_vars)?;

        let request = LlmRequest {
            system,
            user,
            tier: tpl.tier,
            max_tokens: tpl.max_tokens,
            temperature: tpl.temperature,
            json_mode: true,
            timeout_ms: self.client.timeout_ms(),
        };
        let response = self.client.generate(&request).await?;
        debug!(
            tokens = response.tokens_generated,
            latency_ms = response.latency_ms,
            "prompt answered"
        );
        parse_structured(&response.text)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_poignancy(r: &PoignancyResponse) -> std::result::Result<f32, LlmError> {
    if (1.0..=10.0).contains(&r.poignancy) {
        Ok(r.poignancy.round())
    } else {
        Err(LlmError::SchemaValidation(format!(
            "poignancy {} outside 1-10",
            r.poignancy
        )))
    }
}

fn check_questions(r: FocalPointsResponse, n: usize) -> Vec<String> {
    r.questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(n)
        .collect()
}

fn check_insights(
    r: InsightsResponse,
    n: usize,
    statement_count: usize,
) -> std::result::Result<Vec<Insight>, LlmError> {
    r.insights
        .into_iter()
        .take(n)
        .map(|item| {
            if let Some(bad) = item.because_of.iter().find(|i| **i >= statement_count) {
                return Err(LlmError::SchemaValidation(format!(
                    "insight cites statement {bad} of {statement_count}"
                )));
            }
            Ok(Insight {
                text: item.insight.trim().to_string(),
                evidence: item.because_of,
            })
        })
        .collect()
}

fn check_triple(r: TripleResponse) -> std::result::Result<Triple, LlmError> {
    if r.subject.trim().is_empty() || r.predicate.trim().is_empty() {
        return Err(LlmError::SchemaValidation("triple needs a subject and predicate".into()));
    }
    Ok(Triple::new(r.subject.trim(), r.predicate.trim(), r.object.trim()))
}

fn check_thought(r: ThoughtResponse) -> std::result::Result<String, LlmError> {
    let thought = r.thought.trim();
    if thought.is_empty() {
        return Err(LlmError::SchemaValidation("empty thought".into()));
    }
    Ok(thought.to_string())
}

impl Cognition for LlmCognition {
    fn score_importance(
        &self,
        kind: NodeKind,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<f32>> + Send {
        async move {
            let id = if kind == NodeKind::Chat {
                PromptId::ChatPoignancy
            } else {
                PromptId::EventPoignancy
            };
            let r: PoignancyResponse = self.ask(id, persona, &[("text", text)]).await?;
            Ok(check_poignancy(&r)?)
        }
    }

    fn focal_points(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            let listed = numbered(statements);
            let count = n.to_string();
            let r: FocalPointsResponse = self
                .ask(
                    PromptId::FocalPoints,
                    persona,
                    &[("statements", listed.as_str()), ("count", count.as_str())],
                )
                .await?;
            Ok(check_questions(r, n))
        }
    }

    fn insights(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<Insight>>> + Send {
        async move {
            let listed = numbered(statements);
            let count = n.to_string();
            let r: InsightsResponse = self
                .ask(
                    PromptId::InsightAndEvidence,
                    persona,
                    &[("statements", listed.as_str()), ("count", count.as_str())],
                )
                .await?;
            Ok(check_insights(r, n, statements.len())?)
        }
    }

    fn event_triple(
        &self,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Triple>> + Send {
        async move {
            let r: TripleResponse =
                self.ask(PromptId::EventTriple, persona, &[("text", text)]).await?;
            Ok(check_triple(r)?)
        }
    }

    fn conversation_thought(
        &self,
        kind: ConversationThought,
        transcript: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<String>> + Send {
        async move {
            let id = match kind {
                ConversationThought::Planning => PromptId::PlanningOnConvo,
                ConversationThought::Memo => PromptId::MemoOnConvo,
            };
            let r: ThoughtResponse = self.ask(id, persona, &[("transcript", transcript)]).await?;
            Ok(check_thought(r)?)
        }
    }
}

//! Collaborator selection from config.

use std::future::Future;

use memstream_core::cognition::{
    Cognition, ConversationThought, Insight, PersonaContext, RuleBasedCognition,
};
use memstream_core::config::LlmConfig;
use memstream_core::{NodeKind, Result, Triple};
use memstream_llm::LlmCognition;
use tracing::info;

/// Either collaborator, picked by `llm.provider`.
#[derive(Debug, Clone)]
pub enum AgentCognition {
    /// `provider = "none"`.
    RuleBased(RuleBasedCognition),
    /// Any model provider.
    Llm(LlmCognition),
}

impl AgentCognition {
    /// Build from the `[llm]` section.
    ///
    /// # Errors
    ///
    /// Returns a collaborator error if the LLM client cannot be configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.provider == "none" {
            info!("no LLM provider; using rule-based cognition");
            return Ok(Self::RuleBased(RuleBasedCognition::new()));
        }
        let llm = LlmCognition::from_config(config)?;
        info!(provider = %config.provider, model = %config.deep_model, "LLM cognition ready");
        Ok(Self::Llm(llm))
    }
}

impl Cognition for AgentCognition {
    fn score_importance(
        &self,
        kind: NodeKind,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<f32>> + Send {
        async move {
            match self {
                Self::RuleBased(c) => c.score_importance(kind, text, persona).await,
                Self::Llm(c) => c.score_importance(kind, text, persona).await,
            }
        }
    }

    fn focal_points(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<String>>> + Send {
        async move {
            match self {
                Self::RuleBased(c) => c.focal_points(statements, n, persona).await,
                Self::Llm(c) => c.focal_points(statements, n, persona).await,
            }
        }
    }

    fn insights(
        &self,
        statements: &[String],
        n: usize,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Vec<Insight>>> + Send {
        async move {
            match self {
                Self::RuleBased(c) => c.insights(statements, n, persona).await,
                Self::Llm(c) => c.insights(statements, n, persona).await,
            }
        }
    }

    fn event_triple(
        &self,
        text: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<Triple>> + Send {
        async move {
            match self {
                Self::RuleBased(c) => c.event_triple(text, persona).await,
                Self::Llm(c) => c.event_triple(text, persona).await,
            }
        }
    }

    fn conversation_thought(
        &self,
        kind: ConversationThought,
        transcript: &str,
        persona: &PersonaContext,
    ) -> impl Future<Output = Result<String>> + Send {
        async move {
            match self {
                Self::RuleBased(c) => c.conversation_thought(kind, transcript, persona).await,
                Self::Llm(c) => c.conversation_thought(kind, transcript, persona).await,
            }
        }
    }
}

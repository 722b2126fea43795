//! Core types for LLM requests and responses, plus the structured
//! outputs each prompt asks for.

use serde::{Deserialize, Serialize};

/// Which model a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmTier {
    /// Small model for short scoring and extraction calls.
    Fast,
    /// Larger model for reflection and synthesis.
    Deep,
}

impl LlmTier {
    /// Tier for the numeric `tier` field of a prompt file (1 = fast).
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        if level <= 1 { Self::Fast } else { Self::Deep }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt (persona, rules, output format).
    pub system: String,
    /// User prompt (statements, transcript, instructions).
    pub user: String,
    /// Which model to use.
    pub tier: LlmTier,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Ask the backend for JSON-only output.
    pub json_mode: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// A fast-tier request.
    #[must_use]
    pub fn fast(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            tier: LlmTier::Fast,
            max_tokens: 50,
            temperature: 0.0,
            json_mode: true,
            timeout_ms: 30_000,
        }
    }

    /// A deep-tier request.
    #[must_use]
    pub fn deep(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            tier: LlmTier::Deep,
            max_tokens: 300,
            temperature: 0.5,
            json_mode: true,
            timeout_ms: 30_000,
        }
    }

    /// Set the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Structured outputs
// ---------------------------------------------------------------------------

/// `{"poignancy": 7}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoignancyResponse {
    /// 1–10 rating.
    pub poignancy: f32,
}

/// `{"questions": ["...", ...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocalPointsResponse {
    /// Salient questions.
    pub questions: Vec<String>,
}

/// One insight with the statement numbers it rests on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightItem {
    /// The insight sentence.
    pub insight: String,
    /// Statement numbers as printed in the prompt.
    pub because_of: Vec<usize>,
}

/// `{"insights": [{"insight": "...", "because_of": [0, 3]}]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsResponse {
    /// Insights in the order the model produced them.
    pub insights: Vec<InsightItem>,
}

/// `{"subject": "...", "predicate": "...", "object": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleResponse {
    /// Who or what.
    pub subject: String,
    /// Relation.
    pub predicate: String,
    /// Target or state.
    pub object: String,
}

/// `{"thought": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtResponse {
    /// One-sentence reflection.
    pub thought: String,
}

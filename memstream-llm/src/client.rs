//! LLM client: one interface over Ollama and OpenAI-compatible backends.

use std::time::{Duration, Instant};

use memstream_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse, LlmTier};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// e.g. `http://localhost:11434`
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// e.g. `https://api.openai.com`
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No LLM available; every call fails with `Unavailable`.
    None,
}

/// Routes requests to the configured backend with bounded retries.
#[derive(Debug, Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    fast_model: String,
    deep_model: String,
    max_retries: u32,
    timeout_ms: u64,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(
        provider: LlmProvider,
        fast_model: impl Into<String>,
        deep_model: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            fast_model: fast_model.into(),
            deep_model: deep_model.into(),
            max_retries,
            timeout_ms: 30_000,
        }
    }

    /// Create a client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "", "", 0)
    }

    /// Build a client from the `[llm]` config section.
    ///
    /// The OpenAI key is read from `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an unknown provider or a missing key.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider = match config.provider.as_str() {
            "ollama" => LlmProvider::Ollama {
                base_url: config.base_url.trim_end_matches('/').to_string(),
            },
            "openai" => LlmProvider::OpenAiCompatible {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: std::env::var("OPENAI_API_KEY").map_err(|_| {
                    LlmError::ConfigError("provider 'openai' needs OPENAI_API_KEY".into())
                })?,
            },
            "none" => LlmProvider::None,
            other => {
                return Err(LlmError::ConfigError(format!("unknown LLM provider: '{other}'")));
            }
        };
        let mut client = Self::new(
            provider,
            config.fast_model.clone(),
            config.deep_model.clone(),
            config.max_retries,
        );
        client.timeout_ms = config.request_timeout_ms;
        Ok(client)
    }

    /// Model name for a tier.
    #[must_use]
    pub fn model_for(&self, tier: LlmTier) -> &str {
        match tier {
            LlmTier::Fast => &self.fast_model,
            LlmTier::Deep => &self.deep_model,
        }
    }

    /// Default per-request timeout from config.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    ///
    /// `Unavailable` with no backend; `RetriesExhausted` once every attempt
    /// failed; `ParseError` if a successful reply is not the expected JSON
    /// envelope.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let (url, body, api_key) = match &self.provider {
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No LLM provider configured".into()));
            }
            LlmProvider::Ollama { base_url } => {
                (format!("{base_url}/api/generate"), self.ollama_body(request), None)
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => (
                format!("{base_url}/v1/chat/completions"),
                self.openai_body(request),
                Some(api_key.as_str()),
            ),
        };
        let model = self.model_for(request.tier);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    attempt = attempt + 1,
                    max = self.max_retries + 1,
                    model,
                    "retrying LLM call"
                );
            }

            let start = Instant::now();
            let mut call = self
                .http
                .post(&url)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms));
            if let Some(key) = api_key {
                call = call.bearer_auth(key);
            }
            let result = call.send().await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let envelope: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens) = match &self.provider {
                        LlmProvider::Ollama { .. } => read_ollama(&envelope),
                        _ => read_openai(&envelope),
                    }?;
                    debug!(model, latency_ms, tokens, "LLM call completed");
                    return Ok(LlmResponse {
                        text,
                        tokens_generated: tokens,
                        latency_ms,
                        model: model.to_string(),
                    });
                }
                Ok(resp) => {
                    last_error = format!(
                        "HTTP {}: {}",
                        resp.status(),
                        resp.text().await.unwrap_or_default()
                    );
                    warn!(
                        model,
                        attempt = attempt + 1,
                        error = %last_error,
                        "LLM backend returned error"
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(model, timeout_ms = request.timeout_ms, "LLM request timed out");
                    } else {
                        warn!(
                            model,
                            attempt = attempt + 1,
                            error = %last_error,
                            "LLM request failed"
                        );
                    }
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    fn ollama_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model_for(request.tier),
            "prompt": format!("{}\n\n{}", request.system, request.user),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn openai_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model_for(request.tier),
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

fn read_ollama(envelope: &Value) -> Result<(String, u32), LlmError> {
    let text = envelope["response"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("Ollama reply has no 'response' field".into()))?;
    Ok((text.to_string(), token_count(&envelope["eval_count"])))
}

fn read_openai(envelope: &Value) -> Result<(String, u32), LlmError> {
    let text = envelope["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("completion reply has no message content".into()))?;
    Ok((text.to_string(), token_count(&envelope["usage"]["completion_tokens"])))
}

fn token_count(v: &Value) -> u32 {
    v.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0)
}

/// Parse raw response text as structured JSON.
///
/// Models often wrap the object in prose or a code fence, so the outermost
/// `{...}` span is parsed when the whole text is not JSON.
///
/// # Errors
///
/// Returns `ParseError` if no JSON object of type `T` can be found.
pub fn parse_structured<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    if let Ok(v) = serde_json::from_str(text.trim()) {
        return Ok(v);
    }
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };
    serde_json::from_str(span)
        .map_err(|e| LlmError::ParseError(format!("{e}; raw text: '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PoignancyResponse, ThoughtResponse};

    #[test]
    fn parses_bare_json() {
        let p: PoignancyResponse = parse_structured(r#"{"poignancy": 4}"#).expect("parse");
        assert!((p.poignancy - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Sure! Here it is:\n```json\n{\"thought\": \"I should buy flour\"}\n```";
        let t: ThoughtResponse = parse_structured(text).expect("parse");
        assert_eq!(t.thought, "I should buy flour");
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = parse_structured::<PoignancyResponse>("no json here").expect_err("garbage");
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[test]
    fn envelopes_are_read_per_backend() {
        let (text, tokens) =
            read_ollama(&json!({"response": "{}", "eval_count": 12})).expect("ollama");
        assert_eq!((text.as_str(), tokens), ("{}", 12));

        let (text, tokens) = read_openai(&json!({
            "choices": [{"message": {"content": "hi"}}],
            "usage": {"completion_tokens": 3}
        }))
        .expect("openai");
        assert_eq!((text.as_str(), tokens), ("hi", 3));

        assert!(read_ollama(&json!({"error": "model not found"})).is_err());
    }

    #[test]
    fn config_selects_provider() {
        let mut config = LlmConfig::default();
        let client = LlmClient::from_config(&config).expect("ollama");
        assert!(client.is_available());
        assert_eq!(client.model_for(LlmTier::Deep), config.deep_model);

        config.provider = "none".into();
        assert!(!LlmClient::from_config(&config).expect("none").is_available());

        config.provider = "carrier-pigeon".into();
        assert!(matches!(
            LlmClient::from_config(&config),
            Err(LlmError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        let err = client
            .generate(&LlmRequest::fast("sys", "user"))
            .await
            .expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_exhausts_retries() {
        let client = LlmClient::new(
            LlmProvider::Ollama { base_url: "http://127.0.0.1:9".into() },
            "fast",
            "deep",
            1,
        );
        let err = client
            .generate(&LlmRequest::fast("sys", "user").with_timeout(500))
            .await
            .expect_err("nothing listens on the discard port");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}

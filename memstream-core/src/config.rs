//! Configuration for the memstream memory system.
//!
//! Maps directly to `memstream.toml`. Every field has a default, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{MemstreamError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemstreamConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Retrieval ranking settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Reflection trigger and synthesis settings.
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// Perception settings.
    #[serde(default)]
    pub perception: PerceptionConfig,
    /// Text-generation collaborator settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl MemstreamConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`MemstreamError::Config`] if the TOML is invalid or a value
    /// is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| MemstreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns [`MemstreamError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let w = &self.retrieval.weights;
        if [w.recency, w.relevance, w.importance]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(MemstreamError::Config(
                "retrieval.weights must be finite and non-negative".into(),
            ));
        }
        let d = self.retrieval.recency_decay;
        if !(d > 0.0 && d <= 1.0) {
            return Err(MemstreamError::Config(format!(
                "retrieval.recency_decay must be in (0, 1], got {d}"
            )));
        }
        if self.reflection.importance_trigger_max <= 0.0 {
            return Err(MemstreamError::Config(
                "reflection.importance_trigger_max must be positive".into(),
            ));
        }
        let choices: [(&str, &str, &[&str]); 3] = [
            ("general.log_format", &self.general.log_format, &["pretty", "json"]),
            ("llm.provider", &self.llm.provider, &["ollama", "openai", "none"]),
            ("persistence.backend", &self.persistence.backend, &["json", "sqlite"]),
        ];
        for (field, value, allowed) in choices {
            if !allowed.contains(&value) {
                return Err(MemstreamError::Config(format!(
                    "{field} must be one of {allowed:?}, got '{value}'"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Retrieval ranking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Nodes returned per focal point.
    #[serde(default = "default_30")]
    pub top_n: usize,
    /// Per-step geometric recency decay.
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f64,
    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embedding vector dimensions.
    #[serde(default = "default_384")]
    pub embedding_dimensions: usize,
    /// Focal-text embeddings kept in the LRU cache.
    #[serde(default = "default_1024")]
    pub embedding_cache_capacity: usize,
    /// Signal weights.
    #[serde(default)]
    pub weights: RetrievalWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 30,
            recency_decay: default_recency_decay(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: 384,
            embedding_cache_capacity: 1024,
            weights: RetrievalWeights::default(),
        }
    }
}

/// Weights applied to the normalized recency, relevance and importance
/// signals before fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalWeights {
    /// Weight for recency.
    #[serde(default = "default_1_0")]
    pub recency: f64,
    /// Weight for semantic relevance.
    #[serde(default = "default_1_0")]
    pub relevance: f64,
    /// Weight for importance.
    #[serde(default = "default_1_0")]
    pub importance: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            recency: 1.0,
            relevance: 1.0,
            importance: 1.0,
        }
    }
}

/// Reflection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Importance budget; reflection fires once it is used up.
    #[serde(default = "default_150")]
    pub importance_trigger_max: f64,
    /// Focal points generated per reflection.
    #[serde(default = "default_3")]
    pub focal_point_count: usize,
    /// Insights requested per focal point.
    #[serde(default = "default_5")]
    pub insights_per_focal_point: usize,
    /// Nodes retrieved per focal point as evidence.
    #[serde(default = "default_30")]
    pub retrieval_per_focal_point: usize,
    /// Lifetime of a synthesized thought.
    #[serde(default = "default_30_u32")]
    pub thought_ttl_days: u32,
    /// Simulation step; conversation closeout fires one step before the end.
    #[serde(default = "default_10_u32")]
    pub tick_seconds: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            importance_trigger_max: 150.0,
            focal_point_count: 3,
            insights_per_focal_point: 5,
            retrieval_per_focal_point: 30,
            thought_ttl_days: 30,
            tick_seconds: 10,
        }
    }
}

/// Perception configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Tile radius the agent can see.
    #[serde(default = "default_4")]
    pub vision_radius: u32,
    /// Nearest events attended to per tick.
    #[serde(default = "default_3")]
    pub attention_bandwidth: usize,
    /// Recent events checked before recording a duplicate.
    #[serde(default = "default_5")]
    pub retention: usize,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            vision_radius: 4,
            attention_bandwidth: 3,
            retention: 5,
        }
    }
}

/// Text-generation collaborator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "none" (rule-based).
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model for short scoring calls.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    /// Model for reflection and synthesis.
    #[serde(default = "default_deep_model")]
    pub deep_model: String,
    /// Hard timeout for any LLM call in milliseconds.
    #[serde(default = "default_30000")]
    pub request_timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_2_u32")]
    pub max_retries: u32,
    /// Directory of TOML prompt overrides, if any.
    #[serde(default)]
    pub prompt_dir: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            fast_model: default_fast_model(),
            deep_model: default_deep_model(),
            request_timeout_ms: 30_000,
            max_retries: 2,
            prompt_dir: None,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "json" (agent directory) or "sqlite" (checkpoint database).
    #[serde(default = "default_json")]
    pub backend: String,
    /// Use WAL mode for the SQLite backend.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Rotating SQLite backups to keep.
    #[serde(default = "default_3_u32")]
    pub backup_count: u32,
    /// Verify artifact checksums on load.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_json(),
            wal_mode: true,
            backup_count: 3,
            checksum_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (used by serde)
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_embedding_model() -> String { "all-MiniLM-L6-v2".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_fast_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_deep_model() -> String { "mistral:7b-instruct".to_string() }
fn default_json() -> String { "json".to_string() }
fn default_recency_decay() -> f64 { 0.99 }
fn default_1_0() -> f64 { 1.0 }
fn default_150() -> f64 { 150.0 }
fn default_2_u32() -> u32 { 2 }
fn default_3() -> usize { 3 }
fn default_3_u32() -> u32 { 3 }
fn default_4() -> u32 { 4 }
fn default_5() -> usize { 5 }
fn default_10_u32() -> u32 { 10 }
fn default_30() -> usize { 30 }
fn default_30_u32() -> u32 { 30 }
fn default_384() -> usize { 384 }
fn default_1024() -> usize { 1024 }
fn default_30000() -> u64 { 30_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = MemstreamConfig::from_toml("").expect("parse");
        assert_eq!(cfg, MemstreamConfig::default());
        assert!((cfg.retrieval.recency_decay - 0.99).abs() < f64::EPSILON);
        assert_eq!(cfg.perception.attention_bandwidth, 3);
        assert_eq!(cfg.reflection.focal_point_count, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = MemstreamConfig::from_toml(
            r#"
            [retrieval.weights]
            relevance = 2.5

            [perception]
            retention = 8
            "#,
        )
        .expect("parse");
        assert!((cfg.retrieval.weights.relevance - 2.5).abs() < f64::EPSILON);
        assert!((cfg.retrieval.weights.recency - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.perception.retention, 8);
        assert_eq!(cfg.perception.vision_radius, 4);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = MemstreamConfig::from_toml("[retrieval]\nrecency_decay = 1.5\n");
        assert!(matches!(err, Err(MemstreamError::Config(_))));
        let err = MemstreamConfig::from_toml("[retrieval.weights]\nimportance = -1.0\n");
        assert!(matches!(err, Err(MemstreamError::Config(_))));
    }

    #[test]
    fn unknown_choices_are_rejected() {
        let err = MemstreamConfig::from_toml("[persistence]\nbackend = \"redis\"\n");
        assert!(matches!(
            err,
            Err(MemstreamError::Config(ref m)) if m.contains("persistence.backend")
        ));
        let err = MemstreamConfig::from_toml("[general]\nlog_format = \"xml\"\n");
        assert!(matches!(err, Err(MemstreamError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = MemstreamConfig::from_toml("[retrieval\n");
        assert!(matches!(err, Err(MemstreamError::Config(_))));
    }
}

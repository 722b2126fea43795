//! Prompt templates for the memory collaborator calls.
//!
//! Every prompt is a versioned, testable artifact. The built-in templates
//! below are compiled in; a directory of TOML files can override any of
//! them (see [`PromptEngine::from_directory`]).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;
use crate::types::LlmTier;

/// Shared system preamble: the persona and the JSON-only rule.
pub const PERSONA_SYSTEM: &str = r"You are the inner voice of {persona_name}.
About {persona_name}: {persona_summary}

RULES:
- Answer from {persona_name}'s point of view.
- Your response must be valid JSON and nothing else.";

/// Poignancy of an observed event (fast).
pub const EVENT_POIGNANCY_USER: &str = r#"On a scale of 1 to 10, where 1 is purely mundane (e.g., brushing teeth, making bed) and 10 is extremely poignant (e.g., a break up, college acceptance), rate the likely poignancy of the following event for {persona_name}.

Event: {text}

Return JSON:
{{"poignancy": <integer 1-10>}}"#;

/// Poignancy of a conversation (fast).
pub const CHAT_POIGNANCY_USER: &str = r#"On a scale of 1 to 10, where 1 is purely mundane (e.g., routine morning greetings) and 10 is extremely poignant (e.g., a conversation about breaking up, a fight), rate the likely poignancy of the following conversation for {persona_name}.

Conversation: {text}

Return JSON:
{{"poignancy": <integer 1-10>}}"#;

/// Salient questions raised by recent memories (deep).
pub const FOCAL_POINTS_USER: &str = r#"{statements}

Given only the information above, what are the {count} most salient high-level questions we can answer about the subjects in the statements?

Return JSON:
{{"questions": ["question 1", ...]}}"#;

/// Insights with cited statement numbers (deep).
pub const INSIGHT_AND_EVIDENCE_USER: &str = r#"Input:
{statements}

What {count} high-level insights can you infer from the above statements? Cite the numbers of the statements each insight rests on.

Return JSON:
{{"insights": [{{"insight": "...", "because_of": [<statement number>, ...]}}]}}"#;

/// Subject-predicate-object extraction (fast).
pub const EVENT_TRIPLE_USER: &str = r#"Convert the sentence into a (subject, predicate, object) triple. The subject is usually {persona_name}.

Sentence: {text}

Return JSON:
{{"subject": "...", "predicate": "...", "object": "..."}}"#;

/// What to remember for planning after a conversation (deep).
pub const PLANNING_ON_CONVO_USER: &str = r#"[Conversation]
{transcript}

Write down if there is anything from the conversation that {persona_name} needs to remember for their planning, from {persona_name}'s perspective, in a full sentence.

Return JSON:
{{"thought": "..."}}"#;

/// What was interesting about a conversation (deep).
pub const MEMO_ON_CONVO_USER: &str = r#"[Conversation]
{transcript}

If you had to make a short memo about what {persona_name} found interesting in this conversation, what would it be? Write it from {persona_name}'s perspective, in a full sentence.

Return JSON:
{{"thought": "..."}}"#;

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value; `{{` and `}}` become
/// literal braces once every variable is substituted.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result.replace("{{", "{").replace("}}", "}")
}

/// Numbered statement list: `0. first\n1. second\n`.
#[must_use]
pub fn numbered(statements: &[String]) -> String {
    statements
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{i}. {s}\n"))
        .collect()
}

// ---------------------------------------------------------------------------
// PromptEngine: versioned TOML template loader
// ---------------------------------------------------------------------------

/// Identifies a prompt template by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Poignancy of an event or thought.
    EventPoignancy,
    /// Poignancy of a conversation.
    ChatPoignancy,
    /// Focal-point questions for reflection.
    FocalPoints,
    /// Insights with evidence numbers.
    InsightAndEvidence,
    /// Triple extraction for a synthesized thought.
    EventTriple,
    /// Planning note after a conversation.
    PlanningOnConvo,
    /// Memo after a conversation.
    MemoOnConvo,
}

impl PromptId {
    /// Returns the TOML filename (without path) for this prompt.
    #[must_use]
    pub fn filename(self) -> &'static str {
        match self {
            Self::EventPoignancy => "event_poignancy.toml",
            Self::ChatPoignancy => "chat_poignancy.toml",
            Self::FocalPoints => "focal_points.toml",
            Self::InsightAndEvidence => "insight_and_evidence.toml",
            Self::EventTriple => "event_triple.toml",
            Self::PlanningOnConvo => "planning_on_convo.toml",
            Self::MemoOnConvo => "memo_on_convo.toml",
        }
    }

    /// All prompt IDs.
    #[must_use]
    pub fn all() -> &'static [PromptId] {
        &[
            Self::EventPoignancy,
            Self::ChatPoignancy,
            Self::FocalPoints,
            Self::InsightAndEvidence,
            Self::EventTriple,
            Self::PlanningOnConvo,
            Self::MemoOnConvo,
        ]
    }

    fn name(self) -> &'static str {
        self.filename().trim_end_matches(".toml")
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| LlmError::ConfigError(format!("unknown prompt id: '{s}'")))
    }
}

/// Metadata and templates parsed from a TOML prompt file.
#[derive(Debug, Clone, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

/// Inner `[prompt]` section of a TOML file.
#[derive(Debug, Clone, Deserialize)]
struct TomlPromptData {
    version: String,
    tier: u8,
    max_tokens: u32,
    temperature: f32,
    #[serde(default)]
    system: Option<String>,
    user: String,
}

/// A loaded, ready-to-render prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Prompt version string (e.g., "1.0").
    pub version: String,
    /// Model tier.
    pub tier: LlmTier,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System prompt template (contains `{key}` placeholders).
    pub system: String,
    /// User prompt template (contains `{key}` placeholders).
    pub user: String,
}

impl PromptTemplate {
    fn builtin(tier: LlmTier, max_tokens: u32, temperature: f32, user: &str) -> Self {
        Self {
            version: "builtin".into(),
            tier,
            max_tokens,
            temperature,
            system: PERSONA_SYSTEM.into(),
            user: user.into(),
        }
    }
}

/// Engine that holds versioned prompt templates and renders them.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    templates: HashMap<PromptId, PromptTemplate>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptEngine {
    /// A `PromptEngine` pre-loaded with the compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        use LlmTier::{Deep, Fast};

        let templates = HashMap::from([
            (
                PromptId::EventPoignancy,
                PromptTemplate::builtin(Fast, 15, 0.0, EVENT_POIGNANCY_USER),
            ),
            (PromptId::ChatPoignancy, PromptTemplate::builtin(Fast, 15, 0.0, CHAT_POIGNANCY_USER)),
            (PromptId::FocalPoints, PromptTemplate::builtin(Deep, 200, 0.5, FOCAL_POINTS_USER)),
            (
                PromptId::InsightAndEvidence,
                PromptTemplate::builtin(Deep, 400, 0.5, INSIGHT_AND_EVIDENCE_USER),
            ),
            (PromptId::EventTriple, PromptTemplate::builtin(Fast, 60, 0.0, EVENT_TRIPLE_USER)),
            (
                PromptId::PlanningOnConvo,
                PromptTemplate::builtin(Deep, 120, 0.3, PLANNING_ON_CONVO_USER),
            ),
            (PromptId::MemoOnConvo, PromptTemplate::builtin(Deep, 120, 0.3, MEMO_ON_CONVO_USER)),
        ]);
        Self { templates }
    }

    /// Built-in templates overridden by whatever TOML files exist in `dir`.
    ///
    /// Missing files keep the built-in version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `dir` is not a directory or a present file
    /// fails to read or parse.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, LlmError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!(
                "prompt directory does not exist: {}",
                dir.display()
            )));
        }

        let mut engine = Self::builtin();
        for id in PromptId::all() {
            let path = dir.join(id.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                LlmError::ConfigError(format!("failed to read {}: {e}", path.display()))
            })?;
            let parsed: TomlPromptFile = toml::from_str(&content).map_err(|e| {
                LlmError::ConfigError(format!("failed to parse {}: {e}", path.display()))
            })?;
            let d = parsed.prompt;
            debug!(prompt = %id, version = %d.version, "loaded prompt override");
            engine.templates.insert(*id, PromptTemplate {
                version: d.version,
                tier: LlmTier::from_level(d.tier),
                max_tokens: d.max_tokens,
                temperature: d.temperature,
                system: d.system.unwrap_or_else(|| PERSONA_SYSTEM.into()),
                user: d.user,
            });
        }
        Ok(engine)
    }

    /// Get a loaded prompt template by ID.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptTemplate> {
        self.templates.get(&id)
    }

    /// Render both system and user prompts for a given ID.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the prompt ID is not loaded.
    pub fn render(
        &self,
        id: PromptId,
        vars: &[(&str, &str)],
    ) -> Result<(String, String), LlmError> {
        let tpl = self
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        Ok((render_template(&tpl.system, vars), render_template(&tpl.user, vars)))
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_works() {
        let rendered = render_template(
            "Hello {name}, you are a {role}.",
            &[("name", "Klaus"), ("role", "student")],
        );
        assert_eq!(rendered, "Hello Klaus, you are a student.");
    }

    #[test]
    fn template_handles_missing_vars() {
        let rendered = render_template("Hello {name}, {unknown}.", &[("name", "Klaus")]);
        assert_eq!(rendered, "Hello Klaus, {unknown}.");
    }

    #[test]
    fn escaped_braces_become_literal() {
        let rendered = render_template(r#"{{"poignancy": {n}}}"#, &[("n", "3")]);
        assert_eq!(rendered, r#"{"poignancy": 3}"#);
    }

    #[test]
    fn numbered_statements_start_at_zero() {
        let s = numbered(&["a".to_string(), "b".to_string()]);
        assert_eq!(s, "0. a\n1. b\n");
    }

    #[test]
    fn prompt_id_from_str_round_trip() {
        for id in PromptId::all() {
            let parsed: PromptId = id.to_string().parse().expect("should parse");
            assert_eq!(*id, parsed);
        }
        assert!("nonexistent".parse::<PromptId>().is_err());
    }

    #[test]
    fn builtin_engine_has_every_template() {
        let engine = PromptEngine::builtin();
        assert_eq!(engine.len(), PromptId::all().len());
        assert_eq!(
            engine.get(PromptId::InsightAndEvidence).expect("insights").tier,
            LlmTier::Deep
        );
        assert_eq!(engine.get(PromptId::EventPoignancy).expect("poignancy").tier, LlmTier::Fast);
    }

    #[test]
    fn directory_overrides_one_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("focal_points.toml"),
            r#"
[prompt]
version = "2.1"
tier = 1
max_tokens = 80
temperature = 0.2
user = "List {count} questions about: {statements}"
"#,
        )
        .expect("write");

        let engine = PromptEngine::from_directory(dir.path()).expect("load");
        let tpl = engine.get(PromptId::FocalPoints).expect("focal");
        assert_eq!(tpl.version, "2.1");
        assert_eq!(tpl.tier, LlmTier::Fast);
        assert_eq!(tpl.system, PERSONA_SYSTEM);
        assert_eq!(engine.get(PromptId::MemoOnConvo).expect("memo").version, "builtin");
    }

    #[test]
    fn bad_directory_is_config_error() {
        let err = PromptEngine::from_directory("/definitely/not/here").expect_err("missing");
        assert!(matches!(err, LlmError::ConfigError(_)));

        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("event_triple.toml"), "not = [valid").expect("write");
        assert!(PromptEngine::from_directory(dir.path()).is_err());
    }
}

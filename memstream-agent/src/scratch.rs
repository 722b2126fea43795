//! Per-agent short-term state (`scratch.json`).
//!
//! Holds the tunables the memory engine reads every tick (perception
//! limits, retrieval weights, reflection budget) plus the live conversation.
//! Keys the engine does not use (plans, schedules, paths) are carried
//! through untouched so a planner sharing the file loses nothing.

use std::path::Path;

use memstream_core::MemstreamConfig;
use memstream_core::cognition::PersonaContext;
use memstream_core::config::RetrievalWeights;
use memstream_core::memory::Utterance;
use memstream_core::reflection::{ConversationState, ReflectionCounters};
use memstream_core::retrieval::RetrievalParams;
use memstream_core::{Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Clock format used throughout `scratch.json`, e.g. `February 13, 2023, 14:05:00`.
pub const SCRATCH_TIME_FORMAT: &str = "%B %d, %Y, %H:%M:%S";

mod scratch_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SCRATCH_TIME_FORMAT;
    use memstream_core::Timestamp;

    pub fn serialize<S: Serializer>(ts: &Option<Timestamp>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&ts.format(SCRATCH_TIME_FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Timestamp>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| {
                NaiveDateTime::parse_from_str(&raw, SCRATCH_TIME_FORMAT)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

fn default_vision_r() -> u32 { 4 }
fn default_att_bandwidth() -> usize { 3 }
fn default_retention() -> usize { 5 }
fn default_1_0() -> f64 { 1.0 }
fn default_recency_decay() -> f64 { 0.99 }
fn default_trigger_max() -> f64 { 150.0 }
fn default_thought_count() -> usize { 5 }

/// One agent's scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaScratch {
    // -- perception --
    /// Tiles the agent can see around itself.
    #[serde(default = "default_vision_r")]
    pub vision_r: u32,
    /// Events perceived per tick.
    #[serde(default = "default_att_bandwidth")]
    pub att_bandwidth: usize,
    /// Recent events an observation must differ from to count as new.
    #[serde(default = "default_retention")]
    pub retention: usize,

    // -- world --
    /// Simulation clock.
    #[serde(default, with = "scratch_time")]
    pub curr_time: Option<Timestamp>,
    /// Current `[x, y]` tile.
    #[serde(default)]
    pub curr_tile: Option<[i64; 2]>,

    // -- identity --
    /// Full name.
    pub name: String,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Age in years.
    #[serde(default)]
    pub age: Option<u32>,
    /// Permanent core traits.
    #[serde(default)]
    pub innate: Option<String>,
    /// Stable learned traits.
    #[serde(default)]
    pub learned: Option<String>,
    /// What the agent is currently up to in life.
    #[serde(default)]
    pub currently: Option<String>,
    /// Daily rhythm.
    #[serde(default)]
    pub lifestyle: Option<String>,

    // -- retrieval & reflection --
    /// Recency weight.
    #[serde(default = "default_1_0")]
    pub recency_w: f64,
    /// Relevance weight.
    #[serde(default = "default_1_0")]
    pub relevance_w: f64,
    /// Importance weight.
    #[serde(default = "default_1_0")]
    pub importance_w: f64,
    /// Recency decay per access step.
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f64,
    /// Importance budget between reflections.
    #[serde(default = "default_trigger_max")]
    pub importance_trigger_max: f64,
    /// Importance budget left.
    #[serde(default = "default_trigger_max")]
    pub importance_trigger_curr: f64,
    /// Events since the last reflection.
    #[serde(default)]
    pub importance_ele_n: usize,
    /// Insights drawn per focal point.
    #[serde(default = "default_thought_count")]
    pub thought_count: usize,

    // -- current action --
    /// Sentence for the current action; also the description of a chat node.
    #[serde(default)]
    pub act_description: Option<String>,
    /// Triple of the current action.
    #[serde(default)]
    pub act_event: Option<(String, Option<String>, Option<String>)>,

    // -- conversation --
    /// Interlocutor, if chatting.
    #[serde(default)]
    pub chatting_with: Option<String>,
    /// `[speaker, line]` turns of the ongoing conversation.
    #[serde(default)]
    pub chat: Option<Vec<(String, String)>>,
    /// Scheduled end of the conversation.
    #[serde(default, with = "scratch_time")]
    pub chatting_end_time: Option<Timestamp>,
    /// Set once the conversation has been reflected on.
    #[serde(default)]
    pub chat_closed_out: bool,

    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersonaScratch {
    /// Fresh scratch for `name`, tunables seeded from `config`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &MemstreamConfig) -> Self {
        let name = name.into();
        let mut parts = name.splitn(2, ' ');
        let first_name = parts.next().map(str::to_string);
        let last_name = parts.next().map(str::to_string);
        Self {
            vision_r: config.perception.vision_radius,
            att_bandwidth: config.perception.attention_bandwidth,
            retention: config.perception.retention,
            curr_time: None,
            curr_tile: None,
            name,
            first_name,
            last_name,
            age: None,
            innate: None,
            learned: None,
            currently: None,
            lifestyle: None,
            recency_w: config.retrieval.weights.recency,
            relevance_w: config.retrieval.weights.relevance,
            importance_w: config.retrieval.weights.importance,
            recency_decay: config.retrieval.recency_decay,
            importance_trigger_max: config.reflection.importance_trigger_max,
            importance_trigger_curr: config.reflection.importance_trigger_max,
            importance_ele_n: 0,
            thought_count: config.reflection.insights_per_focal_point,
            act_description: None,
            act_event: None,
            chatting_with: None,
            chat: None,
            chatting_end_time: None,
            chat_closed_out: false,
            extra: Map::new(),
        }
    }

    /// Load `scratch.json`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let scratch: Self = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), agent = %scratch.name, "Loaded scratch");
        Ok(scratch)
    }

    /// Write `scratch.json`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Name and identity summary for collaborator prompts.
    #[must_use]
    pub fn persona(&self) -> PersonaContext {
        let summary = [
            self.age.map(|a| format!("Age: {a}")),
            self.innate.as_ref().map(|s| format!("Innate traits: {s}")),
            self.learned.clone(),
            self.currently.clone(),
            self.lifestyle.clone(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");
        PersonaContext::new(self.name.clone(), summary)
    }

    /// Retrieval tunables with this agent's weights and decay.
    #[must_use]
    pub fn retrieval_params(&self, top_n: usize) -> RetrievalParams {
        RetrievalParams {
            weights: RetrievalWeights {
                recency: self.recency_w,
                relevance: self.relevance_w,
                importance: self.importance_w,
            },
            recency_decay: self.recency_decay,
            top_n,
        }
    }

    /// Reflection trigger state.
    #[must_use]
    pub fn counters(&self) -> ReflectionCounters {
        ReflectionCounters {
            importance_trigger_max: self.importance_trigger_max,
            importance_budget_remaining: self.importance_trigger_curr,
            new_node_count: self.importance_ele_n,
        }
    }

    /// Write back reflection trigger state.
    pub fn set_counters(&mut self, counters: &ReflectionCounters) {
        self.importance_trigger_max = counters.importance_trigger_max;
        self.importance_trigger_curr = counters.importance_budget_remaining;
        self.importance_ele_n = counters.new_node_count;
    }

    /// The ongoing conversation.
    #[must_use]
    pub fn conversation(&self) -> ConversationState {
        ConversationState {
            chatting_with: self.chatting_with.clone(),
            transcript: self
                .chat
                .iter()
                .flatten()
                .map(|(speaker, line)| Utterance::new(speaker, line))
                .collect(),
            end_time: self.chatting_end_time,
            closed_out: self.chat_closed_out,
        }
    }

    /// Write back the conversation.
    pub fn set_conversation(&mut self, conversation: &ConversationState) {
        self.chatting_with.clone_from(&conversation.chatting_with);
        self.chat = if conversation.transcript.is_empty() && conversation.chatting_with.is_none() {
            None
        } else {
            Some(
                conversation
                    .transcript
                    .iter()
                    .map(|u| (u.speaker.clone(), u.line.clone()))
                    .collect(),
            )
        };
        self.chatting_end_time = conversation.end_time;
        self.chat_closed_out = conversation.closed_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstream_core::parse_timestamp;

    #[test]
    fn new_scratch_takes_config_tunables() {
        let mut config = MemstreamConfig::default();
        config.perception.attention_bandwidth = 8;
        config.reflection.importance_trigger_max = 40.0;
        let scratch = PersonaScratch::new("Klaus Mueller", &config);
        assert_eq!(scratch.att_bandwidth, 8);
        assert_eq!(scratch.counters(), ReflectionCounters::new(40.0));
        assert_eq!(scratch.first_name.as_deref(), Some("Klaus"));
        assert_eq!(scratch.last_name.as_deref(), Some("Mueller"));
    }

    #[test]
    fn reads_scratch_written_by_a_planner() {
        let raw = r#"{
            "vision_r": 8,
            "att_bandwidth": 8,
            "retention": 8,
            "curr_time": "February 13, 2023, 14:05:00",
            "curr_tile": [72, 14],
            "daily_plan_req": "Klaus works on his paper",
            "name": "Klaus Mueller",
            "first_name": "Klaus",
            "last_name": "Mueller",
            "age": 20,
            "innate": "kind, inquisitive, passionate",
            "learned": "Klaus is a student at Oak Hill College.",
            "currently": "Klaus is writing a research paper.",
            "lifestyle": "Klaus goes to bed around 11pm.",
            "recency_w": 1,
            "relevance_w": 1,
            "importance_w": 1,
            "recency_decay": 0.99,
            "importance_trigger_max": 150,
            "importance_trigger_curr": 97,
            "importance_ele_n": 12,
            "thought_count": 5,
            "f_daily_schedule": [["sleeping", 360]],
            "act_description": "conversing about the party",
            "act_event": ["Klaus Mueller", "chat with", "Isabella Rodriguez"],
            "chatting_with": "Isabella Rodriguez",
            "chat": [["Isabella Rodriguez", "Come to my party!"], ["Klaus Mueller", "Sure."]],
            "chatting_end_time": "February 13, 2023, 14:10:00"
        }"#;
        let scratch: PersonaScratch = serde_json::from_str(raw).expect("parse");

        assert_eq!(scratch.curr_time, Some(parse_timestamp("2023-02-13 14:05:00").expect("ts")));
        assert_eq!(scratch.counters().importance_budget_remaining, 97.0);
        assert_eq!(scratch.counters().new_node_count, 12);
        let convo = scratch.conversation();
        assert_eq!(convo.chatting_with.as_deref(), Some("Isabella Rodriguez"));
        assert_eq!(convo.transcript.len(), 2);
        assert!(!convo.closed_out);
        assert!(scratch.extra.contains_key("daily_plan_req"));
        assert!(scratch.persona().summary.contains("research paper"));

        let back = serde_json::to_value(&scratch).expect("encode");
        assert_eq!(back["f_daily_schedule"][0][0], "sleeping");
        assert_eq!(back["curr_time"], "February 13, 2023, 14:05:00");
    }

    #[test]
    fn counters_and_conversation_write_back() {
        let mut scratch = PersonaScratch::new("Maria Lopez", &MemstreamConfig::default());
        let mut counters = scratch.counters();
        counters.record_event(6.0);
        scratch.set_counters(&counters);
        assert_eq!(scratch.importance_ele_n, 1);

        let end = parse_timestamp("2023-02-13 10:00:00").expect("ts");
        let mut convo = ConversationState::new("Klaus Mueller", end);
        convo.transcript.push(Utterance::new("Klaus Mueller", "hi"));
        convo.closed_out = true;
        scratch.set_conversation(&convo);
        assert_eq!(scratch.conversation(), convo);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scratch.json");
        let mut scratch = PersonaScratch::new("Isabella Rodriguez", &MemstreamConfig::default());
        scratch.curr_time = Some(parse_timestamp("2023-02-14 17:00:00").expect("ts"));
        scratch.save(&path).expect("save");
        assert_eq!(PersonaScratch::load(&path).expect("load"), scratch);
    }
}

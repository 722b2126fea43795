//! # memstream-agent: per-agent integration
//!
//! Glues the game-agnostic memory engine to a simulated agent:
//!
//! ```text
//!  perceived tiles ──▶ perception ──▶ MemoryStore ◀── reflection
//!                          │               │              ▲
//!                          ▼               ▼              │
//!                    MemoryTree    associative recall     │
//!                                                         │
//!  PersonaScratch (budget, weights, conversation) ────────┘
//! ```
//!
//! ## Modules
//!
//! - `scratch`: the agent's short-term state (`scratch.json`)
//! - `perception`: observations to event/chat nodes
//! - `tick`: one perceive → recall → reflect step
//! - `agent`: directory and checkpoint persistence
//! - `cognition`: rule-based or LLM collaborator from config
//! - `logging`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod cognition;
pub mod logging;
pub mod perception;
pub mod scratch;
pub mod tick;

pub use agent::Agent;
pub use cognition::AgentCognition;
pub use perception::{PerceivedEvent, PerceivedTile};
pub use scratch::PersonaScratch;
pub use tick::{TickInput, TickReport};

//! # memstream-llm: LLM collaborator for memstream
//!
//! Implements [`memstream_core::cognition::Cognition`] on top of a language
//! model:
//!   - **Ollama** (local, the default)
//!   - **OpenAI-compatible API**
//!
//! Every call goes through a versioned prompt template, asks for JSON and
//! validates the reply before it reaches the memory store.
//!
//! ```text
//! Fast tier: poignancy scoring, triple extraction       [short replies]
//! Deep tier: focal points, insights, conversation notes [reflection]
//! ```

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod cognition;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use cognition::LlmCognition;
pub use error::LlmError;
pub use types::{LlmRequest, LlmResponse, LlmTier};

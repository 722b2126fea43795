//! # memstream Core Library
//!
//! Long-term memory for simulated social agents.
//!
//! Every agent owns one [`MemoryStore`]: an append-only stream of typed
//! memory nodes with associative indices over it.
//!
//! - **Event**: something the agent observed ("Isabella is brewing coffee")
//! - **Thought**: something the agent concluded by reflecting on evidence
//! - **Chat**: a conversation the agent took part in
//!
//! On top of the store sit the [`retrieval`] engine (fused recency /
//! relevance / importance ranking) and the [`reflection`] state machine,
//! which feeds synthesized thoughts back into the store.
//!
//! ## Ownership Contract
//!
//! A store is mutated by exactly one logical writer per simulation tick.
//! Stores of different agents share nothing and can live on different
//! threads.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cognition;
pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod persistence;
pub mod reflection;
pub mod retrieval;
pub mod types;

pub use config::MemstreamConfig;
pub use error::{MemstreamError, Result};
pub use memory::{MemoryStore, NodeDraft};
pub use memory::node::{Evidence, MemoryNode, Utterance};
pub use types::*;

//! The per-tick memory loop: perceive, recall, reflect.

use memstream_core::cognition::Cognition;
use memstream_core::embedding::EmbeddingProvider;
use memstream_core::reflection::{ReflectionContext, ReflectionOutcome, reflect};
use memstream_core::retrieval::{AssociativeRetrieval, RetrievalEngine};
use memstream_core::{MemstreamConfig, NodeId, Result, Timestamp, Triple};
use tracing::{debug, instrument};

use crate::agent::Agent;
use crate::perception::{PerceivedTile, PerceptionContext, PerceptionLimits, SelfAction, perceive};

/// What the agent sees this tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    /// Visible tiles.
    pub tiles: &'a [PerceivedTile],
    /// `world:sector:arena` the agent stands in; events elsewhere are ignored.
    pub arena: Option<&'a str>,
    /// Simulation time.
    pub now: Timestamp,
}

/// Everything one tick wrote or recalled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Event nodes written by perception.
    pub perceived: Vec<NodeId>,
    /// Keyword-associated memories per perceived event.
    pub associative: Vec<AssociativeRetrieval>,
    /// Reflection results.
    pub reflection: ReflectionOutcome,
}

impl Agent {
    /// Run one cognitive tick.
    ///
    /// Scratch counters and conversation state are written back even when
    /// reflection fails.
    ///
    /// # Errors
    ///
    /// Perception failures and a failed conversation closeout.
    #[instrument(
        name = "memstream::tick",
        skip_all,
        fields(agent = %self.scratch.name, now = %input.now)
    )]
    pub async fn tick<C: Cognition>(
        &mut self,
        cognition: &C,
        embedder: &dyn EmbeddingProvider,
        config: &MemstreamConfig,
        input: TickInput<'_>,
    ) -> Result<TickReport> {
        self.scratch.curr_time = Some(input.now);
        let persona = self.scratch.persona();
        let mut counters = self.scratch.counters();
        let mut conversation = self.scratch.conversation();

        let perceived = {
            let action = SelfAction {
                event: self.scratch.act_event.as_ref().map(|(s, p, o)| {
                    Triple::new(
                        s.clone(),
                        p.clone().unwrap_or_default(),
                        o.clone().unwrap_or_default(),
                    )
                }),
                description: self.scratch.act_description.as_deref(),
                transcript: &conversation.transcript,
            };
            let ctx = PerceptionContext {
                cognition,
                embedder,
                persona: &persona,
                limits: PerceptionLimits {
                    attention_bandwidth: self.scratch.att_bandwidth,
                    retention: self.scratch.retention,
                },
                action,
            };
            let result = perceive(
                &mut self.store,
                &mut self.spatial,
                &mut counters,
                &ctx,
                input.tiles,
                input.arena,
                input.now,
            )
            .await;
            self.scratch.set_counters(&counters);
            result?
        };

        let associative = RetrievalEngine::related_to_events(&self.store, &perceived);

        let engine = RetrievalEngine::new(self.scratch.retrieval_params(config.retrieval.top_n));
        let mut reflection_config = config.reflection.clone();
        reflection_config.insights_per_focal_point = self.scratch.thought_count;
        let ctx = ReflectionContext {
            cognition,
            embedder,
            persona: &persona,
            config: &reflection_config,
            retrieval: &engine,
        };
        let reflection = reflect(
            &mut self.store,
            &mut counters,
            &mut conversation,
            &ctx,
            input.now,
        )
        .await;
        self.scratch.set_counters(&counters);
        self.scratch.set_conversation(&conversation);
        let reflection = reflection?;

        debug!(
            perceived = perceived.len(),
            thoughts = reflection.thoughts.len(),
            closeout = reflection.closeout.len(),
            "tick done"
        );
        Ok(TickReport {
            perceived,
            associative,
            reflection,
        })
    }
}

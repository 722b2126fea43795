//! End-to-end memory flows: observe → retrieve → reflect → persist → restore.

use chrono::Duration;

use memstream_core::cognition::{PersonaContext, RuleBasedCognition};
use memstream_core::config::{MemstreamConfig, PersistenceConfig};
use memstream_core::embedding::{EmbeddingProvider, HashingEmbeddingProvider};
use memstream_core::memory::{Evidence, MemoryStore, NodeDraft, Utterance};
use memstream_core::metrics;
use memstream_core::persistence::files::{load_dir, save_dir};
use memstream_core::persistence::sqlite::CheckpointStore;
use memstream_core::reflection::{
    ConversationState, ReflectionContext, ReflectionCounters, reflect,
};
use memstream_core::retrieval::{RetrievalEngine, RetrievalParams, union_of};
use memstream_core::types::{Embedding, NodeId, NodeKind, Timestamp, Triple, parse_timestamp};

fn ts(s: &str) -> Timestamp {
    parse_timestamp(s).expect("timestamp")
}

fn observe(
    store: &mut MemoryStore,
    embedder: &dyn EmbeddingProvider,
    at: Timestamp,
    triple: Triple,
    importance: f32,
) -> NodeId {
    let desc = format!("{} {} {}", triple.subject, triple.predicate, triple.object);
    let vector = embedder.embed(&desc).expect("embed");
    let keywords = [triple.subject.clone(), triple.object.clone()];
    store
        .insert_event(
            NodeDraft::new(at, triple, desc.clone())
                .keywords(keywords)
                .importance(importance)
                .embedding(desc, vector),
        )
        .id
}

// ---------------------------------------------------------------------------
// Ranking scenario
// ---------------------------------------------------------------------------

#[test]
fn ranking_with_tied_relevance_matches_formula() {
    let mut store = MemoryStore::new();
    let same = Embedding(vec![1.0, 0.0, 0.0]);
    let start = ts("2023-02-13 08:00:00");
    // Access order oldest → newest is C, B, A.
    let mut add = |minute: i64, desc: &str, importance: f32| {
        store
            .insert_event(
                NodeDraft::new(
                    start + Duration::minutes(minute),
                    Triple::new(desc, "is", "here"),
                    desc,
                )
                .importance(importance)
                .embedding(desc, same.clone()),
            )
            .id
    };
    let c = add(0, "C", 5.0);
    let b = add(1, "B", 10.0);
    let a = add(2, "A", 1.0);

    let engine = RetrievalEngine::new(RetrievalParams {
        top_n: 1,
        ..RetrievalParams::default()
    });
    let ranked = engine
        .clone()
        .with_top_n(3)
        .rank(&store, &same);

    let d: f64 = 0.99;
    let (rc, rb, ra) = (d.powi(3), d.powi(2), d.powi(1));
    let rec_b = (rb - rc) * (1.0 - 0.0) / (ra - rc) + 0.0;
    let imp_c = (5.0 - 1.0) * (1.0 - 0.0) / (10.0 - 1.0) + 0.0;
    let expect_a = 1.0 * 1.0 * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * 0.0 * 2.0;
    let expect_b = 1.0 * rec_b * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * 1.0 * 2.0;
    let expect_c = 1.0 * 0.0 * 0.5 + 1.0 * 0.5 * 3.0 + 1.0 * imp_c * 2.0;

    let ids: Vec<NodeId> = ranked.iter().map(|r| r.node_id).collect();
    assert_eq!(ids, vec![b, c, a]);
    assert_eq!(ranked[0].score.value(), expect_b);
    assert_eq!(ranked[1].score.value(), expect_c);
    assert_eq!(ranked[2].score.value(), expect_a);

    let now = ts("2023-02-13 09:00:00");
    let top = engine.retrieve(&mut store, &HashingEmbeddingProvider::new(3), &["anything"], now);
    assert_eq!(top[0].node_ids(), vec![b]);
    assert_eq!(store.get(b).expect("b").last_accessed_at, now);
    assert_eq!(store.get(a).expect("a").last_accessed_at, start + Duration::minutes(2));
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observe_reflect_persist_restore() {
    let config = MemstreamConfig::default();
    let embedder = HashingEmbeddingProvider::new(64);
    let cognition = RuleBasedCognition::new();
    let persona = PersonaContext::new("Klaus Mueller", "a sociology student writing a paper");
    let engine = RetrievalEngine::new(RetrievalParams::from(&config.retrieval));
    let ctx = ReflectionContext {
        cognition: &cognition,
        embedder: &embedder,
        persona: &persona,
        config: &config.reflection,
        retrieval: &engine,
    };

    let mut store = MemoryStore::new();
    let mut counters = ReflectionCounters::new(12.0);
    let mut conversation = ConversationState::default();
    let start = ts("2023-02-13 09:00:00");

    let observations = [
        Triple::new("Klaus Mueller", "is", "writing his research paper"),
        Triple::new("Isabella Rodriguez", "is", "planning a party"),
        Triple::new("Klaus Mueller", "is", "reading about gentrification"),
        Triple::new("Maria Lopez", "is", "studying physics"),
        Triple::new("Isabella Rodriguez", "is", "decorating for the party"),
    ];
    let mut perceived = Vec::new();
    for (i, triple) in observations.into_iter().enumerate() {
        let at = start + Duration::minutes(i64::try_from(i).expect("small"));
        let id = observe(&mut store, &embedder, at, triple, 3.0);
        counters.record_event(3.0);
        perceived.push(id);
    }
    assert!(counters.should_reflect(&store));

    let associative = RetrievalEngine::related_to_events(&store, &perceived);
    assert_eq!(associative.len(), 5);
    assert!(associative[1].events.contains(&perceived[4]));

    let outcome = reflect(
        &mut store,
        &mut counters,
        &mut conversation,
        &ctx,
        start + Duration::minutes(10),
    )
    .await
    .expect("reflect");
    assert!(outcome.triggered);
    assert!(!outcome.thoughts.is_empty());
    assert_eq!(counters.new_node_count, 0);

    let retrieved = engine.retrieve(
        &mut store,
        &embedder,
        &["Isabella's party", "Klaus's paper"],
        start + Duration::minutes(11),
    );
    assert_eq!(retrieved.len(), 2);
    assert!(!union_of(&retrieved).is_empty());

    // JSON directory round trip.
    let dir = tempfile::tempdir().expect("tempdir");
    let mem_dir = dir.path().join("associative_memory");
    save_dir(&store, &mem_dir).expect("save");
    let restored = load_dir(&mem_dir).expect("load");
    assert_eq!(restored, store);

    // SQLite checkpoint round trip.
    let db = CheckpointStore::open(dir.path().join("town.db"), &PersistenceConfig::default())
        .expect("open");
    db.save_store(&persona.name, &store).expect("checkpoint");
    let from_db = db.load_store(&persona.name).expect("load").expect("Some");
    assert_eq!(from_db, store);

    let snap = metrics::global().counters.snapshot();
    assert!(snap.reflections >= 1);
    assert!(snap.saves_completed >= 2);
    assert!(snap.loads_completed >= 2);
}

#[tokio::test]
async fn conversation_closeout_links_back_to_chat() {
    let config = MemstreamConfig::default();
    let embedder = HashingEmbeddingProvider::new(32);
    let persona = PersonaContext::new("Isabella Rodriguez", "runs Hobbs Cafe");
    let engine = RetrievalEngine::default();
    let ctx = ReflectionContext {
        cognition: &RuleBasedCognition,
        embedder: &embedder,
        persona: &persona,
        config: &config.reflection,
        retrieval: &engine,
    };

    let mut store = MemoryStore::new();
    let transcript = vec![
        Utterance::new("Isabella Rodriguez", "I'm hosting a Valentine's party on the 14th."),
        Utterance::new("Maria Lopez", "I'll be there!"),
    ];
    let chat = store
        .insert_chat(
            NodeDraft::new(
                ts("2023-02-13 14:00:00"),
                Triple::new("Isabella Rodriguez", "chat with", "Maria Lopez"),
                "conversing about the Valentine's party",
            )
            .keywords(["Isabella Rodriguez", "Maria Lopez"])
            .evidence(Evidence::Transcript(transcript.clone())),
        )
        .id;

    let mut conversation = ConversationState::new("Maria Lopez", ts("2023-02-13 14:05:00"));
    conversation.transcript = transcript;
    let mut counters = ReflectionCounters::from(&config.reflection);

    let early = reflect(
        &mut store,
        &mut counters,
        &mut conversation,
        &ctx,
        ts("2023-02-13 14:04:00"),
    )
    .await
        .expect("early tick");
    assert!(early.closeout.is_empty());

    let due = reflect(&mut store, &mut counters, &mut conversation, &ctx, ts("2023-02-13 14:04:50"))
        .await
        .expect("due tick");
    assert_eq!(due.closeout.len(), 2);
    for id in &due.closeout {
        let thought = store.get(*id).expect("thought");
        assert_eq!(thought.kind, NodeKind::Thought);
        assert_eq!(thought.evidence.node_ids(), &[chat]);
        assert_eq!(thought.depth, 1);
    }

    let after = reflect(
        &mut store,
        &mut counters,
        &mut conversation,
        &ctx,
        ts("2023-02-13 14:05:00"),
    )
    .await
        .expect("later tick");
    assert!(after.closeout.is_empty());
    assert_eq!(store.count(NodeKind::Thought), 2);
}

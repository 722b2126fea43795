//! Several ticks of one agent: perception fills the budget, reflection
//! fires, a conversation closes out, and the whole directory survives a
//! save/load cycle.

use chrono::Duration;

use memstream_agent::{Agent, PerceivedEvent, PerceivedTile, TickInput};
use memstream_core::cognition::RuleBasedCognition;
use memstream_core::embedding::HashingEmbeddingProvider;
use memstream_core::memory::spatial::TileAddress;
use memstream_core::{MemstreamConfig, NodeKind, Timestamp, parse_timestamp};

fn ts(s: &str) -> Timestamp {
    parse_timestamp(s).expect("timestamp")
}

fn cafe_tile(object: &str, distance: f64, events: Vec<PerceivedEvent>) -> PerceivedTile {
    PerceivedTile {
        address: TileAddress {
            world: "the Ville".into(),
            sector: "Hobbs Cafe".into(),
            arena: "cafe".into(),
            game_object: object.into(),
        },
        events,
        distance,
    }
}

fn config() -> MemstreamConfig {
    MemstreamConfig::from_toml(
        r#"
[reflection]
importance_trigger_max = 10.0

[perception]
attention_bandwidth = 4
retention = 5
"#,
    )
    .expect("config")
}

#[tokio::test]
async fn perceive_reflect_and_persist_over_a_morning() {
    let config = config();
    let cognition = RuleBasedCognition::new();
    let embedder = HashingEmbeddingProvider::new(32);
    let mut agent = Agent::new("Isabella Rodriguez", &config);
    let start = ts("2023-02-13 08:00:00");

    let scenes = [
        vec![
            PerceivedEvent::new(
                "Klaus Mueller",
                "is",
                "the Ville:Hobbs Cafe:cafe:table",
                "writing his paper",
            ),
            PerceivedEvent::new(
                "Maria Lopez",
                "is",
                "the Ville:Hobbs Cafe:cafe:table",
                "studying for the party quiz",
            ),
        ],
        vec![
            PerceivedEvent::new(
                "Klaus Mueller",
                "is",
                "the Ville:Hobbs Cafe:cafe:counter",
                "ordering coffee for the party",
            ),
            PerceivedEvent::idle("the Ville:Hobbs Cafe:cafe:stove"),
        ],
        vec![PerceivedEvent::new(
            "Maria Lopez",
            "is",
            "the Ville:Hobbs Cafe:cafe:counter",
            "planning the party decorations",
        )],
    ];

    let mut perceived_total = 0;
    let mut triggered = false;
    for (i, events) in scenes.into_iter().enumerate() {
        let tiles = vec![cafe_tile("table", 1.0, events), cafe_tile("stove", 2.0, vec![])];
        let now = start + Duration::minutes(10 * i64::try_from(i).expect("small"));
        let report = agent
            .tick(
                &cognition,
                &embedder,
                &config,
                TickInput { tiles: &tiles, arena: Some("the Ville:Hobbs Cafe:cafe"), now },
            )
            .await
            .expect("tick");
        perceived_total += report.perceived.len();
        assert_eq!(report.associative.len(), report.perceived.len());
        triggered |= report.reflection.triggered;
    }

    assert_eq!(perceived_total, 5);
    assert!(triggered, "importance budget of 10 should be spent by five events");
    assert!(agent.store.count(NodeKind::Thought) > 0);
    assert_eq!(agent.spatial.accessible_objects("the Ville:Hobbs Cafe:cafe"), "table, stove");
    assert_eq!(agent.scratch.curr_time, Some(start + Duration::minutes(20)));

    let dir = tempfile::tempdir().expect("tempdir");
    agent.save(dir.path()).expect("save");
    let loaded = Agent::load(dir.path()).expect("load");
    assert_eq!(loaded, agent);
}

#[tokio::test]
async fn own_conversation_is_remembered_and_closed_out() {
    let config = MemstreamConfig::default();
    let cognition = RuleBasedCognition::new();
    let embedder = HashingEmbeddingProvider::new(32);
    let mut agent = Agent::new("Klaus Mueller", &config);

    agent.scratch.act_description = Some("conversing about the Valentine's party".into());
    agent.scratch.act_event = Some((
        "Klaus Mueller".into(),
        Some("chat with".into()),
        Some("Isabella Rodriguez".into()),
    ));
    agent.scratch.chatting_with = Some("Isabella Rodriguez".into());
    agent.scratch.chat = Some(vec![
        ("Isabella Rodriguez".into(), "Come to my party on the 14th!".into()),
        ("Klaus Mueller".into(), "I will, thanks.".into()),
    ]);
    agent.scratch.chatting_end_time = Some(ts("2023-02-13 14:10:00"));

    let tiles = vec![cafe_tile(
        "",
        0.0,
        vec![PerceivedEvent::new(
            "Klaus Mueller",
            "chat with",
            "Isabella Rodriguez",
            "conversing about the Valentine's party",
        )],
    )];

    let first = agent
        .tick(
            &cognition,
            &embedder,
            &config,
            TickInput {
                tiles: &tiles,
                arena: None,
                now: ts("2023-02-13 14:00:00"),
            },
        )
        .await
        .expect("first tick");
    assert_eq!(first.perceived.len(), 1);
    assert_eq!(agent.store.count(NodeKind::Chat), 1);
    assert!(first.reflection.closeout.is_empty());

    let last = agent
        .tick(
            &cognition,
            &embedder,
            &config,
            TickInput {
                tiles: &[],
                arena: None,
                now: ts("2023-02-13 14:09:50"),
            },
        )
        .await
        .expect("closing tick");
    assert_eq!(last.reflection.closeout.len(), 2);
    assert!(agent.scratch.chat_closed_out);

    let chat = agent.store.last_chat_with("Isabella Rodriguez").expect("chat").id;
    for id in &last.reflection.closeout {
        assert_eq!(agent.store.get(*id).expect("thought").evidence.node_ids(), &[chat]);
    }
}

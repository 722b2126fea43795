//! Prompt quality golden set.
//!
//! Each case renders one built-in template with realistic variables and
//! checks that the memory content made it in and no placeholder leaked.
//!
//! - **Offline:** `cargo test -p memstream-llm --test eval_golden`
//! - **Online (requires Ollama):** set `MEMSTREAM_EVAL_LLM=1` to also send
//!   each rendered prompt and check the reply parses.

use memstream_llm::prompt::{self, PromptEngine, PromptId, numbered};

/// A golden test case for prompt evaluation.
struct GoldenCase {
    name: &'static str,
    id: PromptId,
    vars: Vec<(&'static str, String)>,
    prompt_must_contain: Vec<&'static str>,
    prompt_must_not_contain: Vec<&'static str>,
}

fn persona_vars() -> Vec<(&'static str, String)> {
    vec![
        ("persona_name", "Klaus Mueller".to_string()),
        (
            "persona_summary",
            "a sociology student at Oak Hill College writing a paper on gentrification".to_string(),
        ),
    ]
}

fn with_persona(extra: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
    let mut vars = persona_vars();
    vars.extend(extra);
    vars
}

fn golden_cases() -> Vec<GoldenCase> {
    let statements = numbered(&[
        "Klaus Mueller is writing his research paper".to_string(),
        "Klaus Mueller is reading about gentrification".to_string(),
        "Maria Lopez is studying physics at the library".to_string(),
    ]);
    let transcript = "Isabella Rodriguez: I'm hosting a Valentine's party on the 14th.\n\
                      Klaus Mueller: I'd love to come, I'll bring Maria.\n"
        .to_string();

    vec![
        GoldenCase {
            name: "event_poignancy_mundane",
            id: PromptId::EventPoignancy,
            vars: with_persona(vec![("text", "Klaus Mueller is brushing his teeth".into())]),
            prompt_must_contain: vec![
                "brushing his teeth",
                "1 to 10",
                "\"poignancy\"",
                "Klaus Mueller",
            ],
            prompt_must_not_contain: vec!["{text}", "{persona_name}", "{{"],
        },
        GoldenCase {
            name: "chat_poignancy_party",
            id: PromptId::ChatPoignancy,
            vars: with_persona(vec![("text", "conversing about the Valentine's party".into())]),
            prompt_must_contain: vec!["Valentine's party", "conversation"],
            prompt_must_not_contain: vec!["{text}"],
        },
        GoldenCase {
            name: "focal_points_from_numbered_statements",
            id: PromptId::FocalPoints,
            vars: with_persona(vec![("statements", statements.clone()), ("count", "3".into())]),
            prompt_must_contain: vec![
                "0. Klaus Mueller is writing",
                "2. Maria Lopez",
                "3 most salient",
            ],
            prompt_must_not_contain: vec!["{statements}", "{count}"],
        },
        GoldenCase {
            name: "insights_cite_statement_numbers",
            id: PromptId::InsightAndEvidence,
            vars: with_persona(vec![("statements", statements), ("count", "5".into())]),
            prompt_must_contain: vec![
                "1. Klaus Mueller is reading",
                "\"because_of\"",
                "5 high-level insights",
            ],
            prompt_must_not_contain: vec!["{statements}"],
        },
        GoldenCase {
            name: "triple_for_reflection",
            id: PromptId::EventTriple,
            vars: with_persona(vec![("text", "Klaus Mueller is dedicated to his research".into())]),
            prompt_must_contain: vec!["dedicated to his research", "\"predicate\""],
            prompt_must_not_contain: vec!["{text}"],
        },
        GoldenCase {
            name: "planning_after_party_invite",
            id: PromptId::PlanningOnConvo,
            vars: with_persona(vec![("transcript", transcript.clone())]),
            prompt_must_contain: vec!["Valentine's party on the 14th", "planning", "\"thought\""],
            prompt_must_not_contain: vec!["{transcript}"],
        },
        GoldenCase {
            name: "memo_after_party_invite",
            id: PromptId::MemoOnConvo,
            vars: with_persona(vec![("transcript", transcript)]),
            prompt_must_contain: vec!["bring Maria", "interesting"],
            prompt_must_not_contain: vec!["{transcript}", "{persona_name}"],
        },
    ]
}

fn render(engine: &PromptEngine, case: &GoldenCase) -> String {
    let vars: Vec<(&str, &str)> = case.vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let (system, user) = engine.render(case.id, &vars).expect("render");
    format!("{system}\n\n{user}")
}

#[test]
fn golden_prompts_render_correctly() {
    let engine = PromptEngine::builtin();
    let mut failures = Vec::new();

    for case in golden_cases() {
        let rendered = render(&engine, &case);
        for needle in &case.prompt_must_contain {
            if !rendered.contains(needle) {
                failures.push(format!("[{}] missing {needle:?}", case.name));
            }
        }
        for needle in &case.prompt_must_not_contain {
            if rendered.contains(needle) {
                failures.push(format!("[{}] leaked {needle:?}", case.name));
            }
        }
    }

    assert!(failures.is_empty(), "golden failures:\n{}", failures.join("\n"));
}

#[test]
fn every_prompt_has_a_golden_case() {
    let covered: Vec<PromptId> = golden_cases().iter().map(|c| c.id).collect();
    for id in PromptId::all() {
        assert!(covered.contains(id), "no golden case for {id}");
    }
}

#[test]
fn system_preamble_names_the_persona() {
    let rendered = prompt::render_template(
        prompt::PERSONA_SYSTEM,
        &[("persona_name", "Isabella Rodriguez"), ("persona_summary", "runs Hobbs Cafe")],
    );
    assert!(rendered.contains("inner voice of Isabella Rodriguez"));
    assert!(rendered.contains("valid JSON"));
}

#[tokio::test]
async fn online_replies_parse() {
    use memstream_core::cognition::{Cognition, PersonaContext};
    use memstream_core::config::LlmConfig;
    use memstream_core::NodeKind;
    use memstream_llm::LlmCognition;

    if std::env::var("MEMSTREAM_EVAL_LLM").is_err() {
        return;
    }
    let cognition = LlmCognition::from_config(&LlmConfig::default()).expect("client");
    let persona = PersonaContext::new("Klaus Mueller", "a sociology student");
    let score = cognition
        .score_importance(NodeKind::Event, "Klaus Mueller is brushing his teeth", &persona)
        .await
        .expect("poignancy");
    assert!((1.0..=10.0).contains(&score));
}

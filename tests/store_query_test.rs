mod helpers;

use engram::error::EngineError;
use engram::memory::types::{AddRequest, QueryFilters, UpdateRequest};

#[test]
fn relevant_memory_ranks_first() {
    let engine = helpers::test_engine();
    let paris = helpers::add(&engine, "The capital of France is Paris.");
    helpers::add(&engine, "The weather in Tokyo is mild in spring.");
    helpers::add(&engine, "How to bake sourdough bread at home.");
    helpers::add(&engine, "I felt thrilled after the concert last night.");

    let results = engine
        .query("What is the capital of France?", 3, &QueryFilters::default())
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].id, paris.id);
    assert!(results.len() <= 3);
}

#[test]
fn retrieval_reinforces_salience_and_recency() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(&engine, "The deploy pipeline runs on merge to main.");
    let before = engine.get_memory(&outcome.id).unwrap().unwrap();

    engine
        .query("how does the deploy pipeline run", 5, &QueryFilters::default())
        .unwrap();

    let after = engine.get_memory(&outcome.id).unwrap().unwrap();
    assert!(after.salience > before.salience);
    assert!(after.last_seen_at >= before.last_seen_at);
}

#[test]
fn repeated_query_is_stable() {
    let engine = helpers::test_engine();
    helpers::add(&engine, "Rust uses ownership to manage memory.");
    helpers::add(&engine, "Python uses a garbage collector.");

    let first = engine
        .query("how does rust manage memory", 5, &QueryFilters::default())
        .unwrap();
    let second = engine
        .query("how does rust manage memory", 5, &QueryFilters::default())
        .unwrap();
    let ids = |rs: &[engram::memory::types::QueryResult]| {
        rs.iter().map(|r| r.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn query_input_is_validated() {
    let engine = helpers::test_engine();
    let err = engine.query("   ", 5, &QueryFilters::default()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    let err = engine.query("something", 0, &QueryFilters::default()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn add_rejects_empty_content() {
    let engine = helpers::test_engine();
    let err = engine
        .add(AddRequest { content: "   ".into(), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn update_rewrites_content_and_bumps_version() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(&engine, "The standup is at 9am.");

    engine
        .update(
            &outcome.id,
            UpdateRequest {
                content: Some("The standup moved to 10am.".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let mem = engine.get_memory(&outcome.id).unwrap().unwrap();
    assert_eq!(mem.content, "The standup moved to 10am.");
    assert_eq!(mem.version, 2);

    let results = engine
        .query("what time is the standup", 3, &QueryFilters::default())
        .unwrap();
    assert!(results.iter().any(|r| r.id == outcome.id));
    let hit = results.iter().find(|r| r.id == outcome.id).unwrap();
    assert!(hit.content.contains("10am"));
}

#[test]
fn results_list_every_embedded_sector() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(
        &engine,
        "Yesterday I learned that a theorem is a proven fact; I felt happy about the insight",
    );
    assert!(outcome.sectors.len() > 1);

    let results = engine
        .query("theorem proven fact", 5, &QueryFilters::default())
        .unwrap();
    let hit = results.iter().find(|r| r.id == outcome.id).unwrap();
    assert_eq!(hit.sectors.len(), outcome.sectors.len());
    assert!(hit.sectors.contains(&hit.sector));
}

#[test]
fn content_update_leaves_last_seen_untouched() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(&engine, "The office wifi password rotates monthly.");
    let before = engine.get_memory(&outcome.id).unwrap().unwrap().last_seen_at;

    std::thread::sleep(std::time::Duration::from_millis(20));
    engine
        .update(
            &outcome.id,
            UpdateRequest {
                content: Some("The office wifi password rotates weekly.".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let after = engine.get_memory(&outcome.id).unwrap().unwrap();
    assert_eq!(after.last_seen_at, before);
    assert!(after.updated_at > before);
}

#[test]
fn tags_only_update_keeps_version() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(&engine, "Release notes go in the changelog.");

    engine
        .update(
            &outcome.id,
            UpdateRequest { tags: Some(vec!["process".into()]), ..Default::default() },
        )
        .unwrap();

    let mem = engine.get_memory(&outcome.id).unwrap().unwrap();
    assert_eq!(mem.version, 1);
    assert_eq!(mem.tags, vec!["process".to_string()]);
}

#[test]
fn update_missing_memory_is_not_found() {
    let engine = helpers::test_engine();
    let err = engine
        .update("no-such-id", UpdateRequest::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn reinforce_caps_at_one() {
    let engine = helpers::test_engine();
    let outcome = helpers::add(&engine, "An important architectural decision.");

    let mut salience = 0.0;
    for _ in 0..30 {
        salience = engine.reinforce(&outcome.id, 0.2).unwrap();
    }
    assert!((salience - 1.0).abs() < f64::EPSILON);

    let err = engine.reinforce(&outcome.id, 1.5).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

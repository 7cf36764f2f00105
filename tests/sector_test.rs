mod helpers;

use engram::memory::sectors::Sector;
use engram::memory::types::{AddRequest, QueryFilters};

#[test]
fn cue_patterns_route_content_to_sectors() {
    let engine = helpers::test_engine();

    let how = helpers::add(&engine, "How to configure the deploy pipeline step by step");
    assert_eq!(how.primary_sector, Sector::Procedural);

    let felt = helpers::add(&engine, "I felt thrilled and excited after the launch");
    assert_eq!(felt.primary_sector, Sector::Emotional);

    let when = helpers::add(&engine, "Yesterday we met the new client at their office");
    assert_eq!(when.primary_sector, Sector::Episodic);
}

#[test]
fn travel_memory_with_feelings_spans_sectors() {
    let c = engram::memory::sectors::classify(
        "I went to Paris yesterday and felt amazed",
        &serde_json::json!({}),
    );
    assert!(matches!(c.primary, Sector::Episodic | Sector::Emotional));
    assert!(c.confidence > 0.3);
    assert!(!c.additional.is_empty());
}

#[test]
fn metadata_sector_override_wins() {
    let engine = helpers::test_engine();
    let outcome = engine
        .add(AddRequest {
            content: "How to think about the tradeoffs we keep making".into(),
            metadata: serde_json::json!({ "sector": "reflective" }),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(outcome.primary_sector, Sector::Reflective);
}

#[test]
fn sector_filter_scopes_results() {
    let engine = helpers::test_engine();
    let recipe = helpers::add(&engine, "How to bake bread: mix flour and water first");
    helpers::add(&engine, "Bread is a staple food made from flour");

    let filters = QueryFilters {
        sectors: vec!["procedural".into()],
        ..Default::default()
    };
    let results = engine.query("bread flour", 10, &filters).unwrap();
    assert!(!results.is_empty());
    for r in &results {
        assert_eq!(r.sector, Sector::Procedural);
    }
    assert!(results.iter().any(|r| r.id == recipe.id));
}

#[test]
fn unknown_sector_filter_yields_nothing() {
    let engine = helpers::test_engine();
    helpers::add(&engine, "Anything at all");
    let filters = QueryFilters {
        sectors: vec!["imaginary".into()],
        ..Default::default()
    };
    let results = engine.query("anything", 5, &filters).unwrap();
    assert!(results.is_empty());
}

#[test]
fn min_salience_filter_drops_faded_memories() {
    let engine = helpers::test_engine();
    helpers::add(&engine, "A freshly stored fact about release trains");

    let filters = QueryFilters {
        min_salience: Some(0.99),
        ..Default::default()
    };
    // initial salience starts around 0.4, so a 0.99 floor excludes it
    let results = engine.query("release trains", 5, &filters).unwrap();
    assert!(results.is_empty());

    let open = QueryFilters {
        min_salience: Some(0.1),
        ..Default::default()
    };
    let results = engine.query("release trains", 5, &open).unwrap();
    assert!(!results.is_empty());
}

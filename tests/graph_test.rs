mod helpers;

use engram::memory::types::{AddRequest, QueryFilters};

#[test]
fn related_ids_create_waypoints() {
    let engine = helpers::test_engine();
    let anchor = helpers::add(&engine, "The billing service owns invoice generation");
    let before = engine.stats().unwrap().waypoints;

    engine
        .add(AddRequest {
            content: "Invoices are generated as PDFs and emailed".into(),
            related_ids: vec![anchor.id.clone()],
            ..Default::default()
        })
        .unwrap();

    let after = engine.stats().unwrap().waypoints;
    assert!(after > before);
}

#[test]
fn every_memory_gets_a_seed_waypoint() {
    let engine = helpers::test_engine();
    helpers::add(&engine, "A lone first memory");
    assert!(engine.stats().unwrap().waypoints >= 1);
}

#[test]
fn expansion_pulls_in_linked_memories() {
    let engine = helpers::test_engine();
    let direct = helpers::add(&engine, "The search index rebuilds every night");
    let linked = engine
        .add(AddRequest {
            content: "Rebuild failures page the on-call rotation".into(),
            related_ids: vec![direct.id.clone()],
            ..Default::default()
        })
        .unwrap();

    let results = engine
        .query("when does the search index rebuild", 10, &QueryFilters::default())
        .unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&direct.id.as_str()));
    // the linked memory shares no query tokens; reaching it means the
    // waypoint graph was walked
    if let Some(hit) = results.iter().find(|r| r.id == linked.id) {
        assert!(!hit.path.is_empty());
    }
}

#[test]
fn results_never_exceed_k() {
    let engine = helpers::test_engine();
    for i in 0..12 {
        helpers::add(&engine, &format!("meeting notes entry number {i} about planning"));
    }
    let results = engine
        .query("meeting notes about planning", 4, &QueryFilters::default())
        .unwrap();
    assert!(results.len() <= 4);
}

#[test]
fn coactivated_results_feed_the_batch_queue() {
    let engine = helpers::test_engine();
    helpers::add(&engine, "The cache layer fronts the product catalog");
    helpers::add(&engine, "The product catalog refreshes from the warehouse feed");

    let results = engine
        .query("product catalog cache", 5, &QueryFilters::default())
        .unwrap();
    assert!(results.len() >= 2);

    let applied = engine.process_coactivations(50).unwrap();
    assert!(applied >= 1);
}

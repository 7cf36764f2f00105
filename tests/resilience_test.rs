mod helpers;

use engram::config::EngramConfig;
use engram::embedding::create_provider;
use engram::error::EngineError;
use engram::memory::types::QueryFilters;
use engram::memory::MemoryEngine;
use rusqlite::params;

fn file_config(dir: &tempfile::TempDir) -> EngramConfig {
    let mut config = helpers::test_config(64);
    config.storage.db_path = dir
        .path()
        .join("memory.db")
        .to_string_lossy()
        .into_owned();
    config
}

#[test]
fn zero_query_budget_rejects_with_backpressure() {
    let mut config = helpers::test_config(64);
    config.runtime.max_active_queries = 0;
    let engine = helpers::engine_with_config(config);
    helpers::add(&engine, "anything");

    let err = engine
        .query("anything", 5, &QueryFilters::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::Backpressure { .. }));
    assert!(err.is_retryable());
}

#[test]
fn memories_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    let id = {
        let provider = create_provider(&config.embedding);
        let engine = MemoryEngine::new(config.clone(), provider).unwrap();
        helpers::add(&engine, "Persistent fact: the VPN cert rotates quarterly").id
    };

    let provider = create_provider(&config.embedding);
    let engine = MemoryEngine::new(config, provider).unwrap();
    let mem = engine.get_memory(&id).unwrap().unwrap();
    assert!(mem.content.contains("VPN cert"));

    let results = engine
        .query("when does the VPN cert rotate", 5, &QueryFilters::default())
        .unwrap();
    assert!(results.iter().any(|r| r.id == id));
}

#[test]
fn stale_rows_decay_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir);

    let id = {
        let provider = create_provider(&config.embedding);
        let engine = MemoryEngine::new(config.clone(), provider).unwrap();
        helpers::add(&engine, "An old observation nobody asks about anymore").id
    };

    // Age the row out-of-band, as a long downtime would.
    {
        let conn = rusqlite::Connection::open(dir.path().join("memory.db")).unwrap();
        let ninety_days_ms: i64 = 90 * 86_400_000;
        conn.execute(
            "UPDATE memories SET last_seen_at = last_seen_at - ?1 WHERE id = ?2",
            params![ninety_days_ms, id],
        )
        .unwrap();
    }

    let provider = create_provider(&config.embedding);
    let engine = MemoryEngine::new(config, provider).unwrap();
    let before = engine.get_memory(&id).unwrap().unwrap().salience;

    let report = engine.run_decay().unwrap();
    assert!(!report.skipped);
    assert!(report.processed >= 1);

    let after = engine.get_memory(&id).unwrap().unwrap().salience;
    assert!(after < before);
}

#[test]
fn decay_report_counts_are_consistent() {
    let engine = helpers::test_engine();
    for i in 0..5 {
        helpers::add(&engine, &format!("routine log line number {i}"));
    }
    let report = engine.run_decay().unwrap();
    assert!(!report.skipped);
    assert!(report.decayed <= report.processed);
}

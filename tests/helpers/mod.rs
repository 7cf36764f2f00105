#![allow(dead_code)]

use engram::config::EngramConfig;
use engram::db;
use engram::embedding::hashed::HashedProvider;
use engram::memory::types::{AddOutcome, AddRequest};
use engram::memory::MemoryEngine;

/// Config tuned for tests: small vectors, no sweep cooldown, full
/// segment sampling.
pub fn test_config(dims: usize) -> EngramConfig {
    let mut config = EngramConfig::default();
    config.embedding.dimensions = dims;
    config.decay.sweep_cooldown_secs = 0;
    config.decay.sample_ratio = 1.0;
    config
}

/// Engine over a fresh in-memory database.
pub fn test_engine() -> MemoryEngine {
    engine_with_config(test_config(64))
}

pub fn engine_with_config(config: EngramConfig) -> MemoryEngine {
    let conn = db::open_memory_database().unwrap();
    let dims = config.embedding.dimensions;
    MemoryEngine::with_connection(conn, config, Box::new(HashedProvider::new(dims)))
}

/// Store plain content with defaults for everything else.
pub fn add(engine: &MemoryEngine, content: &str) -> AddOutcome {
    engine
        .add(AddRequest {
            content: content.to_string(),
            ..Default::default()
        })
        .unwrap()
}

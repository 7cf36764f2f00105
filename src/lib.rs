//! engram: a hierarchical sector graph memory engine for AI agents.
//!
//! Memories are classified into five cognitive sectors, embedded per
//! sector, associated through a weighted waypoint graph, and retrieved by
//! a hybrid vector/lexical/graph pipeline. Salience decays over time and
//! is reinforced by retrieval, so the store behaves less like a database
//! and more like a memory.

pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;

pub use config::EngramConfig;
pub use error::{EngineError, Result};
pub use memory::MemoryEngine;

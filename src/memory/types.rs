//! Core record and request/response types for the memory engine.

use crate::memory::sectors::Sector;
use serde::{Deserialize, Serialize};

/// A stored memory row. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    pub id: String,
    pub owner: String,
    pub tenant: String,
    /// Write-once storage segment, assigned at insert.
    pub segment: u32,
    pub content: String,
    /// simhash64 of the canonical token set (stored as i64 in SQLite).
    pub fingerprint: u64,
    pub primary_sector: Sector,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub salience: f64,
    pub decay_lambda: f64,
    pub coactivations: i64,
    pub feedback_score: f64,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen_at: i64,
}

/// A directed association edge between two memories.
#[derive(Debug, Clone, Serialize)]
pub struct Waypoint {
    pub src: String,
    pub dst: String,
    pub weight: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input to [`MemoryEngine::add`](crate::memory::MemoryEngine::add).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub owner: Option<String>,
    pub tenant: Option<String>,
    /// Known-related memory ids; contextual waypoints are created to each.
    #[serde(default)]
    pub related_ids: Vec<String>,
}

/// Result of an add: either a fresh insert or a strike on an existing
/// near-duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub id: String,
    pub primary_sector: Sector,
    /// All sectors the memory was embedded into (primary first).
    pub sectors: Vec<Sector>,
    pub deduplicated: bool,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

/// Optional constraints on a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilters {
    /// Restrict to these sectors. Unknown names are ignored.
    #[serde(default)]
    pub sectors: Vec<String>,
    pub min_salience: Option<f64>,
    pub owner: Option<String>,
    pub tenant: Option<String>,
    /// Inclusive `created_at` bounds, epoch ms.
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        *self == QueryFilters::default()
    }
}

/// One ranked query hit.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub content: String,
    pub sector: Sector,
    /// Every sector the memory holds a stored vector in (includes `sector`).
    pub sectors: Vec<Sector>,
    pub salience: f64,
    /// Z-score normalized hybrid score; comparable within one result set.
    pub score: f64,
    pub tags: Vec<String>,
    /// Waypoint path from a seed hit, empty for direct hits.
    pub path: Vec<String>,
    pub last_seen_at: i64,
}

/// Counters from one decay sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecayReport {
    pub processed: usize,
    pub decayed: usize,
    pub compressed: usize,
    pub fingerprinted: usize,
    /// True when the sweep was skipped (cooldown or queries in flight).
    pub skipped: bool,
}

/// Row counts and aggregates for the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_memories: i64,
    pub by_sector: Vec<(String, i64)>,
    pub segments: i64,
    pub waypoints: i64,
    pub avg_salience: f64,
    pub db_size_bytes: Option<i64>,
}

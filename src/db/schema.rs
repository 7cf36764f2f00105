//! SQL DDL for all engram tables.
//!
//! Defines the `memories`, `memories_fts` (FTS5), `sector_vectors`,
//! `waypoints`, and `maintenance_log` tables. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for engram's core tables.
const SCHEMA_SQL: &str = r#"
-- Core memory storage
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL DEFAULT 'default',
    tenant TEXT NOT NULL DEFAULT 'default',
    segment INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL,
    fingerprint INTEGER NOT NULL,
    primary_sector TEXT NOT NULL CHECK(primary_sector IN ('episodic','semantic','procedural','emotional','reflective')),
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    salience REAL NOT NULL DEFAULT 0.4 CHECK(salience >= 0.0 AND salience <= 1.0),
    decay_lambda REAL NOT NULL DEFAULT 0.005,
    coactivations INTEGER NOT NULL DEFAULT 0,
    feedback_score REAL NOT NULL DEFAULT 0.0,
    version INTEGER NOT NULL DEFAULT 1,
    mean_dim INTEGER,
    mean_vec BLOB,
    compressed_vec BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_sector ON memories(primary_sector);
CREATE INDEX IF NOT EXISTS idx_memories_tenant ON memories(tenant);
CREATE INDEX IF NOT EXISTS idx_memories_segment ON memories(segment);
CREATE INDEX IF NOT EXISTS idx_memories_fingerprint ON memories(fingerprint);
CREATE INDEX IF NOT EXISTS idx_memories_salience ON memories(salience);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    id UNINDEXED,
    primary_sector UNINDEXED,
    content='memories',
    content_rowid='rowid'
);

-- Per-sector embedding storage. One memory may carry a vector in
-- several sectors; dims vary per row once decay compression runs.
CREATE TABLE IF NOT EXISTS sector_vectors (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    sector TEXT NOT NULL CHECK(sector IN ('episodic','semantic','procedural','emotional','reflective')),
    owner TEXT NOT NULL DEFAULT 'default',
    tenant TEXT NOT NULL DEFAULT 'default',
    dim INTEGER NOT NULL,
    vec BLOB NOT NULL,
    PRIMARY KEY (memory_id, sector)
);

CREATE INDEX IF NOT EXISTS idx_vectors_sector ON sector_vectors(sector, tenant);

-- Waypoint association graph, keyed by the (src, dst) pair.
CREATE TABLE IF NOT EXISTS waypoints (
    src TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    dst TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    owner TEXT NOT NULL DEFAULT 'default',
    weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (src, dst)
);

CREATE INDEX IF NOT EXISTS idx_waypoints_dst ON waypoints(dst);

-- Maintenance audit log
CREATE TABLE IF NOT EXISTS maintenance_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('add','update','reinforce','decay','compress','fingerprint','prune','consolidate')),
    memory_id TEXT,
    details TEXT,
    created_at INTEGER NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

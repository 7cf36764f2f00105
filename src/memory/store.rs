//! Write paths: add, update, reinforce.
//!
//! Every mutation is transactional. Embeddings are produced before the
//! transaction opens so a provider failure stages nothing; the insert
//! then lands the memory row, its FTS entry, its sector vectors, the
//! mean vector, and its waypoint links together.

use crate::error::{EngineError, Result};
use crate::memory::types::{AddOutcome, AddRequest, Memory, UpdateRequest};
use crate::memory::{dedup, graph, now_ms, sectors, vectors, MemoryEngine};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

/// Salience bump applied when an add strikes an existing near-duplicate.
const DEDUP_BOOST: f64 = 0.15;
/// Softmax sharpness when pooling sector vectors into the mean vector.
const MEAN_VEC_BETA: f64 = 2.0;

impl MemoryEngine {
    /// Store a new memory, or strike an existing near-duplicate.
    pub fn add(&self, req: AddRequest) -> Result<AddOutcome> {
        let content = req.content.trim();
        if content.is_empty() {
            return Err(EngineError::InvalidInput("content must not be empty".into()));
        }
        let owner = req.owner.as_deref().unwrap_or(self.default_owner()).to_string();
        let tenant = req.tenant.as_deref().unwrap_or(self.default_tenant()).to_string();

        let metadata = if req.metadata.is_null() {
            serde_json::json!({})
        } else {
            req.metadata.clone()
        };
        let classification = sectors::classify(content, &metadata);
        let fingerprint = dedup::simhash64(content);

        // Dedup gate: identical fingerprint in the same tenant.
        if let Some(existing) = self.find_by_fingerprint(fingerprint, &tenant)? {
            if dedup::is_near_duplicate(fingerprint, existing.fingerprint) {
                let now = now_ms();
                let boosted = (existing.salience + DEDUP_BOOST).min(1.0);
                self.conn().execute(
                    "UPDATE memories SET salience = ?1, last_seen_at = ?2, updated_at = ?2 WHERE id = ?3",
                    params![boosted, now, existing.id],
                )?;
                self.invalidate_caches();
                debug!(id = %existing.id, "near-duplicate add, reinforced existing");
                return Ok(AddOutcome {
                    id: existing.id,
                    primary_sector: existing.primary_sector,
                    sectors: vec![existing.primary_sector],
                    deduplicated: true,
                });
            }
        }

        let mut all_sectors = vec![classification.primary];
        all_sectors.extend(classification.additional.iter().copied());

        // Embed before the transaction: a provider failure stages nothing.
        let embeddings = self
            .provider
            .embed_sectors(content, &all_sectors)
            .map_err(EngineError::Provider)?;

        let id = Uuid::now_v7().to_string();
        let now = now_ms();
        let dim = self.provider.dimensions();
        let initial_salience =
            (0.4 + 0.1 * classification.additional.len() as f64).clamp(0.0, 1.0);
        let tags_json = serde_json::to_string(&req.tags)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let segment_capacity = self.config.storage.segment_capacity;
        let link_threshold = self.config.graph.link_threshold;
        let same_sector_weight = self.config.graph.same_sector_weight;

        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;

            let segment = next_segment(&tx, &tenant, segment_capacity)?;
            tx.execute(
                "INSERT INTO memories (id, owner, tenant, segment, content, fingerprint, primary_sector,
                                       tags, metadata, salience, decay_lambda, created_at, updated_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?12)",
                params![
                    id,
                    owner,
                    tenant,
                    segment,
                    content,
                    fingerprint as i64,
                    classification.primary.as_str(),
                    tags_json,
                    metadata_json,
                    initial_salience,
                    classification.primary.decay_lambda(),
                    now,
                ],
            )?;

            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO memories_fts (rowid, content, id, primary_sector) VALUES (?1, ?2, ?3, ?4)",
                params![rowid, content, id, classification.primary.as_str()],
            )?;

            let mut weighted = Vec::with_capacity(embeddings.len());
            for (sector, embedding) in &embeddings {
                vectors::store_vector(&tx, &id, *sector, &owner, &tenant, embedding, dim)?;
                let weight = if *sector == classification.primary { 1.0 } else { 0.5 };
                weighted.push((weight, embedding.clone()));
            }

            let mean_vec = vectors::softmax_mean(&weighted, MEAN_VEC_BETA);
            tx.execute(
                "UPDATE memories SET mean_dim = ?1, mean_vec = ?2 WHERE id = ?3",
                params![mean_vec.len() as i64, vectors::embedding_to_bytes(&mean_vec), id],
            )?;

            graph::seed_waypoint(&tx, &id, &owner, &tenant, &mean_vec, link_threshold, now)?;
            if let Some((_, primary_embedding)) =
                embeddings.iter().find(|(s, _)| *s == classification.primary)
            {
                graph::link_same_sector(
                    &tx,
                    &id,
                    &owner,
                    &tenant,
                    classification.primary,
                    primary_embedding,
                    link_threshold,
                    same_sector_weight,
                    now,
                )?;
            }
            graph::create_contextual_waypoints(&tx, &id, &owner, &req.related_ids, now)?;

            log_maintenance(
                &tx,
                "add",
                Some(&id),
                &serde_json::json!({
                    "sector": classification.primary.as_str(),
                    "confidence": classification.confidence,
                    "segment": segment,
                }),
                now,
            )?;
            tx.commit()?;
        }

        self.invalidate_caches();
        info!(id = %id, sector = %classification.primary, "memory added");
        Ok(AddOutcome {
            id,
            primary_sector: classification.primary,
            sectors: all_sectors,
            deduplicated: false,
        })
    }

    /// Apply a partial update. A content change re-fingerprints, re-embeds,
    /// re-links, and bumps the version.
    pub fn update(&self, id: &str, req: UpdateRequest) -> Result<()> {
        self.require_memory(id)?;
        let existing = self
            .get_memory(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let new_content = match &req.content {
            Some(c) => {
                let trimmed = c.trim();
                if trimmed.is_empty() {
                    return Err(EngineError::InvalidInput("content must not be empty".into()));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };
        let metadata = req.metadata.unwrap_or_else(|| existing.metadata.clone());
        let tags = req.tags.unwrap_or_else(|| existing.tags.clone());
        let now = now_ms();

        let content_changed = new_content
            .as_deref()
            .is_some_and(|c| c != existing.content);

        if !content_changed {
            self.conn().execute(
                "UPDATE memories SET tags = ?1, metadata = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    serde_json::to_string(&tags)?,
                    serde_json::to_string(&metadata)?,
                    now,
                    id
                ],
            )?;
            self.invalidate_caches();
            return Ok(());
        }

        let content = new_content.unwrap_or_else(|| existing.content.clone());
        let classification = sectors::classify(&content, &metadata);
        let fingerprint = dedup::simhash64(&content);
        let mut all_sectors = vec![classification.primary];
        all_sectors.extend(classification.additional.iter().copied());

        let embeddings = self
            .provider
            .embed_sectors(&content, &all_sectors)
            .map_err(EngineError::Provider)?;
        let dim = self.provider.dimensions();
        let link_threshold = self.config.graph.link_threshold;
        let same_sector_weight = self.config.graph.same_sector_weight;

        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE memories SET content = ?1, fingerprint = ?2, primary_sector = ?3,
                        tags = ?4, metadata = ?5, decay_lambda = ?6,
                        version = version + 1, updated_at = ?7
                 WHERE id = ?8",
                params![
                    content,
                    fingerprint as i64,
                    classification.primary.as_str(),
                    serde_json::to_string(&tags)?,
                    serde_json::to_string(&metadata)?,
                    classification.primary.decay_lambda(),
                    now,
                    id
                ],
            )?;
            refresh_fts(&tx, id, &existing.content, &content)?;

            vectors::delete_vectors(&tx, id)?;
            let mut weighted = Vec::with_capacity(embeddings.len());
            for (sector, embedding) in &embeddings {
                vectors::store_vector(&tx, id, *sector, &existing.owner, &existing.tenant, embedding, dim)?;
                let weight = if *sector == classification.primary { 1.0 } else { 0.5 };
                weighted.push((weight, embedding.clone()));
            }
            let mean_vec = vectors::softmax_mean(&weighted, MEAN_VEC_BETA);
            tx.execute(
                "UPDATE memories SET mean_dim = ?1, mean_vec = ?2, compressed_vec = NULL WHERE id = ?3",
                params![mean_vec.len() as i64, vectors::embedding_to_bytes(&mean_vec), id],
            )?;

            graph::seed_waypoint(&tx, id, &existing.owner, &existing.tenant, &mean_vec, link_threshold, now)?;
            if let Some((_, primary_embedding)) =
                embeddings.iter().find(|(s, _)| *s == classification.primary)
            {
                graph::link_same_sector(
                    &tx,
                    id,
                    &existing.owner,
                    &existing.tenant,
                    classification.primary,
                    primary_embedding,
                    link_threshold,
                    same_sector_weight,
                    now,
                )?;
            }

            log_maintenance(
                &tx,
                "update",
                Some(id),
                &serde_json::json!({ "version": existing.version + 1 }),
                now,
            )?;
            tx.commit()?;
        }

        self.invalidate_caches();
        debug!(id, "memory updated");
        Ok(())
    }

    /// Directly boost a memory's salience, capped at 1.0.
    pub fn reinforce(&self, id: &str, boost: f64) -> Result<f64> {
        if !boost.is_finite() || !(0.0..=1.0).contains(&boost) {
            return Err(EngineError::InvalidInput(format!(
                "boost must be in [0, 1], got {boost}"
            )));
        }
        let existing = self
            .get_memory(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let now = now_ms();
        let new_salience = (existing.salience + boost).min(1.0);
        {
            let conn = self.conn();
            conn.execute(
                "UPDATE memories SET salience = ?1, last_seen_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![new_salience, now, id],
            )?;
            log_maintenance(
                &conn,
                "reinforce",
                Some(id),
                &serde_json::json!({ "boost": boost, "salience": new_salience }),
                now,
            )?;
            if new_salience > 0.8 && existing.salience <= 0.8 {
                log_maintenance(
                    &conn,
                    "consolidate",
                    Some(id),
                    &serde_json::json!({ "salience": new_salience }),
                    now,
                )?;
            }
        }
        self.invalidate_caches();
        Ok(new_salience)
    }

    /// Fetch one memory row by id.
    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn();
        fetch_memory(&conn, id)
    }

    fn find_by_fingerprint(&self, fingerprint: u64, tenant: &str) -> Result<Option<Memory>> {
        let conn = self.conn();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM memories WHERE fingerprint = ?1 AND tenant = ?2 ORDER BY id LIMIT 1",
                params![fingerprint as i64, tenant],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => fetch_memory(&conn, &id),
            None => Ok(None),
        }
    }
}

/// The segment new inserts land in: the current highest segment while it
/// has room, else the next one.
fn next_segment(conn: &Connection, tenant: &str, capacity: u32) -> Result<u32> {
    let row: Option<(u32, u32)> = conn
        .query_row(
            "SELECT segment, COUNT(*) FROM memories WHERE tenant = ?1
             GROUP BY segment ORDER BY segment DESC LIMIT 1",
            params![tenant],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(match row {
        Some((segment, count)) if count >= capacity.max(1) => segment + 1,
        Some((segment, _)) => segment,
        None => 0,
    })
}

/// Rewrite a memory's FTS entry after its content changes. The delete
/// command needs the old column values.
pub(crate) fn refresh_fts(
    conn: &Connection,
    id: &str,
    old_content: &str,
    new_content: &str,
) -> Result<()> {
    let (rowid, sector): (i64, String) = conn.query_row(
        "SELECT rowid, primary_sector FROM memories WHERE id = ?1",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    conn.execute(
        "INSERT INTO memories_fts (memories_fts, rowid, content, id, primary_sector)
         VALUES ('delete', ?1, ?2, ?3, ?4)",
        params![rowid, old_content, id, sector],
    )?;
    conn.execute(
        "INSERT INTO memories_fts (rowid, content, id, primary_sector) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, new_content, id, sector],
    )?;
    Ok(())
}

/// Append to the maintenance audit log.
pub(crate) fn log_maintenance(
    conn: &Connection,
    operation: &str,
    memory_id: Option<&str>,
    details: &serde_json::Value,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO maintenance_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details.to_string(), now],
    )?;
    Ok(())
}

pub(crate) fn fetch_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let row = conn
        .query_row(
            "SELECT id, owner, tenant, segment, content, fingerprint, primary_sector, tags,
                    metadata, salience, decay_lambda, coactivations, feedback_score, version,
                    created_at, updated_at, last_seen_at
             FROM memories WHERE id = ?1",
            params![id],
            map_memory_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn map_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let fingerprint: i64 = row.get(5)?;
    let sector: String = row.get(6)?;
    let tags: String = row.get(7)?;
    let metadata: String = row.get(8)?;
    Ok(Memory {
        id: row.get(0)?,
        owner: row.get(1)?,
        tenant: row.get(2)?,
        segment: row.get(3)?,
        content: row.get(4)?,
        fingerprint: fingerprint as u64,
        primary_sector: crate::memory::sectors::Sector::parse(&sector)
            .unwrap_or(crate::memory::sectors::Sector::Semantic),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        salience: row.get(9)?,
        decay_lambda: row.get(10)?,
        coactivations: row.get(11)?,
        feedback_score: row.get(12)?,
        version: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        last_seen_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngramConfig;
    use crate::embedding::hashed::HashedProvider;

    fn test_engine() -> MemoryEngine {
        let conn = crate::db::open_memory_database().unwrap();
        let mut config = EngramConfig::default();
        config.embedding.dimensions = 64;
        MemoryEngine::with_connection(conn, config, Box::new(HashedProvider::new(64)))
    }

    fn add_text(engine: &MemoryEngine, content: &str) -> AddOutcome {
        engine
            .add(AddRequest {
                content: content.into(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn add_rejects_empty_content() {
        let engine = test_engine();
        let err = engine
            .add(AddRequest {
                content: "   ".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn add_stores_row_fts_and_vectors() {
        let engine = test_engine();
        let outcome = add_text(&engine, "How to install and configure the build step by step");
        assert!(!outcome.deduplicated);

        let mem = engine.get_memory(&outcome.id).unwrap().unwrap();
        assert_eq!(mem.version, 1);
        assert!(mem.salience >= 0.4 && mem.salience <= 1.0);

        let conn = engine.conn();
        let fts_hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'configure'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(fts_hits, 1);

        let vec_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sector_vectors WHERE memory_id = ?1",
                params![outcome.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(vec_rows >= 1);
    }

    #[test]
    fn duplicate_add_returns_existing_id_with_boost() {
        let engine = test_engine();
        let first = add_text(&engine, "User prefers dark mode");
        let before = engine.get_memory(&first.id).unwrap().unwrap().salience;

        let second = add_text(&engine, "User prefers dark mode   \n");
        assert!(second.deduplicated);
        assert_eq!(second.id, first.id);

        let after = engine.get_memory(&first.id).unwrap().unwrap().salience;
        assert!((after - (before + 0.15)).abs() < 1e-9);

        let count: i64 = engine
            .conn()
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn dedup_boost_caps_at_one() {
        let engine = test_engine();
        let first = add_text(&engine, "A very memorable fact");
        for _ in 0..10 {
            add_text(&engine, "A very memorable fact");
        }
        let sal = engine.get_memory(&first.id).unwrap().unwrap().salience;
        assert!(sal <= 1.0);
    }

    #[test]
    fn update_content_bumps_version_and_reembeds() {
        let engine = test_engine();
        let outcome = add_text(&engine, "the capital of France is Paris");
        engine
            .update(
                &outcome.id,
                UpdateRequest {
                    content: Some("the capital of France is Paris, population over two million".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let mem = engine.get_memory(&outcome.id).unwrap().unwrap();
        assert_eq!(mem.version, 2);
        assert!(mem.content.contains("population"));

        // FTS follows the new content
        let hits: i64 = engine
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'population'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn update_tags_only_keeps_version() {
        let engine = test_engine();
        let outcome = add_text(&engine, "remember the milk");
        engine
            .update(
                &outcome.id,
                UpdateRequest {
                    tags: Some(vec!["errand".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        let mem = engine.get_memory(&outcome.id).unwrap().unwrap();
        assert_eq!(mem.version, 1);
        assert_eq!(mem.tags, vec!["errand"]);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let engine = test_engine();
        let err = engine.update("nope", UpdateRequest::default()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn reinforce_validates_and_caps() {
        let engine = test_engine();
        let outcome = add_text(&engine, "an important thing to keep");

        assert!(matches!(
            engine.reinforce(&outcome.id, 1.5).unwrap_err(),
            EngineError::InvalidInput(_)
        ));
        assert!(matches!(
            engine.reinforce("ghost", 0.1).unwrap_err(),
            EngineError::NotFound(_)
        ));

        let mut last = 0.0;
        for _ in 0..15 {
            last = engine.reinforce(&outcome.id, 0.1).unwrap();
        }
        assert!((last - 1.0).abs() < 1e-9);
    }

    #[test]
    fn segments_rotate_at_capacity() {
        let conn = crate::db::open_memory_database().unwrap();
        let mut config = EngramConfig::default();
        config.embedding.dimensions = 32;
        config.storage.segment_capacity = 2;
        let engine = MemoryEngine::with_connection(conn, config, Box::new(HashedProvider::new(32)));

        let contents = [
            "alpha fact one entirely distinct",
            "beta procedure compile deploy build",
            "gamma feeling happy excited wonderful",
            "delta reflection insight pattern lesson",
            "epsilon yesterday meeting event moment",
        ];
        for c in contents {
            add_text(&engine, c);
        }
        let max_segment: u32 = engine
            .conn()
            .query_row("SELECT MAX(segment) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert!(max_segment >= 2);
    }
}

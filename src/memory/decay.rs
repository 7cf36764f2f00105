//! Salience dynamics: decay, tiering, compression, regeneration.
//!
//! Memories cool down between retrievals. A periodic sweep samples each
//! storage segment, assigns every sampled memory a temperature tier from
//! its recency and activity, decays its salience, and once the decay
//! factor drops far enough, compresses its vector and reduces its text
//! toward an essence. The coldest memories fall back to a tiny hash
//! fingerprint that a later query hit can regenerate from.

use crate::error::Result;
use crate::memory::sectors::Sector;
use crate::memory::types::DecayReport;
use crate::memory::{graph, now_ms, store, text, vectors, MemoryEngine};
use rand::Rng;
use rusqlite::{params, Connection};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Fast-phase decay rate (per day) in the dual-phase retention curve.
const LAMBDA_FAST: f64 = 0.015;
/// Slow consolidation-phase decay rate.
const LAMBDA_SLOW: f64 = 0.002;
/// Weight of the slow phase.
const THETA: f64 = 0.4;
/// Learning rate for retrieval-trace reinforcement.
const ETA_TRACE: f64 = 0.18;
/// Contextual pull rate for associative propagation.
const GAMMA: f64 = 0.2;

/// Temperature tiers with their decay rates (per day).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn lambda(&self) -> f64 {
        match self {
            Tier::Hot => 0.005,
            Tier::Warm => 0.02,
            Tier::Cold => 0.05,
        }
    }
}

const DAY_MS: f64 = 86_400_000.0;

/// Recently seen plus active stays hot; either alone stays warm.
pub fn pick_tier(last_seen_at: i64, now: i64, coactivations: i64, salience: f64) -> Tier {
    let dt = (now - last_seen_at).max(0) as f64;
    let recent = dt < 6.0 * DAY_MS;
    let high = coactivations > 5 || salience > 0.7;
    if recent && high {
        Tier::Hot
    } else if recent || salience > 0.4 {
        Tier::Warm
    } else {
        Tier::Cold
    }
}

/// Dual-phase retention after `t_days`: a fast trace that fades in weeks
/// plus a slower consolidated component.
pub fn dual_phase_retention(t_days: f64) -> f64 {
    let fast = (-LAMBDA_FAST * t_days).exp();
    let slow = THETA * (-LAMBDA_SLOW * t_days).exp();
    (fast + slow).clamp(0.0, 1.0)
}

/// Sector-rate decay of a salience over `days`, with the rate eased for
/// memories sitting in older segments. Monotone in `days`.
pub fn sector_decay(sector: Sector, salience: f64, days: f64, segment: u32, max_segment: u32) -> f64 {
    let mut lambda = sector.decay_lambda();
    if max_segment > 0 {
        let ratio = (segment as f64 / max_segment as f64).sqrt();
        lambda *= 1.0 - ratio;
    }
    (salience * (-lambda * days.max(0.0)).exp()).clamp(0.0, 1.0)
}

/// Move salience toward 1 after a successful retrieval.
pub fn trace_reinforce(salience: f64) -> f64 {
    (salience + ETA_TRACE * (1.0 - salience)).min(1.0)
}

/// Salience a linked node reaches when reinforcement propagates to it:
/// a weighted share of the source plus a decayed pull toward the source.
pub fn propagated_salience(linked: f64, weight: f64, source: f64, days_since_seen: f64) -> f64 {
    let share = ETA_TRACE * weight.clamp(0.0, 1.0) * source;
    let pull = GAMMA * (source - linked) * (-0.02 * days_since_seen.max(0.0)).exp();
    (linked + share + pull).clamp(0.0, 1.0)
}

/// Row snapshot used by the sweep. Cached per segment with a short TTL.
#[derive(Debug, Clone)]
pub struct SweepRow {
    pub id: String,
    pub content: String,
    pub salience: f64,
    pub last_seen_at: i64,
    pub primary_sector: Sector,
    pub coactivations: i64,
}

fn fetch_segment_rows(conn: &Connection, segment: u32) -> Result<Vec<SweepRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, content, salience, last_seen_at, primary_sector, coactivations
         FROM memories WHERE segment = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![segment], |row| {
        let sector: String = row.get(4)?;
        Ok(SweepRow {
            id: row.get(0)?,
            content: row.get(1)?,
            salience: row.get(2)?,
            last_seen_at: row.get(3)?,
            primary_sector: Sector::parse(&sector).unwrap_or(Sector::Semantic),
            coactivations: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

impl MemoryEngine {
    /// Run one decay sweep over a sample of every segment.
    ///
    /// Advisory gates, not locks: the sweep is skipped while queries are
    /// in flight and inside the cooldown window. Per-row failures are
    /// logged and skipped, never fatal to the sweep.
    pub fn run_decay(&self) -> Result<DecayReport> {
        let active = self.active_queries.load(Ordering::SeqCst);
        if active > 0 {
            debug!(active, "decay skipped, queries in flight");
            return Ok(DecayReport { skipped: true, ..Default::default() });
        }
        let now = now_ms();
        let cooldown_ms = self.config.decay.sweep_cooldown_secs * 1000;
        let last = self.last_sweep_ms.load(Ordering::SeqCst);
        if now - last < cooldown_ms {
            debug!(remaining_ms = cooldown_ms - (now - last), "decay skipped, cooldown");
            return Ok(DecayReport { skipped: true, ..Default::default() });
        }
        self.last_sweep_ms.store(now, Ordering::SeqCst);

        let segments: Vec<u32> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT DISTINCT segment FROM memories ORDER BY segment")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut report = DecayReport::default();
        let sample_ratio = self.config.decay.sample_ratio.clamp(0.0, 1.0);
        let mut rng = rand::rng();

        for segment in segments {
            let rows = self.segment_rows(segment)?;
            if rows.is_empty() {
                continue;
            }
            let batch_len = ((rows.len() as f64 * sample_ratio) as usize).max(1);
            let start = rng.random_range(0..=(rows.len() - batch_len.min(rows.len())));
            for row in &rows[start..(start + batch_len).min(rows.len())] {
                report.processed += 1;
                if let Err(e) = self.decay_one(row, now, &mut report) {
                    warn!(id = %row.id, error = %e, "decay step failed");
                }
            }
        }

        {
            let conn = self.conn();
            store::log_maintenance(
                &conn,
                "decay",
                None,
                &serde_json::json!({
                    "processed": report.processed,
                    "decayed": report.decayed,
                    "compressed": report.compressed,
                    "fingerprinted": report.fingerprinted,
                }),
                now,
            )?;
        }
        self.invalidate_caches();
        info!(
            processed = report.processed,
            decayed = report.decayed,
            compressed = report.compressed,
            fingerprinted = report.fingerprinted,
            "decay sweep complete"
        );
        Ok(report)
    }

    fn segment_rows(&self, segment: u32) -> Result<Vec<SweepRow>> {
        if let Some(rows) = Self::lock_cache(&self.segment_cache).get(&segment) {
            return Ok(rows);
        }
        let rows = {
            let conn = self.conn();
            fetch_segment_rows(&conn, segment)?
        };
        Self::lock_cache(&self.segment_cache).put(segment, rows.clone());
        Ok(rows)
    }

    fn decay_one(&self, row: &SweepRow, now: i64, report: &mut DecayReport) -> Result<()> {
        let tier = pick_tier(row.last_seen_at, now, row.coactivations, row.salience);
        let dt_days = ((now - row.last_seen_at).max(0) as f64) / DAY_MS;
        let activity = (row.coactivations.max(0) as f64).ln_1p();
        let weighted = (row.salience * (1.0 + activity)).clamp(0.0, 1.0);
        let factor = (-tier.lambda() * dt_days / (weighted + 0.1)).exp();
        // Tier factor is the activity-weighted trace; the dual-phase curve
        // is the consolidation component. Both apply to salience, while
        // compression and fingerprinting key off the tier factor alone.
        let retention = dual_phase_retention(dt_days);
        let new_salience = (weighted * factor * retention).clamp(0.0, 1.0);
        let mut changed = (new_salience - row.salience).abs() > 0.001;

        let conn = self.conn();
        let mut content = row.content.clone();
        if factor < self.config.decay.compress_threshold {
            if self.compress_row(&conn, row, &mut content, factor, now)? {
                report.compressed += 1;
            }
            changed = true;
        }
        if factor < self.config.decay.cold_threshold.max(0.3) {
            self.fingerprint_row(&conn, row, &mut content, now)?;
            report.fingerprinted += 1;
            changed = true;
        }
        if changed {
            conn.execute(
                "UPDATE memories SET salience = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_salience, now, row.id],
            )?;
            report.decayed += 1;
        }
        Ok(())
    }

    /// Pool the primary vector down in proportion to the decay factor and
    /// reduce the content toward its essence. Returns true when the vector
    /// actually shrank.
    fn compress_row(
        &self,
        conn: &Connection,
        row: &SweepRow,
        content: &mut String,
        factor: f64,
        now: i64,
    ) -> Result<bool> {
        let Some((_, vec)) = vectors::primary_vector(conn, &row.id, row.primary_sector)? else {
            return Ok(false);
        };
        if vec.is_empty() {
            return Ok(false);
        }
        let min_dim = self.config.decay.min_vector_dim;
        let target = ((vec.len() as f64 * factor) as usize).clamp(min_dim, vec.len());
        let mut shrank = false;
        if target < vec.len() {
            let pooled = vectors::pool_vector(&vec, target);
            conn.execute(
                "UPDATE sector_vectors SET dim = ?1, vec = ?2 WHERE memory_id = ?3 AND sector = ?4",
                params![
                    pooled.len() as i64,
                    vectors::embedding_to_bytes(&pooled),
                    row.id,
                    row.primary_sector.as_str()
                ],
            )?;
            conn.execute(
                "UPDATE memories SET compressed_vec = ?1 WHERE id = ?2",
                params![vectors::embedding_to_bytes(&pooled), row.id],
            )?;
            shrank = true;
        }

        let essence = text::compress_summary(content, factor);
        if !essence.is_empty() && essence != *content {
            self.rewrite_content(conn, &row.id, content, &essence, now)?;
            *content = essence;
        }
        if shrank {
            store::log_maintenance(
                conn,
                "compress",
                Some(&row.id),
                &serde_json::json!({ "dim": target, "factor": factor }),
                now,
            )?;
        }
        Ok(shrank)
    }

    /// Drop the coldest memories to a 32-dim hash vector and a keyword
    /// summary. Still retrievable, and regenerable on a later hit.
    fn fingerprint_row(
        &self,
        conn: &Connection,
        row: &SweepRow,
        content: &mut String,
        now: i64,
    ) -> Result<()> {
        let base = format!("{}|{}", row.id, content);
        let fp_vec = vectors::hash_to_vec(&base, 32);
        conn.execute(
            "UPDATE sector_vectors SET dim = 32, vec = ?1 WHERE memory_id = ?2 AND sector = ?3",
            params![vectors::embedding_to_bytes(&fp_vec), row.id, row.primary_sector.as_str()],
        )?;

        let summary = text::keyword_summary(content);
        if !summary.is_empty() && summary != *content {
            self.rewrite_content(conn, &row.id, content, &summary, now)?;
            *content = summary;
        }
        store::log_maintenance(
            conn,
            "fingerprint",
            Some(&row.id),
            &serde_json::json!({ "dim": 32 }),
            now,
        )?;
        Ok(())
    }

    fn rewrite_content(
        &self,
        conn: &Connection,
        id: &str,
        old_content: &str,
        new_content: &str,
        now: i64,
    ) -> Result<()> {
        conn.execute(
            "UPDATE memories SET content = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
            params![new_content, now, id],
        )?;
        store::refresh_fts(conn, id, old_content, new_content)?;
        Ok(())
    }

    /// Opportunistic regeneration on a query hit: a memory whose stored
    /// primary vector has collapsed to fingerprint size is re-embedded
    /// from whatever text it still has.
    pub(crate) fn on_query_hit(&self, id: &str, sector: Sector) -> Result<()> {
        if !self.config.decay.regeneration_enabled {
            return Ok(());
        }
        let stored = {
            let conn = self.conn();
            vectors::primary_vector(&conn, id, sector)?
        };
        let Some((dim, _)) = stored else {
            return Ok(());
        };
        if dim > self.config.decay.min_vector_dim {
            return Ok(());
        }
        let Some(memory) = self.get_memory(id)? else {
            return Ok(());
        };
        let Ok(embedding) = self.provider.embed(&memory.content, sector) else {
            // Regeneration is best-effort; the fingerprint vector stays.
            return Ok(());
        };
        let conn = self.conn();
        vectors::store_vector(
            &conn,
            id,
            sector,
            &memory.owner,
            &memory.tenant,
            &embedding,
            self.provider.dimensions(),
        )?;
        debug!(id, "regenerated vector on query hit");
        Ok(())
    }

    /// Delete waypoints at or below the configured prune threshold.
    pub fn prune_waypoints(&self) -> Result<usize> {
        let threshold = self.config.graph.prune_threshold;
        let now = now_ms();
        let conn = self.conn();
        let removed = graph::prune_weak_waypoints(&conn, threshold)?;
        if removed > 0 {
            store::log_maintenance(
                &conn,
                "prune",
                None,
                &serde_json::json!({ "removed": removed, "threshold": threshold }),
                now,
            )?;
        }
        Ok(removed)
    }
}

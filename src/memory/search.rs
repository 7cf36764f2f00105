//! Hybrid query pipeline.
//!
//! A query is classified like content, embedded once per sector, and run
//! against each sector's vector store. Low-confidence result sets widen
//! through the waypoint graph and through the FTS index, then every
//! candidate is scored by a sigmoid blend of boosted similarity, token
//! overlap, waypoint weight, recency, tag match, and a keyword boost.
//! Scores are z-normalized within the candidate pool before the top k is
//! cut, and the returned memories are reinforced as a side effect.

use crate::error::{EngineError, Result};
use crate::memory::keyword::KeywordQuery;
use crate::memory::sectors::{self, Sector, ALL_SECTORS};
use crate::memory::types::{QueryFilters, QueryResult};
use crate::memory::vectors::SimilarityHit;
use crate::memory::{
    decay, graph, now_ms, store, text, vectors, ActiveQueryGuard, MemoryEngine,
};
use rusqlite::params;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Similarity sharpening rate: boosted = 1 - e^(-tau * sim).
const TAU: f64 = 3.0;
/// Recency half-life scale in days, and the hard horizon.
const RECENCY_T_DAYS: f64 = 7.0;
const RECENCY_MAX_DAYS: f64 = 60.0;
/// Z-score stabilizer.
const EPSILON: f64 = 1e-8;
/// Weight of the lexical keyword score inside the hybrid blend.
const KEYWORD_BOOST: f64 = 0.3;
/// Candidates below this keyword score get no boost at all.
const KEYWORD_FLOOR: f64 = 0.05;
/// Feedback EMA retention.
const FEEDBACK_DECAY: f64 = 0.9;

/// Hybrid blend weights (sum with keyword boost feeds a sigmoid).
const W_SIMILARITY: f64 = 0.35;
const W_OVERLAP: f64 = 0.20;
const W_WAYPOINT: f64 = 0.15;
const W_RECENCY: f64 = 0.10;
const W_TAG: f64 = 0.20;

const DAY_MS: f64 = 86_400_000.0;

/// Cross-sector resonance: how much a hit in one sector still matters for
/// a query anchored in another. Symmetric, diagonal 1.
const RESONANCE: [[f64; 5]; 5] = [
    [1.0, 0.7, 0.3, 0.6, 0.6],
    [0.7, 1.0, 0.4, 0.7, 0.8],
    [0.3, 0.4, 1.0, 0.5, 0.2],
    [0.6, 0.7, 0.5, 1.0, 0.8],
    [0.6, 0.8, 0.2, 0.8, 1.0],
];

fn sector_index(sector: Sector) -> usize {
    match sector {
        Sector::Episodic => 0,
        Sector::Semantic => 1,
        Sector::Procedural => 2,
        Sector::Emotional => 3,
        Sector::Reflective => 4,
    }
}

pub fn resonance(a: Sector, b: Sector) -> f64 {
    RESONANCE[sector_index(a)][sector_index(b)]
}

/// Penalty multiplier for results outside the query's sectors. Stronger
/// relationships lose less.
pub fn sector_relationship(query: Sector, memory: Sector) -> f64 {
    use Sector::*;
    match (query, memory) {
        (Semantic, Procedural) | (Procedural, Semantic) => 0.8,
        (Semantic, Episodic) | (Procedural, Episodic) => 0.6,
        (Semantic, Reflective) => 0.7,
        (Semantic, Emotional) => 0.4,
        (Procedural, Reflective) => 0.6,
        (Procedural, Emotional) => 0.3,
        (Episodic, Reflective) | (Reflective, Episodic) => 0.8,
        (Episodic, Semantic) | (Episodic, Procedural) => 0.6,
        (Episodic, Emotional) | (Emotional, Episodic) => 0.7,
        (Reflective, Semantic) => 0.7,
        (Reflective, Procedural) | (Reflective, Emotional) => 0.6,
        (Emotional, Reflective) => 0.6,
        (Emotional, Semantic) => 0.4,
        (Emotional, Procedural) => 0.3,
        _ => 0.3,
    }
}

/// Per-sector fusion weight, sharpened when the sector is the query's
/// primary. Temporal queries treat episodic as primary too.
fn context_weight(sector: Sector, primary: Sector, temporal: bool) -> f64 {
    let matches = sector == primary || (temporal && sector == Sector::Episodic);
    match sector {
        Sector::Semantic => if matches { 1.2 } else { 0.8 },
        Sector::Emotional => if matches { 1.5 } else { 0.6 },
        Sector::Procedural => if matches { 1.3 } else { 0.7 },
        Sector::Episodic => if matches { 1.4 } else { 0.7 },
        Sector::Reflective => if matches { 1.1 } else { 0.5 },
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn boosted_sim(sim: f64) -> f64 {
    1.0 - (-TAU * sim).exp()
}

/// Recency score: exponential freshness discounted toward zero at the
/// horizon. Can go negative past the horizon, which is intended.
pub fn recency_score(last_seen_at: i64, now: i64) -> f64 {
    let days = ((now - last_seen_at).max(0) as f64) / DAY_MS;
    (-days / RECENCY_T_DAYS).exp() * (1.0 - days / RECENCY_MAX_DAYS)
}

fn tag_match_score(tags: &[String], query_tokens: &std::collections::HashSet<String>) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let mut matches = 0.0;
    for tag in tags {
        let tag_lower = tag.to_lowercase();
        if query_tokens.contains(&tag_lower) {
            matches += 2.0;
        } else {
            for token in query_tokens {
                if tag_lower.contains(token.as_str()) || token.contains(&tag_lower) {
                    matches += 1.0;
                }
            }
        }
    }
    (matches / (tags.len() as f64 * 2.0).max(1.0)).min(1.0)
}

fn hybrid_score(
    adjusted_sim: f64,
    token_overlap: f64,
    waypoint_weight: f64,
    recency: f64,
    keyword_boost: f64,
    tag_match: f64,
) -> f64 {
    let raw = W_SIMILARITY * boosted_sim(adjusted_sim)
        + W_OVERLAP * token_overlap
        + W_WAYPOINT * waypoint_weight
        + W_RECENCY * recency
        + W_TAG * tag_match
        + keyword_boost;
    sigmoid(raw)
}

struct Candidate {
    result: QueryResult,
    feedback_score: f64,
}

impl MemoryEngine {
    /// Run the hybrid query pipeline and return the top `k` memories.
    pub fn query(&self, query_text: &str, k: usize, filters: &QueryFilters) -> Result<Vec<QueryResult>> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(EngineError::InvalidInput("query must not be empty".into()));
        }
        if k == 0 {
            return Err(EngineError::InvalidInput("k must be at least 1".into()));
        }

        let _guard = ActiveQueryGuard::enter(
            &self.active_queries,
            self.config.runtime.max_active_queries,
        )?;

        let cache_key = format!(
            "{query_text}:{k}:{}",
            serde_json::to_string(filters).unwrap_or_default()
        );
        if let Some(hit) = Self::lock_cache(&self.query_cache).get(&cache_key) {
            return Ok(hit);
        }

        // Sector selection: explicit filter (unknown names dropped) or all.
        let search_sectors: Vec<Sector> = if filters.sectors.is_empty() {
            ALL_SECTORS.to_vec()
        } else {
            let parsed: Vec<Sector> = filters
                .sectors
                .iter()
                .filter_map(|name| Sector::parse(name))
                .collect();
            if parsed.is_empty() {
                return Ok(Vec::new());
            }
            parsed
        };

        let classification = sectors::classify(query_text, &serde_json::json!({}));
        let temporal = sectors::has_temporal_marker(query_text);
        let query_tokens = text::canonical_token_set(query_text);
        let mut primary_sectors = vec![classification.primary];
        primary_sectors.extend(classification.additional.iter().copied());
        let tenant = filters
            .tenant
            .as_deref()
            .unwrap_or(self.default_tenant())
            .to_string();

        let query_embeddings = self
            .provider
            .embed_sectors(query_text, &search_sectors)
            .map_err(EngineError::Provider)?;
        let embedding_by_sector: HashMap<Sector, &Vec<f32>> =
            query_embeddings.iter().map(|(s, v)| (*s, v)).collect();

        let overfetch = k * self.config.query.overfetch.max(1);
        let mut sector_hits: HashMap<Sector, Vec<SimilarityHit>> = HashMap::new();
        {
            let conn = self.conn();
            for (sector, embedding) in &query_embeddings {
                let hits = vectors::search_similar(&conn, *sector, &tenant, embedding, overfetch)?;
                sector_hits.insert(*sector, hits);
            }
        }

        // Confidence-adaptive widening: weak top similarities expand both
        // the cut size and the graph walk.
        let top_sims: Vec<f64> = sector_hits
            .values()
            .flat_map(|hits| hits.iter().take(8).map(|h| h.similarity))
            .collect();
        let avg_top = if top_sims.is_empty() {
            0.0
        } else {
            top_sims.iter().sum::<f64>() / top_sims.len() as f64
        };
        let eff_k = k + (0.3 * k as f64 * (1.0 - avg_top)).ceil() as usize;
        let high_confidence = avg_top >= self.config.query.high_confidence;

        let mut candidate_ids: BTreeSet<String> = BTreeSet::new();
        for hits in sector_hits.values() {
            for hit in hits {
                candidate_ids.insert(hit.memory_id.clone());
            }
        }

        let mut expanded_by_id: HashMap<String, graph::ExpandedNode> = HashMap::new();
        if !high_confidence {
            let seeds: Vec<String> = candidate_ids.iter().cloned().collect();
            let budget = (k * 2).min(self.config.graph.max_expansions);
            let conn = self.conn();
            for node in graph::expand_via_waypoints(&conn, &seeds, budget)? {
                candidate_ids.insert(node.id.clone());
                expanded_by_id.insert(node.id.clone(), node);
            }
        }

        if self.config.query.lexical_enabled {
            for id in self.fts_candidates(query_text, eff_k * 2)? {
                candidate_ids.insert(id);
            }
        }

        let keyword_query = KeywordQuery::new(query_text);
        let max_segment: u32 = {
            let conn = self.conn();
            conn.query_row("SELECT COALESCE(MAX(segment), 0) FROM memories", [], |r| r.get(0))?
        };
        let now = now_ms();

        let mut candidates: Vec<Candidate> = Vec::new();
        for id in &candidate_ids {
            let memory = {
                let conn = self.conn();
                store::fetch_memory(&conn, id)?
            };
            let Some(memory) = memory else { continue };

            if memory.tenant != tenant {
                continue;
            }
            // Explicit sector filters also bind candidates that arrived
            // through the FTS or waypoint paths.
            if !filters.sectors.is_empty() && !search_sectors.contains(&memory.primary_sector) {
                continue;
            }
            if let Some(min) = filters.min_salience {
                if memory.salience < min {
                    continue;
                }
            }
            if let Some(owner) = &filters.owner {
                if &memory.owner != owner {
                    continue;
                }
            }
            if let Some(after) = filters.created_after {
                if memory.created_at < after {
                    continue;
                }
            }
            if let Some(before) = filters.created_before {
                if memory.created_at > before {
                    continue;
                }
            }

            let fusion = self.multi_vector_fusion(
                id,
                &embedding_by_sector,
                classification.primary,
                temporal,
            )?;
            let resonant = resonance(memory.primary_sector, classification.primary) * fusion;

            // Best raw per-sector similarity can outrank the fused score.
            let mut best_sim = resonant;
            for hits in sector_hits.values() {
                if let Some(hit) = hits.iter().find(|h| &h.memory_id == id) {
                    if hit.similarity > best_sim {
                        best_sim = hit.similarity;
                    }
                }
            }

            let penalty = if memory.primary_sector != classification.primary
                && !primary_sectors.contains(&memory.primary_sector)
            {
                sector_relationship(classification.primary, memory.primary_sector)
            } else {
                1.0
            };
            let adjusted_sim = best_sim * penalty;

            let waypoint_weight = expanded_by_id
                .get(id)
                .map(|n| n.weight.clamp(0.0, 1.0))
                .unwrap_or(0.0);
            let days_since = ((now - memory.last_seen_at).max(0) as f64) / DAY_MS;
            let salience = decay::sector_decay(
                memory.primary_sector,
                memory.salience,
                days_since,
                memory.segment,
                max_segment,
            );
            let memory_tokens = text::canonical_token_set(&memory.content);
            let overlap = text::token_overlap(&query_tokens, &memory_tokens);
            let recency = recency_score(memory.last_seen_at, now);
            let tag_match = tag_match_score(&memory.tags, &query_tokens);
            let keyword_boost = if self.config.query.lexical_enabled {
                let score = keyword_query.score(&memory.content);
                if score > KEYWORD_FLOOR { score * KEYWORD_BOOST } else { 0.0 }
            } else {
                0.0
            };

            let score = hybrid_score(adjusted_sim, overlap, waypoint_weight, recency, keyword_boost, tag_match);
            let path = expanded_by_id
                .get(id)
                .map(|n| n.path.clone())
                .unwrap_or_else(|| vec![id.clone()]);

            candidates.push(Candidate {
                result: QueryResult {
                    id: id.clone(),
                    content: memory.content.clone(),
                    sector: memory.primary_sector,
                    sectors: Vec::new(),
                    salience,
                    score,
                    tags: memory.tags.clone(),
                    path,
                    last_seen_at: memory.last_seen_at,
                },
                feedback_score: memory.feedback_score,
            });
        }

        candidates.sort_by(|a, b| {
            b.result
                .score
                .partial_cmp(&a.result.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.result.id.cmp(&b.result.id))
        });
        candidates.truncate(eff_k);

        // Z-normalize within the surviving pool so scores are comparable
        // across queries of different absolute similarity.
        if !candidates.is_empty() {
            let scores: Vec<f64> = candidates.iter().map(|c| c.result.score).collect();
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            let variance =
                scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
            let std_dev = variance.sqrt();
            for c in &mut candidates {
                c.result.score = (c.result.score - mean) / (std_dev + EPSILON);
            }
            candidates.sort_by(|a, b| {
                b.result
                    .score
                    .partial_cmp(&a.result.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.result.id.cmp(&b.result.id))
            });
        }
        candidates.truncate(k);

        let mut results: Vec<QueryResult> = Vec::with_capacity(candidates.len());
        {
            let conn = self.conn();
            for c in &candidates {
                let mut result = c.result.clone();
                result.sectors = vectors::sectors_by_id(&conn, &result.id)?;
                results.push(result);
            }
        }

        self.apply_retrieval_side_effects(&mut results, &candidates, now)?;

        debug!(
            query = query_text,
            hits = results.len(),
            avg_top = avg_top,
            expanded = expanded_by_id.len(),
            "query complete"
        );
        Self::lock_cache(&self.query_cache).put(cache_key, results.clone());
        Ok(results)
    }

    /// Weighted-average similarity across every sector vector a memory
    /// holds, weighted by query-context sector weights.
    fn multi_vector_fusion(
        &self,
        memory_id: &str,
        query_embeddings: &HashMap<Sector, &Vec<f32>>,
        primary: Sector,
        temporal: bool,
    ) -> Result<f64> {
        let stored = {
            let conn = self.conn();
            vectors::vectors_by_id(&conn, memory_id)?
        };
        let mut sum = 0.0;
        let mut total = 0.0;
        for (sector, vec) in &stored {
            let Some(query_vec) = query_embeddings.get(sector) else {
                continue;
            };
            let sim = vectors::cosine_similarity(query_vec, vec);
            let weight = context_weight(*sector, primary, temporal);
            sum += sim * weight;
            total += weight;
        }
        Ok(if total > 0.0 { sum / total } else { 0.0 })
    }

    fn fts_candidates(&self, query_text: &str, limit: usize) -> Result<Vec<String>> {
        let match_expr = text::build_fts_query(query_text);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM memories_fts WHERE memories_fts MATCH ?1
             ORDER BY bm25(memories_fts) LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit as i64], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Everything a successful retrieval does to the store: feedback EMA,
    /// trace reinforcement, path reinforcement, associative propagation,
    /// co-activation queueing, and fingerprint regeneration.
    fn apply_retrieval_side_effects(
        &self,
        results: &mut [QueryResult],
        candidates: &[Candidate],
        now: i64,
    ) -> Result<()> {
        // Co-retrieved pairs strengthen later, off the query path.
        for i in 0..results.len() {
            for j in (i + 1)..results.len() {
                self.enqueue_coactivation(&results[i].id, &results[j].id);
            }
        }

        for (result, candidate) in results.iter_mut().zip(candidates) {
            let reinforced = decay::trace_reinforce(result.salience);
            let new_feedback =
                candidate.feedback_score * FEEDBACK_DECAY + result.score * (1.0 - FEEDBACK_DECAY);
            {
                let conn = self.conn();
                conn.execute(
                    "UPDATE memories SET salience = ?1, feedback_score = ?2, last_seen_at = ?3 WHERE id = ?4",
                    params![reinforced.clamp(0.0, 1.0), new_feedback, now, result.id],
                )?;

                if result.path.len() > 1 {
                    graph::reinforce_path(&conn, &result.path, self.config.graph.reinforce_boost, now)?;
                }

                // Spread a share of the reinforcement to linked neighbors.
                let neighbors: Vec<(String, f64)> = {
                    let mut stmt =
                        conn.prepare("SELECT dst, weight FROM waypoints WHERE src = ?1 AND dst != ?1")?;
                    let rows = stmt.query_map(params![result.id], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    rows.collect::<std::result::Result<_, _>>()?
                };
                for (neighbor, weight) in neighbors {
                    let linked: Option<(f64, i64)> = {
                        use rusqlite::OptionalExtension;
                        conn.query_row(
                            "SELECT salience, last_seen_at FROM memories WHERE id = ?1",
                            params![neighbor],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?
                    };
                    let Some((linked_salience, linked_seen)) = linked else {
                        continue;
                    };
                    let days = ((now - linked_seen).max(0) as f64) / DAY_MS;
                    let propagated =
                        decay::propagated_salience(linked_salience, weight, reinforced, days);
                    conn.execute(
                        "UPDATE memories SET salience = ?1 WHERE id = ?2",
                        params![propagated, neighbor],
                    )?;
                }
            }

            self.on_query_hit(&result.id, result.sector)?;
            result.salience = reinforced;
            Self::lock_cache(&self.salience_cache).put(result.id.clone(), reinforced);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resonance_diagonal_is_identity() {
        for s in ALL_SECTORS {
            assert!((resonance(s, s) - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn relationship_penalty_is_under_one() {
        for a in ALL_SECTORS {
            for b in ALL_SECTORS {
                if a != b {
                    let p = sector_relationship(a, b);
                    assert!(p > 0.0 && p < 1.0);
                }
            }
        }
    }

    #[test]
    fn boosted_similarity_saturates() {
        assert!(boosted_sim(0.0).abs() < f64::EPSILON);
        assert!(boosted_sim(1.0) > 0.9);
        assert!(boosted_sim(0.5) < boosted_sim(0.9));
    }

    #[test]
    fn recency_decays_and_crosses_zero_at_horizon() {
        let now = now_ms();
        let fresh = recency_score(now, now);
        assert!((fresh - 1.0).abs() < 1e-9);
        let week = recency_score(now - (7.0 * DAY_MS) as i64, now);
        assert!(week < fresh && week > 0.0);
        let ancient = recency_score(now - (90.0 * DAY_MS) as i64, now);
        assert!(ancient <= 0.0);
    }

    #[test]
    fn tag_match_rewards_exact_over_partial() {
        let tokens = text::canonical_token_set("deploy the billing service");
        let exact = tag_match_score(&["deploy".into()], &tokens);
        let partial = tag_match_score(&["deployment-notes".into()], &tokens);
        let none = tag_match_score(&["gardening".into()], &tokens);
        assert!(exact > partial);
        assert!(partial > none);
        assert!((none - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hybrid_score_is_a_probability() {
        let s = hybrid_score(0.9, 0.5, 0.3, 0.8, 0.1, 0.4);
        assert!(s > 0.0 && s < 1.0);
        let low = hybrid_score(0.0, 0.0, 0.0, -0.5, 0.0, 0.0);
        assert!(low < s);
    }

    #[test]
    fn context_weight_sharpens_primary_sector() {
        for s in ALL_SECTORS {
            assert!(context_weight(s, s, false) > context_weight(s, Sector::Semantic, false) || s == Sector::Semantic);
        }
        // temporal marker promotes episodic even off-primary
        assert!(
            context_weight(Sector::Episodic, Sector::Semantic, true)
                > context_weight(Sector::Episodic, Sector::Semantic, false)
        );
    }
}

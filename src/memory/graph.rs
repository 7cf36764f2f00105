//! Waypoint association graph.
//!
//! Edges are directed (src, dst) pairs with weights in [0, 1]. New
//! memories seed into the graph by mean-vector similarity, pick up
//! bidirectional same-sector links, and optionally link to caller-named
//! related memories. Retrieval traverses the graph breadth-first with
//! per-hop attenuation; traversed edges and co-retrieved pairs are
//! reinforced afterwards.

use crate::error::Result;
use crate::memory::sectors::Sector;
use crate::memory::types::Waypoint;
use crate::memory::vectors::{bytes_to_embedding, cosine_similarity};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

/// Per-hop weight attenuation during expansion.
const EXPANSION_ATTENUATION: f64 = 0.8;
/// Expansion stops following edges below this propagated weight.
const EXPANSION_FLOOR: f64 = 0.1;
/// Base and per-call increment for contextual links.
const CONTEXTUAL_BASE: f64 = 0.3;
const CONTEXTUAL_INCREMENT: f64 = 0.1;
/// Learning rate for co-activation weight updates.
const COACTIVATION_ETA: f64 = 0.1;

pub fn get_waypoint(conn: &Connection, src: &str, dst: &str) -> Result<Option<Waypoint>> {
    let row = conn
        .query_row(
            "SELECT src, dst, weight, created_at, updated_at
             FROM waypoints WHERE src = ?1 AND dst = ?2",
            params![src, dst],
            |row| {
                Ok(Waypoint {
                    src: row.get(0)?,
                    dst: row.get(1)?,
                    weight: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Insert or overwrite the edge (src, dst) with the given weight.
pub fn upsert_waypoint(
    conn: &Connection,
    src: &str,
    dst: &str,
    owner: &str,
    weight: f64,
    now: i64,
) -> Result<()> {
    let weight = weight.clamp(0.0, 1.0);
    conn.execute(
        "INSERT INTO waypoints (src, dst, owner, weight, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(src, dst) DO UPDATE SET weight = excluded.weight, updated_at = excluded.updated_at",
        params![src, dst, owner, weight, now],
    )?;
    Ok(())
}

/// Seed a new memory into the graph from its mean vector.
///
/// Scans other memories' mean vectors in the tenant; the best match at or
/// above `link_threshold` gets an edge weighted by its similarity.
/// With no qualifying neighbor the memory self-links at weight 1.0 so it
/// is always reachable.
pub fn seed_waypoint(
    conn: &Connection,
    memory_id: &str,
    owner: &str,
    tenant: &str,
    mean_vec: &[f32],
    link_threshold: f64,
    now: i64,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, mean_vec FROM memories
         WHERE tenant = ?1 AND id != ?2 AND mean_vec IS NOT NULL",
    )?;
    let rows = stmt.query_map(params![tenant, memory_id], |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((id, blob))
    })?;

    let mut best: Option<(String, f64)> = None;
    for row in rows {
        let (id, blob) = row?;
        let sim = cosine_similarity(mean_vec, &bytes_to_embedding(&blob));
        if sim >= link_threshold {
            match &best {
                Some((_, best_sim)) if sim <= *best_sim => {}
                _ => best = Some((id, sim)),
            }
        }
    }

    match best {
        Some((neighbor, sim)) => upsert_waypoint(conn, memory_id, &neighbor, owner, sim, now),
        None => upsert_waypoint(conn, memory_id, memory_id, owner, 1.0, now),
    }
}

/// Bidirectional fixed-weight links to same-sector memories whose primary
/// vector clears the similarity threshold.
pub fn link_same_sector(
    conn: &Connection,
    memory_id: &str,
    owner: &str,
    tenant: &str,
    sector: Sector,
    embedding: &[f32],
    link_threshold: f64,
    weight: f64,
    now: i64,
) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT memory_id, vec FROM sector_vectors
         WHERE sector = ?1 AND tenant = ?2 AND memory_id != ?3",
    )?;
    let rows = stmt.query_map(params![sector.as_str(), tenant, memory_id], |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((id, blob))
    })?;

    let mut linked = 0;
    for row in rows {
        let (other, blob) = row?;
        if cosine_similarity(embedding, &bytes_to_embedding(&blob)) >= link_threshold {
            upsert_waypoint(conn, memory_id, &other, owner, weight, now)?;
            upsert_waypoint(conn, &other, memory_id, owner, weight, now)?;
            linked += 1;
        }
    }
    Ok(linked)
}

/// Link a memory to caller-named related memories. Existing edges grow by
/// a fixed increment, new ones start at the contextual base weight.
/// Unknown related ids are skipped.
pub fn create_contextual_waypoints(
    conn: &Connection,
    memory_id: &str,
    owner: &str,
    related_ids: &[String],
    now: i64,
) -> Result<usize> {
    let mut created = 0;
    for related in related_ids {
        if related == memory_id {
            continue;
        }
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
            params![related],
            |row| row.get(0),
        )?;
        if !exists {
            continue;
        }
        let weight = match get_waypoint(conn, memory_id, related)? {
            Some(wp) => (wp.weight + CONTEXTUAL_INCREMENT).min(1.0),
            None => CONTEXTUAL_BASE,
        };
        upsert_waypoint(conn, memory_id, related, owner, weight, now)?;
        created += 1;
    }
    Ok(created)
}

/// One node reached during expansion, with its attenuated weight and the
/// path that reached it (seed first).
#[derive(Debug, Clone)]
pub struct ExpandedNode {
    pub id: String,
    pub weight: f64,
    pub path: Vec<String>,
}

/// Breadth-first expansion from seed ids along outgoing waypoints.
///
/// Seeds enter at weight 1.0. Each hop multiplies by the edge weight and
/// the attenuation factor; nodes below the floor are not taken. A global
/// visited set keeps results unique, and at most `max_expansions` new
/// nodes are discovered, so the result has at most
/// `seeds.len() + max_expansions` items.
pub fn expand_via_waypoints(
    conn: &Connection,
    seeds: &[String],
    max_expansions: usize,
) -> Result<Vec<ExpandedNode>> {
    let mut expanded = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<ExpandedNode> = Vec::new();

    for id in seeds {
        if !visited.insert(id.clone()) {
            continue;
        }
        let node = ExpandedNode {
            id: id.clone(),
            weight: 1.0,
            path: vec![id.clone()],
        };
        expanded.push(node.clone());
        queue.push(node);
    }

    let mut stmt = conn.prepare("SELECT dst, weight FROM waypoints WHERE src = ?1")?;
    let mut discovered = 0;
    let mut head = 0;
    while head < queue.len() && discovered < max_expansions {
        let current = queue[head].clone();
        head += 1;
        let neighbors: Vec<(String, f64)> = stmt
            .query_map(params![current.id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        for (dst, weight) in neighbors {
            if visited.contains(&dst) {
                continue;
            }
            let propagated = current.weight * weight.clamp(0.0, 1.0) * EXPANSION_ATTENUATION;
            if propagated < EXPANSION_FLOOR {
                continue;
            }
            let mut path = current.path.clone();
            path.push(dst.clone());
            let node = ExpandedNode {
                id: dst.clone(),
                weight: propagated,
                path,
            };
            visited.insert(dst);
            expanded.push(node.clone());
            queue.push(node);
            discovered += 1;
            if discovered >= max_expansions {
                break;
            }
        }
    }
    Ok(expanded)
}

/// Boost every existing edge along a traversed path. Missing edges are
/// left alone, never created.
pub fn reinforce_path(conn: &Connection, path: &[String], boost: f64, now: i64) -> Result<()> {
    for pair in path.windows(2) {
        let (src, dst) = (&pair[0], &pair[1]);
        if let Some(wp) = get_waypoint(conn, src, dst)? {
            let new_weight = (wp.weight + boost).min(1.0);
            conn.execute(
                "UPDATE waypoints SET weight = ?1, updated_at = ?2 WHERE src = ?3 AND dst = ?4",
                params![new_weight, now, src, dst],
            )?;
        }
    }
    Ok(())
}

/// Apply one co-activation observation to the (a, b) edge.
///
/// The weight moves toward 1 at a rate damped by how far apart the two
/// memories were last seen. Both memories' co-activation counters are
/// bumped. Pairs referencing deleted memories are ignored.
pub fn apply_coactivation(
    conn: &Connection,
    a: &str,
    b: &str,
    tau_hours: f64,
    now: i64,
) -> Result<bool> {
    let seen = |id: &str| -> Result<Option<(String, i64)>> {
        Ok(conn
            .query_row(
                "SELECT owner, last_seen_at FROM memories WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    };
    let (Some((owner, seen_a)), Some((_, seen_b))) = (seen(a)?, seen(b)?) else {
        return Ok(false);
    };

    let tau_ms = tau_hours * 3_600_000.0;
    let temporal = (-((seen_a - seen_b).abs() as f64) / tau_ms).exp();
    let current = get_waypoint(conn, a, b)?.map(|wp| wp.weight).unwrap_or(0.0);
    let new_weight = (current + COACTIVATION_ETA * (1.0 - current) * temporal).min(1.0);
    upsert_waypoint(conn, a, b, &owner, new_weight, now)?;

    conn.execute(
        "UPDATE memories SET coactivations = coactivations + 1 WHERE id IN (?1, ?2)",
        params![a, b],
    )?;
    Ok(true)
}

/// Delete every edge at or below the threshold. Returns rows removed.
pub fn prune_weak_waypoints(conn: &Connection, threshold: f64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM waypoints WHERE weight <= ?1",
        params![threshold],
    )?;
    Ok(n)
}

//! Per-sector vector storage and brute-force similarity search.
//!
//! Vectors live in the `sector_vectors` table keyed by (memory_id, sector).
//! Dimensions vary per row once decay compression runs, so search is a
//! linear cosine scan over the requested sector, tenant-scoped. Mismatched
//! dimensions at comparison time score against the shared prefix.

use crate::error::Result;
use crate::memory::sectors::Sector;
use rusqlite::{params, Connection};

/// Serialize an f32 embedding to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Deserialize a BLOB back to an f32 embedding. Trailing partial chunks
/// are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity over the shared prefix of two vectors. Zero-norm
/// inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..n {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += a[i] as f64 * a[i] as f64;
        norm_b += b[i] as f64 * b[i] as f64;
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Softmax-weighted mean of several sector vectors, then renormalized.
/// Sharper weights (beta) favor the dominant sector's direction.
pub fn softmax_mean(vectors: &[(f64, Vec<f32>)], beta: f64) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dim = vectors.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let max_w = vectors.iter().map(|(w, _)| *w).fold(f64::MIN, f64::max);
    let exps: Vec<f64> = vectors.iter().map(|(w, _)| (beta * (w - max_w)).exp()).collect();
    let sum: f64 = exps.iter().sum::<f64>() + 1e-8;

    let mut mean = vec![0.0f32; dim];
    for ((_, vec), exp) in vectors.iter().zip(&exps) {
        let weight = (exp / sum) as f32;
        for (i, v) in vec.iter().enumerate() {
            mean[i] += weight * v;
        }
    }
    l2_normalize(&mut mean);
    mean
}

/// Bucket-mean pooling down to `target_dim`, renormalized. Returns the
/// input unchanged when it is already at or under the target.
pub fn pool_vector(vec: &[f32], target_dim: usize) -> Vec<f32> {
    if target_dim == 0 || vec.len() <= target_dim {
        return vec.to_vec();
    }
    let mut pooled = vec![0.0f32; target_dim];
    let mut counts = vec![0u32; target_dim];
    for (i, v) in vec.iter().enumerate() {
        let bucket = i * target_dim / vec.len();
        pooled[bucket] += v;
        counts[bucket] += 1;
    }
    for (p, c) in pooled.iter_mut().zip(&counts) {
        if *c > 0 {
            *p /= *c as f32;
        }
    }
    l2_normalize(&mut pooled);
    pooled
}

/// Deterministic pseudo-vector from text, for fingerprinted (coldest)
/// memories. FNV seed, xorshift expansion, L2-normalized.
pub fn hash_to_vec(text: &str, dim: usize) -> Vec<f32> {
    let mut h: u32 = 2_166_136_261;
    for byte in text.bytes() {
        h ^= byte as u32;
        h = h.wrapping_mul(16_777_619);
    }
    let mut x = if h == 0 { 1 } else { h };
    let mut out = vec![0.0f32; dim.max(2)];
    for v in out.iter_mut() {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *v = (x as f32 / u32::MAX as f32) * 2.0 - 1.0;
    }
    l2_normalize(&mut out);
    out
}

/// Upsert a vector for (memory_id, sector). The embedding is coerced to
/// `dim` at write time: truncated when longer, zero-padded when shorter.
pub fn store_vector(
    conn: &Connection,
    memory_id: &str,
    sector: Sector,
    owner: &str,
    tenant: &str,
    embedding: &[f32],
    dim: usize,
) -> Result<()> {
    let mut coerced = embedding.to_vec();
    coerced.resize(dim, 0.0);
    conn.execute(
        "INSERT INTO sector_vectors (memory_id, sector, owner, tenant, dim, vec)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(memory_id, sector) DO UPDATE SET
             dim = excluded.dim, vec = excluded.vec,
             owner = excluded.owner, tenant = excluded.tenant",
        params![
            memory_id,
            sector.as_str(),
            owner,
            tenant,
            dim as i64,
            embedding_to_bytes(&coerced)
        ],
    )?;
    Ok(())
}

/// All stored vectors for one memory, as (sector, embedding) pairs.
pub fn vectors_by_id(conn: &Connection, memory_id: &str) -> Result<Vec<(Sector, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        "SELECT sector, vec FROM sector_vectors WHERE memory_id = ?1 ORDER BY sector",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| {
        let sector: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((sector, blob))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (sector, blob) = row?;
        if let Some(sector) = Sector::parse(&sector) {
            out.push((sector, bytes_to_embedding(&blob)));
        }
    }
    Ok(out)
}

/// The sectors a memory holds vectors in.
pub fn sectors_by_id(conn: &Connection, memory_id: &str) -> Result<Vec<Sector>> {
    let mut stmt = conn.prepare(
        "SELECT sector FROM sector_vectors WHERE memory_id = ?1 ORDER BY sector",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(sector) = Sector::parse(&row?) {
            out.push(sector);
        }
    }
    Ok(out)
}

/// One scored candidate from a similarity scan.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub memory_id: String,
    pub similarity: f64,
}

/// Top-k cosine scan over one sector within a tenant. Descending
/// similarity, ties broken by id ascending. Empty sector yields an
/// empty result.
pub fn search_similar(
    conn: &Connection,
    sector: Sector,
    tenant: &str,
    query: &[f32],
    k: usize,
) -> Result<Vec<SimilarityHit>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT memory_id, vec FROM sector_vectors WHERE sector = ?1 AND tenant = ?2",
    )?;
    let rows = stmt.query_map(params![sector.as_str(), tenant], |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((id, blob))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (memory_id, blob) = row?;
        let similarity = cosine_similarity(query, &bytes_to_embedding(&blob));
        hits.push(SimilarityHit { memory_id, similarity });
    }
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory_id.cmp(&b.memory_id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// The primary-sector vector and its stored dim for a memory, if any.
pub fn primary_vector(
    conn: &Connection,
    memory_id: &str,
    sector: Sector,
) -> Result<Option<(usize, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        "SELECT dim, vec FROM sector_vectors WHERE memory_id = ?1 AND sector = ?2",
    )?;
    let mut rows = stmt.query_map(params![memory_id, sector.as_str()], |row| {
        let dim: i64 = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((dim as usize, blob))
    })?;
    match rows.next() {
        Some(row) => {
            let (dim, blob) = row?;
            Ok(Some((dim, bytes_to_embedding(&blob))))
        }
        None => Ok(None),
    }
}

/// Remove every vector belonging to a memory. Returns rows removed.
pub fn delete_vectors(conn: &Connection, memory_id: &str) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM sector_vectors WHERE memory_id = ?1",
        params![memory_id],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn seed_memory(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO memories (id, content, fingerprint, primary_sector, created_at, updated_at, last_seen_at)
             VALUES (?1, 'x', 0, 'semantic', 0, 0, 0)",
            params![id],
        )
        .unwrap();
    }

    fn spike(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot % dim] = 1.0;
        v
    }

    #[test]
    fn bytes_roundtrip() {
        let vec = vec![0.1f32, -2.5, 3.75];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&vec)), vec);
    }

    #[test]
    fn cosine_handles_zero_and_identity() {
        let a = spike(8, 2);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &vec![0.0; 8]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn search_orders_by_similarity_then_id() {
        let conn = open_memory_database().unwrap();
        for id in ["m1", "m2", "m3"] {
            seed_memory(&conn, id);
        }
        // m1 and m2 identical to query, m3 orthogonal
        store_vector(&conn, "m2", Sector::Semantic, "o", "t", &spike(8, 0), 8).unwrap();
        store_vector(&conn, "m1", Sector::Semantic, "o", "t", &spike(8, 0), 8).unwrap();
        store_vector(&conn, "m3", Sector::Semantic, "o", "t", &spike(8, 4), 8).unwrap();

        let hits = search_similar(&conn, Sector::Semantic, "t", &spike(8, 0), 10).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].memory_id, "m1"); // tie with m2, id ascending
        assert_eq!(hits[1].memory_id, "m2");
        assert_eq!(hits[2].memory_id, "m3");
    }

    #[test]
    fn search_scopes_by_tenant_and_sector() {
        let conn = open_memory_database().unwrap();
        seed_memory(&conn, "m1");
        store_vector(&conn, "m1", Sector::Semantic, "o", "tenant-a", &spike(8, 0), 8).unwrap();

        assert!(search_similar(&conn, Sector::Semantic, "tenant-b", &spike(8, 0), 5)
            .unwrap()
            .is_empty());
        assert!(search_similar(&conn, Sector::Episodic, "tenant-a", &spike(8, 0), 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn store_coerces_dimension() {
        let conn = open_memory_database().unwrap();
        seed_memory(&conn, "m1");
        store_vector(&conn, "m1", Sector::Semantic, "o", "t", &[1.0, 2.0], 4).unwrap();
        let (dim, vec) = primary_vector(&conn, "m1", Sector::Semantic).unwrap().unwrap();
        assert_eq!(dim, 4);
        assert_eq!(vec, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn pooling_reduces_and_renormalizes() {
        let vec: Vec<f32> = (0..128).map(|i| (i as f32).sin()).collect();
        let pooled = pool_vector(&vec, 32);
        assert_eq!(pooled.len(), 32);
        let norm: f32 = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        // no-op when already small
        assert_eq!(pool_vector(&[1.0, 0.0], 32), vec![1.0, 0.0]);
    }

    #[test]
    fn softmax_mean_is_unit_length() {
        let mean = softmax_mean(
            &[(0.9, spike(8, 0)), (0.3, spike(8, 1))],
            2.0,
        );
        let norm: f32 = mean.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        // dominant sector direction wins
        assert!(mean[0] > mean[1]);
    }

    #[test]
    fn hash_vec_is_deterministic_and_normalized() {
        let a = hash_to_vec("some text", 32);
        let b = hash_to_vec("some text", 32);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn delete_removes_all_sectors() {
        let conn = open_memory_database().unwrap();
        seed_memory(&conn, "m1");
        store_vector(&conn, "m1", Sector::Semantic, "o", "t", &spike(8, 0), 8).unwrap();
        store_vector(&conn, "m1", Sector::Episodic, "o", "t", &spike(8, 1), 8).unwrap();
        assert_eq!(delete_vectors(&conn, "m1").unwrap(), 2);
        assert!(vectors_by_id(&conn, "m1").unwrap().is_empty());
    }
}

//! Store-wide statistics.

use crate::error::Result;
use crate::memory::types::StoreStats;
use crate::memory::MemoryEngine;

impl MemoryEngine {
    /// Row counts and salience aggregate for the whole store.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();

        let total_memories: i64 =
            conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;

        let by_sector: Vec<(String, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT primary_sector, COUNT(*) FROM memories GROUP BY primary_sector ORDER BY primary_sector",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let segments: i64 =
            conn.query_row("SELECT COUNT(DISTINCT segment) FROM memories", [], |r| r.get(0))?;
        let waypoints: i64 = conn.query_row("SELECT COUNT(*) FROM waypoints", [], |r| r.get(0))?;
        let avg_salience: f64 = conn.query_row(
            "SELECT COALESCE(AVG(salience), 0.0) FROM memories",
            [],
            |r| r.get(0),
        )?;

        let db_size_bytes: Option<i64> = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |r| r.get(0),
            )
            .ok();

        Ok(StoreStats {
            total_memories,
            by_sector,
            segments,
            waypoints,
            avg_salience,
            db_size_bytes,
        })
    }
}

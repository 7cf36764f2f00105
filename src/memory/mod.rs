//! The hierarchical sector graph memory engine.
//!
//! Memories are classified into five fixed sectors, embedded per sector,
//! linked through a waypoint graph, and ranked at query time by a hybrid
//! of vector similarity, lexical overlap, graph weight, recency, and tag
//! match. Salience decays between retrievals and is reinforced by them.
//!
//! [`MemoryEngine`] is the single entry point. Construction wires up the
//! SQLite store, the embedding provider, the TTL caches, and the bounded
//! co-activation channel; the operation surface lives in the sibling
//! modules (`store`, `search`, `decay`, `stats`).

pub mod cache;
pub mod decay;
pub mod dedup;
pub mod graph;
pub mod keyword;
pub mod search;
pub mod sectors;
pub mod stats;
pub mod store;
pub mod text;
pub mod types;
pub mod vectors;

use crate::config::EngramConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::memory::cache::TtlCache;
use crate::memory::types::QueryResult;
use rusqlite::Connection;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct MemoryEngine {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) provider: Box<dyn EmbeddingProvider>,
    pub(crate) config: EngramConfig,
    pub(crate) query_cache: Mutex<TtlCache<String, Vec<QueryResult>>>,
    pub(crate) salience_cache: Mutex<TtlCache<String, f64>>,
    pub(crate) segment_cache: Mutex<TtlCache<u32, Vec<decay::SweepRow>>>,
    coact_tx: SyncSender<(String, String)>,
    coact_rx: Mutex<Receiver<(String, String)>>,
    pub(crate) active_queries: AtomicUsize,
    pub(crate) last_sweep_ms: AtomicI64,
}

impl MemoryEngine {
    /// Open (or create) the configured database and build an engine on it.
    pub fn new(config: EngramConfig, provider: Box<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let conn = crate::db::open_database(config.resolved_db_path())?;
        Ok(Self::with_connection(conn, config, provider))
    }

    /// Build an engine over an already-open connection. The schema must be
    /// initialized.
    pub fn with_connection(
        conn: Connection,
        config: EngramConfig,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Self {
        let ttl = Duration::from_secs(config.query.cache_ttl_secs);
        let capacity = config.query.cache_capacity;
        let (coact_tx, coact_rx) = sync_channel(config.graph.coactivation_capacity);
        Self {
            conn: Mutex::new(conn),
            provider,
            config,
            query_cache: Mutex::new(TtlCache::new(ttl, capacity)),
            salience_cache: Mutex::new(TtlCache::new(ttl, capacity * 4)),
            segment_cache: Mutex::new(TtlCache::new(ttl, 16)),
            coact_tx,
            coact_rx: Mutex::new(coact_rx),
            active_queries: AtomicUsize::new(0),
            last_sweep_ms: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// Lock the connection. A poisoned lock is recovered rather than
    /// propagated; SQLite state stays consistent across a panicked holder.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_cache<K: Eq + std::hash::Hash + Clone, V: Clone>(
        cache: &Mutex<TtlCache<K, V>>,
    ) -> MutexGuard<'_, TtlCache<K, V>> {
        cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn default_owner(&self) -> &str {
        &self.config.storage.default_owner
    }

    pub(crate) fn default_tenant(&self) -> &str {
        &self.config.storage.default_tenant
    }

    /// Queue a co-activated pair for the background batch. The channel is
    /// bounded; a full buffer drops the pair rather than blocking a query.
    pub(crate) fn enqueue_coactivation(&self, a: &str, b: &str) {
        // Canonical order so (a, b) and (b, a) hit the same edge.
        let pair = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        match self.coact_tx.try_send(pair) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("co-activation buffer full, dropping pair");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("co-activation channel disconnected");
            }
        }
    }

    /// Drain up to `max` queued co-activation pairs and apply them to the
    /// waypoint graph. Returns the number applied.
    pub fn process_coactivations(&self, max: usize) -> Result<usize> {
        let pairs: Vec<(String, String)> = {
            let rx = self.coact_rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.try_iter().take(max).collect()
        };
        if pairs.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let conn = self.conn();
        let mut applied = 0;
        for (a, b) in &pairs {
            if graph::apply_coactivation(&conn, a, b, 1.0, now)? {
                applied += 1;
            }
        }
        debug!(applied, "co-activation batch applied");
        Ok(applied)
    }

    /// Salience of one memory, through the read cache.
    pub(crate) fn cached_salience(&self, id: &str) -> Result<Option<f64>> {
        if let Some(s) = Self::lock_cache(&self.salience_cache).get(&id.to_string()) {
            return Ok(Some(s));
        }
        let salience: Option<f64> = {
            let conn = self.conn();
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT salience FROM memories WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .optional()?
        };
        if let Some(s) = salience {
            Self::lock_cache(&self.salience_cache).put(id.to_string(), s);
        }
        Ok(salience)
    }

    pub(crate) fn invalidate_caches(&self) {
        Self::lock_cache(&self.query_cache).invalidate_all();
        Self::lock_cache(&self.salience_cache).invalidate_all();
        Self::lock_cache(&self.segment_cache).invalidate_all();
    }

    /// Guard that ensures a memory id exists (tenant-visible) before a
    /// mutation that requires it.
    pub(crate) fn require_memory(&self, id: &str) -> Result<()> {
        let exists: bool = self.conn().query_row(
            "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(EngineError::NotFound(id.to_string()))
        }
    }
}

/// Spawn the periodic co-activation drain. Runs until the engine is
/// dropped by every other holder.
pub fn spawn_coactivation_worker(engine: Arc<MemoryEngine>, interval: Duration) {
    let batch = engine.config.graph.coactivation_batch;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match engine.process_coactivations(batch) {
                Ok(0) => {}
                Ok(n) => info!(applied = n, "co-activation batch"),
                Err(e) => warn!(error = %e, "co-activation batch failed"),
            }
            if Arc::strong_count(&engine) == 1 {
                break;
            }
        }
    });
}

/// RAII counter for queries in flight; the decay sweep checks it.
#[derive(Debug)]
pub(crate) struct ActiveQueryGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveQueryGuard<'a> {
    pub(crate) fn enter(counter: &'a AtomicUsize, max: usize) -> Result<Self> {
        let active = counter.fetch_add(1, Ordering::SeqCst);
        if active >= max {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::Backpressure {
                active: active + 1,
                max,
            });
        }
        Ok(Self(counter))
    }
}

impl Drop for ActiveQueryGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashed::HashedProvider;

    fn test_engine() -> MemoryEngine {
        let conn = crate::db::open_memory_database().unwrap();
        let mut config = EngramConfig::default();
        config.embedding.dimensions = 64;
        MemoryEngine::with_connection(conn, config, Box::new(HashedProvider::new(64)))
    }

    #[test]
    fn active_query_guard_enforces_ceiling() {
        let counter = AtomicUsize::new(0);
        let g1 = ActiveQueryGuard::enter(&counter, 2).unwrap();
        let _g2 = ActiveQueryGuard::enter(&counter, 2).unwrap();
        let err = ActiveQueryGuard::enter(&counter, 2).unwrap_err();
        assert!(matches!(err, EngineError::Backpressure { active: 3, max: 2 }));
        drop(g1);
        assert!(ActiveQueryGuard::enter(&counter, 2).is_ok());
    }

    #[test]
    fn coactivation_pairs_are_canonically_ordered() {
        let engine = test_engine();
        engine.enqueue_coactivation("zed", "abc");
        let rx = engine.coact_rx.lock().unwrap();
        let pair = rx.try_recv().unwrap();
        assert_eq!(pair, ("abc".to_string(), "zed".to_string()));
    }

    #[test]
    fn require_memory_reports_not_found() {
        let engine = test_engine();
        let err = engine.require_memory("missing").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn process_coactivations_empty_buffer_is_zero() {
        let engine = test_engine();
        assert_eq!(engine.process_coactivations(50).unwrap(), 0);
    }
}

//! CLI command handlers. Thin adapters over [`MemoryEngine`]; results
//! print as pretty JSON on stdout so output stays scriptable.

use crate::memory::types::{AddRequest, QueryFilters, UpdateRequest};
use crate::memory::{spawn_coactivation_worker, MemoryEngine};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub fn add(
    engine: &MemoryEngine,
    content: String,
    tags: Vec<String>,
    metadata: Option<String>,
) -> Result<()> {
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).context("metadata must be a JSON object")?,
        None => serde_json::json!({}),
    };
    let outcome = engine.add(AddRequest {
        content,
        tags,
        metadata,
        ..Default::default()
    })?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub fn query(
    engine: &MemoryEngine,
    text: String,
    k: Option<usize>,
    sectors: Vec<String>,
    min_salience: Option<f64>,
) -> Result<()> {
    let k = k.unwrap_or(engine.config().query.default_k);
    let filters = QueryFilters {
        sectors,
        min_salience,
        ..Default::default()
    };
    let results = engine.query(&text, k, &filters)?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

pub fn reinforce(engine: &MemoryEngine, id: String, boost: f64) -> Result<()> {
    let salience = engine.reinforce(&id, boost)?;
    println!("{}", serde_json::json!({ "id": id, "salience": salience }));
    Ok(())
}

pub fn update(
    engine: &MemoryEngine,
    id: String,
    content: Option<String>,
    tags: Option<Vec<String>>,
) -> Result<()> {
    engine.update(
        &id,
        UpdateRequest {
            content,
            tags,
            metadata: None,
        },
    )?;
    println!("{}", serde_json::json!({ "id": id, "updated": true }));
    Ok(())
}

pub fn stats(engine: &MemoryEngine) -> Result<()> {
    let stats = engine.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn decay(engine: &MemoryEngine) -> Result<()> {
    let report = engine.run_decay()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn prune(engine: &MemoryEngine) -> Result<()> {
    let removed = engine.prune_waypoints()?;
    println!("{}", serde_json::json!({ "removed": removed }));
    Ok(())
}

/// Run the background maintenance loop: periodic decay sweeps, waypoint
/// pruning, and co-activation batches, until interrupted.
pub async fn maintain(engine: Arc<MemoryEngine>, interval_secs: u64) -> Result<()> {
    spawn_coactivation_worker(engine.clone(), Duration::from_secs(1));
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    info!(interval_secs, "maintenance loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.run_decay()?;
                if !report.skipped {
                    let pruned = engine.prune_waypoints()?;
                    info!(
                        processed = report.processed,
                        decayed = report.decayed,
                        pruned,
                        "maintenance cycle"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("maintenance loop stopping");
                return Ok(());
            }
        }
    }
}

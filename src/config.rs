use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngramConfig {
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub embedding: EmbeddingConfig,
    pub query: QueryConfig,
    pub graph: GraphConfig,
    pub decay: DecayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub default_owner: String,
    pub default_tenant: String,
    /// Memories per segment before a new segment is opened.
    pub segment_capacity: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub log_level: String,
    /// Concurrent query ceiling; queries beyond this are rejected.
    pub max_active_queries: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub default_k: usize,
    /// Per-sector candidate overfetch multiplier.
    pub overfetch: usize,
    /// Mean top-similarity above which waypoint expansion is skipped.
    pub high_confidence: f64,
    pub lexical_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    /// Cosine similarity needed to seed or auto-link a waypoint.
    pub link_threshold: f64,
    pub same_sector_weight: f64,
    pub max_expansions: usize,
    pub reinforce_boost: f64,
    pub prune_threshold: f64,
    /// Bounded co-activation channel; pairs past this are dropped.
    pub coactivation_capacity: usize,
    pub coactivation_batch: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub sweep_cooldown_secs: i64,
    /// Fraction of each segment visited per sweep.
    pub sample_ratio: f64,
    /// Decay factor below which vectors are compressed.
    pub compress_threshold: f64,
    /// Decay factor below which memories drop to fingerprint form.
    pub cold_threshold: f64,
    pub min_vector_dim: usize,
    pub regeneration_enabled: bool,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            runtime: RuntimeConfig::default(),
            embedding: EmbeddingConfig::default(),
            query: QueryConfig::default(),
            graph: GraphConfig::default(),
            decay: DecayConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_engram_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            default_owner: "default".into(),
            default_tenant: "default".into(),
            segment_capacity: 10_000,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            max_active_queries: 8,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashed".into(),
            dimensions: 384,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            overfetch: 3,
            high_confidence: 0.55,
            lexical_enabled: true,
            cache_ttl_secs: 60,
            cache_capacity: 256,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            link_threshold: 0.75,
            same_sector_weight: 0.5,
            max_expansions: 16,
            reinforce_boost: 0.05,
            prune_threshold: 0.05,
            coactivation_capacity: 4096,
            coactivation_batch: 50,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            sweep_cooldown_secs: 60,
            sample_ratio: 0.2,
            compress_threshold: 0.7,
            cold_threshold: 0.25,
            min_vector_dim: 64,
            regeneration_enabled: true,
        }
    }
}

/// Returns `~/.engram/`
pub fn default_engram_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engram")
}

/// Returns the default config file path: `~/.engram/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engram_dir().join("config.toml")
}

impl EngramConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EngramConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ENGRAM_DB, ENGRAM_TENANT, ENGRAM_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENGRAM_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ENGRAM_TENANT") {
            self.storage.default_tenant = val;
        }
        if let Ok(val) = std::env::var("ENGRAM_LOG_LEVEL") {
            self.runtime.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngramConfig::default();
        assert_eq!(config.runtime.log_level, "info");
        assert_eq!(config.storage.default_tenant, "default");
        assert_eq!(config.query.default_k, 10);
        assert!((config.graph.link_threshold - 0.75).abs() < f64::EPSILON);
        assert!(config.storage.db_path.ends_with("memory.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[runtime]
log_level = "debug"
max_active_queries = 2

[storage]
db_path = "/tmp/test.db"
default_tenant = "myproject"

[query]
default_k = 5
"#;
        let config: EngramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime.log_level, "debug");
        assert_eq!(config.runtime.max_active_queries, 2);
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.default_tenant, "myproject");
        assert_eq!(config.query.default_k, 5);
        // defaults still apply for unset fields
        assert_eq!(config.query.overfetch, 3);
        assert!((config.decay.compress_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngramConfig::default();
        std::env::set_var("ENGRAM_DB", "/tmp/override.db");
        std::env::set_var("ENGRAM_TENANT", "env-tenant");
        std::env::set_var("ENGRAM_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.storage.default_tenant, "env-tenant");
        assert_eq!(config.runtime.log_level, "trace");

        std::env::remove_var("ENGRAM_DB");
        std::env::remove_var("ENGRAM_TENANT");
        std::env::remove_var("ENGRAM_LOG_LEVEL");
    }
}

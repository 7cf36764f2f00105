//! Embedding provider abstraction.
//!
//! The engine never calls a model directly; it goes through
//! [`EmbeddingProvider`], which real deployments implement against their
//! embedding service. The built-in [`hashed::HashedProvider`] is a
//! deterministic offline fallback used by the CLI and tests.

pub mod hashed;

use crate::memory::sectors::Sector;
use anyhow::Result;

/// A source of sector-conditioned embeddings. Implementations must be
/// thread-safe; the engine shares one provider across queries.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed text for one sector. Providers may condition on the sector
    /// (different prompts, adapters, or salts per sector).
    fn embed(&self, text: &str, sector: Sector) -> Result<Vec<f32>>;

    /// Embed the same text for several sectors. The default loops over
    /// [`embed`](Self::embed); batching providers should override.
    fn embed_sectors(&self, text: &str, sectors: &[Sector]) -> Result<Vec<(Sector, Vec<f32>)>> {
        sectors
            .iter()
            .map(|&sector| Ok((sector, self.embed(text, sector)?)))
            .collect()
    }

    /// Native output dimensionality.
    fn dimensions(&self) -> usize;
}

/// Build the provider named in the config. Unknown names fall back to the
/// hashed provider with a warning.
pub fn create_provider(config: &crate::config::EmbeddingConfig) -> Box<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "hashed" => Box::new(hashed::HashedProvider::new(config.dimensions)),
        other => {
            tracing::warn!(provider = other, "unknown embedding provider, using hashed");
            Box::new(hashed::HashedProvider::new(config.dimensions))
        }
    }
}

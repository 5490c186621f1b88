//! Registry client
//!
//! Loads the registry document, caching it on disk for 24 hours. The cache
//! age comes from the cache file's modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::{RegistryEntry, RegistryIndex};
use crate::config::Settings;
use crate::error::RegistryError;
use crate::fetch::Fetcher;

/// Registry cache freshness window (24 hours)
pub const REGISTRY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A cache file that parsed successfully
struct CachedRegistry {
    index: RegistryIndex,
    age: Duration,
}

/// Loads and queries the registry
#[derive(Clone)]
pub struct RegistryClient {
    url: String,
    cache_path: PathBuf,
    ttl: Duration,
    fetcher: Fetcher,
}

impl RegistryClient {
    pub fn new(url: impl Into<String>, cache_path: impl Into<PathBuf>, fetcher: Fetcher) -> Self {
        Self {
            url: url.into(),
            cache_path: cache_path.into(),
            ttl: REGISTRY_CACHE_TTL,
            fetcher,
        }
    }

    /// Client for the configured registry URL and cache location
    pub fn from_settings(settings: &Settings, fetcher: Fetcher) -> Self {
        Self::new(
            settings.registry_url.clone(),
            settings.registry_cache_path(),
            fetcher,
        )
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Load the registry, serving it from the cache while fresh
    ///
    /// When the remote load fails and an expired cache is still readable,
    /// the expired entries are returned instead of the error.
    pub async fn load_registry(&self) -> Result<RegistryIndex, RegistryError> {
        let cached = self.read_cache();

        if let Some(cached) = &cached {
            if cached.age <= self.ttl {
                tracing::debug!(
                    "Using cached registry ({} entries, age {:?})",
                    cached.index.len(),
                    cached.age
                );
                return Ok(cached.index.clone());
            }
            tracing::debug!("Registry cache expired (age {:?})", cached.age);
        }

        match self.fetch_remote().await {
            Ok(index) => Ok(index),
            Err(e) => match cached {
                Some(stale) => {
                    tracing::warn!("{}; using cached registry from {:?} ago", e, stale.age);
                    Ok(stale.index)
                }
                None => Err(e),
            },
        }
    }

    /// Load the registry from the network, refreshing the cache
    pub async fn load_registry_fresh(&self) -> Result<RegistryIndex, RegistryError> {
        self.fetch_remote().await
    }

    /// Resolve a user supplied name against the registry
    pub async fn resolve_slug(&self, name: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.load_registry().await?.resolve_slug(name).cloned())
    }

    /// Ranked search over the registry; callers truncate for display
    pub async fn search_registry(
        &self,
        query: &str,
        categories: Option<&[String]>,
    ) -> Result<Vec<RegistryEntry>, RegistryError> {
        let index = self.load_registry().await?;
        Ok(index
            .search(query, categories)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Delete the cache file, if any
    pub fn clear_cache(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.cache_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    async fn fetch_remote(&self) -> Result<RegistryIndex, RegistryError> {
        let result = self.fetcher.fetch(&self.url, None).await?;
        let index = RegistryIndex::from_json(&result.content)?;

        tracing::debug!("Fetched registry from {}: {} entries", self.url, index.len());

        // Caching is best effort
        if let Err(e) = self.write_cache(&index) {
            tracing::warn!(
                "Failed to write registry cache {}: {}",
                self.cache_path.display(),
                e
            );
        }

        Ok(index)
    }

    /// Read the cache; anything unreadable counts as a miss
    fn read_cache(&self) -> Option<CachedRegistry> {
        let modified = std::fs::metadata(&self.cache_path)
            .and_then(|m| m.modified())
            .ok()?;
        let content = std::fs::read_to_string(&self.cache_path).ok()?;

        let index = match RegistryIndex::from_json(&content) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!("Ignoring corrupt registry cache: {}", e);
                return None;
            }
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        Some(CachedRegistry { index, age })
    }

    fn write_cache(&self, index: &RegistryIndex) -> anyhow::Result<()> {
        let json = index.to_json()?;
        crate::io::write_atomic(&self.cache_path, json.as_bytes())?;
        tracing::debug!("Saved registry to cache: {}", self.cache_path.display());
        Ok(())
    }
}

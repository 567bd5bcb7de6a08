//! Short-TTL cache of the content-server directory listing.
//!
//! The directory service is cheap but rate-limited, and the edge list only
//! matters per cell. Entries older than the TTL, or recorded for a different
//! cell, are treated as misses.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use steampipe_cdn::ContentServer;

use crate::store::CacheStore;
use crate::{Result, default_cache_dir};

/// How long a cached server list stays valid.
pub const SERVER_LIST_TTL_SECS: u64 = 300;

const LIST_KEY: &str = "content_servers.json";

#[derive(Serialize, Deserialize)]
struct CachedServerList {
    /// Unix timestamp when the list was fetched
    timestamp: u64,
    /// Cell the list was fetched for
    cell_id: u32,
    servers: Vec<ContentServer>,
}

/// TTL cache for content-server directory responses.
pub struct ServerListCache {
    store: CacheStore,
    ttl_secs: u64,
}

impl ServerListCache {
    /// Create a server-list cache under the default cache directory.
    pub async fn new() -> Result<Self> {
        Self::with_base_dir(default_cache_dir()?.join("servers")).await
    }

    /// Create a server-list cache rooted at a custom directory.
    pub async fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: CacheStore::new(base_dir).await?,
            ttl_secs: SERVER_LIST_TTL_SECS,
        })
    }

    /// Override the TTL (used by tests).
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Return the cached server list for `cell_id` if it is still fresh.
    pub async fn get(&self, cell_id: u32) -> Result<Option<Vec<ContentServer>>> {
        if !self.store.exists(LIST_KEY).await {
            return Ok(None);
        }

        let cached: CachedServerList = match self.store.read_json(LIST_KEY).await {
            Ok(cached) => cached,
            Err(e) => {
                debug!("Removing unreadable server list cache: {e}");
                self.store.delete(LIST_KEY).await?;
                return Ok(None);
            }
        };

        if cached.cell_id != cell_id {
            trace!(
                "Cached server list is for cell {}, wanted {cell_id}",
                cached.cell_id
            );
            return Ok(None);
        }

        let age = Self::now().saturating_sub(cached.timestamp);
        if age >= self.ttl_secs {
            trace!("Cached server list expired ({age}s old)");
            return Ok(None);
        }

        debug!(
            "Using cached server list for cell {cell_id} ({} servers, {age}s old)",
            cached.servers.len()
        );
        Ok(Some(cached.servers))
    }

    /// Store a freshly fetched server list for `cell_id`.
    pub async fn store(&self, cell_id: u32, servers: &[ContentServer]) -> Result<()> {
        let cached = CachedServerList {
            timestamp: Self::now(),
            cell_id,
            servers: servers.to_vec(),
        };
        self.store.write_json(LIST_KEY, &cached).await
    }

    /// Serve the cached list when fresh, otherwise fetch and persist.
    pub async fn fetch_or_refresh<F, Fut>(
        &self,
        cell_id: u32,
        fetch: F,
    ) -> Result<Vec<ContentServer>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ContentServer>>>,
    {
        if let Some(servers) = self.get(cell_id).await? {
            return Ok(servers);
        }

        let servers = fetch().await?;
        self.store(cell_id, &servers).await?;
        Ok(servers)
    }

    /// Drop any cached list.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(LIST_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> ContentServer {
        ContentServer {
            server_type: "CDN".into(),
            host: host.into(),
            vhost: None,
            weighted_load: 0,
            https: false,
        }
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ServerListCache::with_base_dir(dir.path()).await.unwrap();

        assert!(cache.get(5).await.unwrap().is_none());

        cache.store(5, &[server("a"), server("b")]).await.unwrap();
        let servers = cache.get(5).await.unwrap().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].host, "a");
    }

    #[tokio::test]
    async fn test_cell_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ServerListCache::with_base_dir(dir.path()).await.unwrap();

        cache.store(5, &[server("a")]).await.unwrap();
        assert!(cache.get(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ServerListCache::with_base_dir(dir.path())
            .await
            .unwrap()
            .with_ttl_secs(0);

        cache.store(5, &[server("a")]).await.unwrap();
        assert!(cache.get(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_garbage_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ServerListCache::with_base_dir(dir.path()).await.unwrap();

        std::fs::write(dir.path().join(LIST_KEY), b"not json").unwrap();
        assert!(cache.get(5).await.unwrap().is_none());
        assert!(!dir.path().join(LIST_KEY).exists());
    }
}

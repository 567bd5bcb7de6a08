//! Per-app product info cache.
//!
//! App metadata (depot lists, manifest gids per branch) is versioned by a
//! change number. Entries are invalidated when the change service reports a
//! newer change for the app; when the comparison cannot be made at all the
//! whole cache is wiped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::store::CacheStore;
use crate::{Result, default_cache_dir};

/// One cached product-info record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAppInfo {
    /// Change number the record was fetched at
    pub change_number: u32,
    /// Raw product info document
    pub info: serde_json::Value,
}

/// Cache of product info documents, one JSON file per app.
pub struct AppInfoCache {
    store: CacheStore,
}

impl AppInfoCache {
    /// Create an app-info cache under the default cache directory.
    pub async fn new() -> Result<Self> {
        Self::with_base_dir(default_cache_dir()?.join("appinfo")).await
    }

    /// Create an app-info cache rooted at a custom directory.
    pub async fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: CacheStore::new(base_dir).await?,
        })
    }

    fn key(app_id: u32) -> String {
        format!("{app_id}.json")
    }

    /// Look up the cached record for an app, removing unreadable entries.
    pub async fn get(&self, app_id: u32) -> Result<Option<CachedAppInfo>> {
        let key = Self::key(app_id);
        if !self.store.exists(&key).await {
            return Ok(None);
        }

        match self.store.read_json(&key).await {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!("Removing unreadable app info for {app_id}: {e}");
                self.store.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Store a product-info record for an app.
    pub async fn store(&self, app_id: u32, info: &CachedAppInfo) -> Result<()> {
        self.store.write_json(&Self::key(app_id), info).await
    }

    /// Change numbers of all cached apps, for change-list queries.
    pub async fn cached_change_numbers(&self) -> Result<Vec<(u32, u32)>> {
        let mut result = Vec::new();
        for key in self.store.keys().await? {
            let Some(app_id) = key
                .strip_suffix(".json")
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if let Some(info) = self.get(app_id).await? {
                result.push((app_id, info.change_number));
            }
        }
        result.sort_unstable();
        Ok(result)
    }

    /// Drop the cached record for one app.
    pub async fn remove(&self, app_id: u32) -> Result<()> {
        debug!("Invalidating cached app info for {app_id}");
        self.store.delete(&Self::key(app_id)).await
    }

    /// Drop every cached record. Used when change numbers can no longer be
    /// compared against the server.
    pub async fn clear(&self) -> Result<()> {
        debug!("Wiping app info cache");
        self.store.clear().await
    }
}

//! On-disk cache for depot manifests.
//!
//! Entries are keyed by the `(app, depot, gid)` triple; a gid names immutable
//! content, so a cached manifest never expires. Corrupt or empty entries are
//! removed on read and reported so the caller can refetch.

use std::path::PathBuf;
use tracing::{debug, warn};

use steampipe_manifest::{DepotKey, DepotManifest};

use crate::store::CacheStore;
use crate::{Result, default_cache_dir};

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// A valid manifest was found
    Found(DepotManifest),
    /// No entry exists for this triple
    Absent,
    /// An entry existed but failed validation and was deleted
    CorruptAndRemoved,
}

/// Cache of parsed depot manifests, one file per `(app, depot, gid)`.
pub struct ManifestCache {
    store: CacheStore,
}

impl ManifestCache {
    /// Create a manifest cache under the default cache directory.
    pub async fn new() -> Result<Self> {
        Self::with_base_dir(default_cache_dir()?.join("manifests")).await
    }

    /// Create a manifest cache rooted at a custom directory.
    pub async fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: CacheStore::new(base_dir).await?,
        })
    }

    fn key(app_id: u32, depot_id: u32, gid: u64) -> String {
        format!("{app_id}_{depot_id}_{gid}")
    }

    /// Look up a manifest, removing the entry if it fails to parse or is
    /// empty.
    pub async fn get_cached(&self, app_id: u32, depot_id: u32, gid: u64) -> Result<CacheLookup> {
        let key = Self::key(app_id, depot_id, gid);
        if !self.store.exists(&key).await {
            return Ok(CacheLookup::Absent);
        }

        let data = self.store.read(&key).await?;
        match DepotManifest::parse(&data) {
            Ok(manifest) if !manifest.is_empty() => {
                debug!("Manifest cache hit for {key}");
                Ok(CacheLookup::Found(manifest))
            }
            Ok(_) => {
                warn!("Removing empty cached manifest {key}");
                self.store.delete(&key).await?;
                Ok(CacheLookup::CorruptAndRemoved)
            }
            Err(e) => {
                warn!("Removing corrupt cached manifest {key}: {e}");
                self.store.delete(&key).await?;
                Ok(CacheLookup::CorruptAndRemoved)
            }
        }
    }

    /// Store a manifest, replacing any existing entry for its triple.
    pub async fn store(&self, app_id: u32, manifest: &DepotManifest) -> Result<()> {
        let meta = &manifest.metadata;
        let key = Self::key(app_id, meta.depot_id, meta.gid);
        let data = manifest.serialize(true)?;
        self.store.write(&key, &data).await
    }

    /// Get a manifest from the cache, or fetch, store, and return it.
    ///
    /// When `key` is given and the manifest still carries encrypted
    /// filenames, they are decrypted and the decrypted form replaces the
    /// cached entry, so later lookups need no key.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        app_id: u32,
        depot_id: u32,
        gid: u64,
        depot_key: Option<&DepotKey>,
        fetch: F,
    ) -> Result<DepotManifest>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let mut manifest = match self.get_cached(app_id, depot_id, gid).await? {
            CacheLookup::Found(manifest) => manifest,
            CacheLookup::Absent | CacheLookup::CorruptAndRemoved => {
                debug!("Fetching manifest {depot_id}/{gid} for app {app_id}");
                let data = fetch().await?;
                let manifest = DepotManifest::parse(&data)?;
                self.store(app_id, &manifest).await?;
                manifest
            }
        };

        if manifest.filenames_encrypted()
            && let Some(depot_key) = depot_key
        {
            manifest.decrypt_filenames(depot_key)?;
            self.store(app_id, &manifest).await?;
        }

        Ok(manifest)
    }

    /// Remove every cached manifest.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

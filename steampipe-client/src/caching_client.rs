//! Cache-first depot client.
//!
//! Wraps an injected [`Session`] plus the edge client and owns every piece
//! of persistent cache state. Each remote operation checks its cache first
//! and persists what it learns, so repeated CLI invocations mostly stay off
//! the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use steampipe_cache::{
    AppInfoCache, CacheLookup, CacheStore, CachedAppInfo, DepotKeyCache, ManifestCache,
    ServerListCache, default_cache_dir,
};
use steampipe_cdn::{CdnClient, ContentServer, fetch_content_servers, fetch_content_servers_from};
use steampipe_manifest::{DepotKey, DepotManifest};

use crate::session::{ProductInfo, Session};
use crate::Result;

const LAST_CHANGE_KEY: &str = "last_change_number";
const LAST_USER_KEY: &str = "lastuser";

/// Caching wrapper around a session and the content edge.
pub struct CachingClient<S: Session> {
    session: S,
    cdn: CdnClient,
    cell_id: u32,
    manifests: ManifestCache,
    depot_keys: Mutex<DepotKeyCache>,
    app_info: AppInfoCache,
    server_list: ServerListCache,
    kv: CacheStore,
    directory_endpoint: Option<String>,
}

impl<S: Session> CachingClient<S> {
    /// Create a client over the default per-user cache directory.
    pub async fn new(session: S, cell_id: u32) -> Result<Self> {
        Self::with_base_dir(session, default_cache_dir()?, cell_id).await
    }

    /// Create a client with all cache state rooted at `base_dir`.
    pub async fn with_base_dir(
        session: S,
        base_dir: impl Into<PathBuf>,
        cell_id: u32,
    ) -> Result<Self> {
        let base_dir = base_dir.into();
        Ok(Self {
            session,
            cdn: CdnClient::new()?,
            cell_id,
            manifests: ManifestCache::with_base_dir(base_dir.join("manifests")).await?,
            depot_keys: Mutex::new(DepotKeyCache::with_base_dir(&base_dir).await?),
            app_info: AppInfoCache::with_base_dir(base_dir.join("appinfo")).await?,
            server_list: ServerListCache::with_base_dir(base_dir.join("servers")).await?,
            kv: CacheStore::new(base_dir).await?,
            directory_endpoint: None,
        })
    }

    /// Point directory-service lookups at a custom endpoint.
    pub fn set_directory_endpoint(&mut self, endpoint: impl Into<String>) {
        self.directory_endpoint = Some(endpoint.into());
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Edge client, for chunk downloads.
    pub fn cdn(&self) -> &CdnClient {
        &self.cdn
    }

    /// Content servers for this cell, from the TTL cache when fresh.
    ///
    /// The edge client's rotation list is refreshed as a side effect.
    pub async fn content_servers(&self) -> Result<Vec<ContentServer>> {
        let servers = self
            .server_list
            .fetch_or_refresh(self.cell_id, || async {
                let servers = match &self.directory_endpoint {
                    Some(endpoint) => {
                        fetch_content_servers_from(self.cdn.http_client(), endpoint, self.cell_id)
                            .await?
                    }
                    None => fetch_content_servers(self.cdn.http_client(), self.cell_id).await?,
                };
                Ok(servers)
            })
            .await?;
        self.cdn.set_servers(servers.clone());
        Ok(servers)
    }

    async fn ensure_servers(&self) -> Result<()> {
        if !self.cdn.has_servers() {
            self.content_servers().await?;
        }
        Ok(())
    }

    /// Decryption key for a depot, from cache or the session.
    pub async fn get_depot_key(&self, app_id: u32, depot_id: u32) -> Result<DepotKey> {
        {
            let keys = self.depot_keys.lock().await;
            if let Some(key) = keys.get(depot_id) {
                return Ok(key.clone());
            }
        }

        debug!("Requesting depot key for {depot_id} (app {app_id})");
        let key = self.session.get_depot_key(app_id, depot_id).await?;
        self.depot_keys.lock().await.insert(depot_id, key.clone());
        Ok(key)
    }

    /// A depot manifest, from cache or via request code + edge fetch.
    ///
    /// With `decrypt` set, the depot key is obtained first and any encrypted
    /// filenames are decrypted; the decrypted manifest replaces the cache
    /// entry so later reads need no key.
    pub async fn get_manifest(
        &self,
        app_id: u32,
        depot_id: u32,
        gid: u64,
        decrypt: bool,
    ) -> Result<DepotManifest> {
        let key = if decrypt {
            Some(self.get_depot_key(app_id, depot_id).await?)
        } else {
            None
        };

        let mut manifest = match self.manifests.get_cached(app_id, depot_id, gid).await? {
            CacheLookup::Found(manifest) => manifest,
            CacheLookup::Absent | CacheLookup::CorruptAndRemoved => {
                info!("Fetching manifest {gid} for depot {depot_id}");
                self.ensure_servers().await?;
                let code = self
                    .session
                    .get_manifest_request_code(app_id, depot_id, gid)
                    .await?;
                let bytes = self.cdn.fetch_manifest(depot_id, gid, Some(code)).await?;
                let manifest = DepotManifest::parse(&bytes)?;
                self.manifests.store(app_id, &manifest).await?;
                manifest
            }
        };

        if manifest.filenames_encrypted()
            && let Some(key) = &key
        {
            manifest.decrypt_filenames(key)?;
            self.manifests.store(app_id, &manifest).await?;
        }

        Ok(manifest)
    }

    /// Parse a manifest from a local file, bypassing session and edge.
    pub async fn load_manifest_file(path: &Path) -> Result<DepotManifest> {
        let data = tokio::fs::read(path).await?;
        Ok(DepotManifest::parse(&data)?)
    }

    /// Invalidate cached app info based on the change service.
    ///
    /// When per-app diffing is impossible (first run, or the server demands
    /// a full update) the whole app-info cache is wiped; otherwise only the
    /// changed apps are dropped.
    pub async fn check_for_changes(&self) -> Result<()> {
        let since = self.read_change_number().await;
        let cached_apps: Vec<u32> = self
            .app_info
            .cached_change_numbers()
            .await?
            .into_iter()
            .map(|(app, _)| app)
            .collect();

        let changes = self.session.get_changes_since(since, &cached_apps).await?;

        if since == 0 || changes.force_full_update {
            self.app_info.clear().await?;
        } else {
            for app in &changes.changed_apps {
                self.app_info.remove(*app).await?;
            }
        }

        self.kv
            .write(
                LAST_CHANGE_KEY,
                changes.current_change_number.to_string().as_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn read_change_number(&self) -> u32 {
        match self.kv.read(LAST_CHANGE_KEY).await {
            Ok(data) => String::from_utf8_lossy(&data).trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Product info for the given apps, serving cached records from disk
    /// and fetching only the missing ones.
    pub async fn get_product_info(
        &self,
        app_ids: &[u32],
    ) -> Result<HashMap<u32, ProductInfo>> {
        let mut result = HashMap::new();
        let mut missing = Vec::new();

        for &app_id in app_ids {
            match self.app_info.get(app_id).await? {
                Some(cached) => {
                    result.insert(
                        app_id,
                        ProductInfo {
                            change_number: cached.change_number,
                            info: cached.info,
                        },
                    );
                }
                None => missing.push(app_id),
            }
        }

        if !missing.is_empty() {
            debug!("Fetching product info for {} apps", missing.len());
            let fresh = self.session.get_product_info(&missing).await?;
            for (app_id, info) in fresh {
                self.app_info
                    .store(
                        app_id,
                        &CachedAppInfo {
                            change_number: info.change_number,
                            info: info.info.clone(),
                        },
                    )
                    .await?;
                result.insert(app_id, info);
            }
        }

        Ok(result)
    }

    /// Last username recorded by a previous run.
    pub async fn lastuser(&self) -> Option<String> {
        match self.kv.read(LAST_USER_KEY).await {
            Ok(data) => String::from_utf8(data).ok().filter(|s| !s.is_empty()),
            Err(_) => None,
        }
    }

    /// Remember the username for the next run.
    pub async fn set_lastuser(&self, username: &str) -> Result<()> {
        Ok(self.kv.write(LAST_USER_KEY, username.as_bytes()).await?)
    }

    /// Flush dirty cache state (currently the depot key set).
    ///
    /// Writes are suppressed when nothing changed since load.
    pub async fn save_cache(&self) -> Result<()> {
        self.depot_keys.lock().await.save().await?;
        Ok(())
    }

    /// Remove all cached state: manifests, app info, server list, keys.
    pub async fn clear_caches(&self) -> Result<()> {
        self.manifests.clear().await?;
        self.app_info.clear().await?;
        self.server_list.clear().await?;
        self.depot_keys.lock().await.clear().await?;
        self.kv.delete(LAST_CHANGE_KEY).await?;
        Ok(())
    }
}

//! On-disk caches for SteamPipe content metadata.
//!
//! This crate provides the persistent caches a depot client needs:
//! - Manifest cache keyed by `(app, depot, gid)` (immutable, never expires)
//! - Depot decryption keys (one JSON file, explicit load, dirty-tracked save)
//! - Product info per app, invalidated by change number
//! - Content-server directory listings with a short TTL

use std::path::{Path, PathBuf};

pub mod app_info;
pub mod depot_keys;
pub mod error;
pub mod manifest_cache;
pub mod server_cache;
mod store;

pub use app_info::{AppInfoCache, CachedAppInfo};
pub use depot_keys::DepotKeyCache;
pub use error::{Error, Result};
pub use manifest_cache::{CacheLookup, ManifestCache};
pub use server_cache::{SERVER_LIST_TTL_SECS, ServerListCache};
pub use store::CacheStore;

/// Get the base cache directory.
///
/// Returns a path like:
/// - Linux: `~/.cache/steampipe`
/// - macOS: `~/Library/Caches/steampipe`
/// - Windows: `C:\Users\{user}\AppData\Local\steampipe\cache`
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .ok_or(Error::CacheDirectoryNotFound)
        .map(|dir| dir.join("steampipe"))
}

/// Ensure a directory exists, creating it if necessary
pub(crate) async fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if tokio::fs::metadata(path).await.is_err() {
        tokio::fs::create_dir_all(path).await?;
    }
    Ok(())
}

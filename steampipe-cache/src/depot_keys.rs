//! Persistent store of depot decryption keys.
//!
//! Keys are granted per account and change rarely, so they are kept in one
//! JSON file mapping depot id to a hex-encoded 32-byte key. Loading is
//! explicit; saving is suppressed when nothing changed.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, trace};

use steampipe_manifest::DepotKey;

use crate::store::write_atomic;
use crate::{Error, Result, default_cache_dir, ensure_dir};

const KEY_FILE: &str = "depot_keys.json";

/// In-memory view of the depot key file.
pub struct DepotKeyCache {
    path: PathBuf,
    keys: HashMap<u32, DepotKey>,
    dirty: bool,
}

impl DepotKeyCache {
    /// Open the key cache at the default location and load existing keys.
    pub async fn new() -> Result<Self> {
        Self::with_base_dir(default_cache_dir()?).await
    }

    /// Open the key cache under a custom directory and load existing keys.
    pub async fn with_base_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        ensure_dir(&base_dir).await?;

        let mut cache = Self {
            path: base_dir.join(KEY_FILE),
            keys: HashMap::new(),
            dirty: false,
        };
        cache.load().await?;
        Ok(cache)
    }

    /// Load keys from disk, replacing the in-memory set.
    ///
    /// A missing file is an empty key set, not an error.
    pub async fn load(&mut self) -> Result<()> {
        self.keys.clear();
        self.dirty = false;

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("No depot key file at {:?}", self.path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let raw: HashMap<String, String> = serde_json::from_slice(&data)?;
        for (depot, hex_key) in raw {
            let depot_id: u32 = depot.parse().map_err(|_| Error::InvalidDepotKey {
                depot_id: 0,
                reason: format!("non-numeric depot id {depot:?}"),
            })?;
            let key = DepotKey::from_hex(&hex_key).map_err(|e| Error::InvalidDepotKey {
                depot_id,
                reason: e.to_string(),
            })?;
            self.keys.insert(depot_id, key);
        }

        debug!("Loaded {} depot keys", self.keys.len());
        Ok(())
    }

    /// Look up the key for a depot.
    pub fn get(&self, depot_id: u32) -> Option<&DepotKey> {
        self.keys.get(&depot_id)
    }

    /// Whether a key is known for a depot.
    pub fn contains(&self, depot_id: u32) -> bool {
        self.keys.contains_key(&depot_id)
    }

    /// Record a key. Marks the cache dirty only when the key is new or
    /// different.
    pub fn insert(&mut self, depot_id: u32, key: DepotKey) {
        if self.keys.get(&depot_id) == Some(&key) {
            return;
        }
        self.keys.insert(depot_id, key);
        self.dirty = true;
    }

    /// Number of known keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Forget all keys and remove the key file.
    pub async fn clear(&mut self) -> Result<()> {
        self.keys.clear();
        self.dirty = false;
        if tokio::fs::metadata(&self.path).await.is_ok() {
            tokio::fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Write the key file back to disk, skipping the write when nothing
    /// changed since load.
    pub async fn save(&mut self) -> Result<()> {
        if !self.dirty {
            trace!("Depot keys unchanged, skipping save");
            return Ok(());
        }

        let mut raw: Vec<(String, String)> = self
            .keys
            .iter()
            .map(|(depot, key)| (depot.to_string(), key.to_hex()))
            .collect();
        raw.sort();
        let map: serde_json::Map<String, serde_json::Value> = raw
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();

        let data = serde_json::to_vec_pretty(&serde_json::Value::Object(map))?;
        write_atomic(&self.path, &data).await?;
        self.dirty = false;

        debug!("Saved {} depot keys", self.keys.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> DepotKey {
        DepotKey::from_bytes([fill; 32])
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DepotKeyCache::with_base_dir(dir.path()).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_insert_save_reload() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DepotKeyCache::with_base_dir(dir.path()).await.unwrap();
        cache.insert(570, key(0xaa));
        cache.insert(571, key(0xbb));
        cache.save().await.unwrap();

        let reloaded = DepotKeyCache::with_base_dir(dir.path()).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(570), Some(&key(0xaa)));
        assert_eq!(reloaded.get(571), Some(&key(0xbb)));
        assert!(!reloaded.contains(999));
    }

    #[tokio::test]
    async fn test_save_suppressed_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DepotKeyCache::with_base_dir(dir.path()).await.unwrap();
        cache.insert(570, key(0x11));
        cache.save().await.unwrap();

        let mtime = std::fs::metadata(dir.path().join(KEY_FILE))
            .unwrap()
            .modified()
            .unwrap();

        // Re-inserting the same key leaves the cache clean
        cache.insert(570, key(0x11));
        cache.save().await.unwrap();

        let mtime_after = std::fs::metadata(dir.path().join(KEY_FILE))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(mtime, mtime_after);
    }

    #[tokio::test]
    async fn test_file_is_hex_json() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DepotKeyCache::with_base_dir(dir.path()).await.unwrap();
        cache.insert(570, key(0xab));
        cache.save().await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(KEY_FILE)).unwrap();
        let parsed: HashMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["570"], "ab".repeat(32));
    }

    #[tokio::test]
    async fn test_malformed_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(KEY_FILE),
            r#"{"570": "not-hex-at-all"}"#,
        )
        .unwrap();

        let result = DepotKeyCache::with_base_dir(dir.path()).await;
        assert!(matches!(result, Err(Error::InvalidDepotKey { .. })));
    }
}

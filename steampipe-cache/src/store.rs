//! Filesystem key/value store shared by the typed caches.
//!
//! Writes go to a temporary sibling file and are renamed into place, so a
//! crash mid-write never leaves a truncated entry behind.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, trace};

use crate::{Result, ensure_dir};

/// On-disk store rooted at one directory, one file per key.
pub struct CacheStore {
    /// Base directory for this store
    base_dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        ensure_dir(&base_dir).await?;

        debug!("Initialized cache store at: {:?}", base_dir);

        Ok(Self { base_dir })
    }

    /// Get the full path for a cache key
    pub fn get_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Check if a cache entry exists
    pub async fn exists(&self, key: &str) -> bool {
        tokio::fs::metadata(self.get_path(key)).await.is_ok()
    }

    /// Write data to the cache atomically.
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.get_path(key);

        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        trace!("Writing {} bytes to cache key: {}", data.len(), key);
        write_atomic(&path, data).await
    }

    /// Read data from the cache
    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.get_path(key);

        trace!("Reading from cache key: {}", key);
        let data = tokio::fs::read(&path).await?;

        Ok(data)
    }

    /// Serialize a value as JSON and write it atomically.
    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.write(key, &data).await
    }

    /// Read and deserialize a JSON value.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.read(key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Delete a cache entry
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.get_path(key);

        if tokio::fs::metadata(&path).await.is_ok() {
            trace!("Deleting cache key: {}", key);
            tokio::fs::remove_file(&path).await?;
        }

        Ok(())
    }

    /// List the keys currently stored (top-level files only).
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                keys.push(name.to_string());
            }
        }
        Ok(keys)
    }

    /// Clear all entries in this store
    pub async fn clear(&self) -> Result<()> {
        debug!("Clearing all entries under {:?}", self.base_dir);

        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                tokio::fs::remove_file(&path).await?;
            }
        }

        Ok(())
    }

    /// Get the base directory of this store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Write `data` to `path` via a temporary sibling plus rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp{}", process::id()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("store")).await.unwrap();

        let key = "test_key";
        let data = b"test data";

        store.write(key, data).await.unwrap();
        assert!(store.exists(key).await);
        assert_eq!(store.read(key).await.unwrap(), data);

        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path()).await.unwrap();

        store
            .write_json("numbers.json", &vec![1u32, 2, 3])
            .await
            .unwrap();
        let values: Vec<u32> = store.read_json("numbers.json").await.unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path()).await.unwrap();

        store.write("a", b"1").await.unwrap();
        store.write("a", b"2").await.unwrap();

        let keys = store.keys().await.unwrap();
        assert_eq!(keys, vec!["a".to_string()]);
        assert_eq!(store.read("a").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path()).await.unwrap();

        store.write("a", b"1").await.unwrap();
        store.write("b", b"2").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }
}

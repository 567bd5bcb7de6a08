//! Error types for the steampipe-cache crate

use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum Error {
    /// Cache directory could not be determined
    #[error("Could not determine cache directory for the current platform")]
    CacheDirectoryNotFound,

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache key provided
    #[error("Invalid cache key: {0}")]
    InvalidCacheKey(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest parse or crypto error
    #[error("Manifest error: {0}")]
    Manifest(#[from] steampipe_manifest::Error),

    /// Content-server client error
    #[error("Content server error: {0}")]
    Cdn(#[from] steampipe_cdn::Error),

    /// A stored depot key was malformed
    #[error("Invalid depot key for depot {depot_id}: {reason}")]
    InvalidDepotKey {
        /// Depot the key belongs to
        depot_id: u32,
        /// Why the key was rejected
        reason: String,
    },
}

//! Error types for the depot client

use std::path::PathBuf;
use thiserror::Error;

/// Result type for depot client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for depot client operations
#[derive(Debug, Error)]
pub enum Error {
    /// No license or entitlement for the requested content
    #[error("Access denied for {resource}")]
    AccessDenied {
        /// Resource being requested
        resource: String,
    },

    /// Requested app/depot/manifest does not exist
    #[error("Not found: {resource}")]
    NotFound {
        /// Resource being requested
        resource: String,
    },

    /// A remote call exceeded its time bound
    #[error("Request timed out for {resource}")]
    Timeout {
        /// Resource being requested
        resource: String,
    },

    /// Work skipped because cancellation was requested
    #[error("Cancelled: {resource}")]
    Cancelled {
        /// Work that was skipped
        resource: String,
    },

    /// Pre-allocation could not reach the requested file size (disk full)
    #[error("Could not allocate {requested} bytes for {path:?} (got {actual})")]
    AllocationFailed {
        /// Destination file
        path: PathBuf,
        /// Bytes requested
        requested: u64,
        /// Bytes actually allocated
        actual: u64,
    },

    /// Filenames are still encrypted and no depot key is available
    #[error("Filenames for depot {depot_id} are encrypted and no key is available")]
    FilenamesEncrypted {
        /// Depot whose manifest is affected
        depot_id: u32,
    },

    /// A chunk failed its digest check even after re-fetching
    #[error("Chunk {chunk} of {file} failed integrity check")]
    ChunkIntegrity {
        /// File being reconstructed
        file: String,
        /// Hex chunk id
        chunk: String,
    },

    /// A manifest path would escape the download directory
    #[error("Refusing unsafe manifest path: {path}")]
    UnsafePath {
        /// The offending relative path
        path: String,
    },

    /// Path not present in any loaded manifest
    #[error("No such file in loaded manifests: {path}")]
    FileNotIndexed {
        /// The path that was looked up
        path: String,
    },

    /// Content-server client error
    #[error("Content server error: {0}")]
    Cdn(#[from] steampipe_cdn::Error),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] steampipe_cache::Error),

    /// Manifest parse or crypto error
    #[error("Manifest error: {0}")]
    Manifest(#[from] steampipe_manifest::Error),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an access denied error
    pub fn access_denied(resource: impl Into<String>) -> Self {
        Self::AccessDenied {
            resource: resource.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(resource: impl Into<String>) -> Self {
        Self::Timeout {
            resource: resource.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(resource: impl Into<String>) -> Self {
        Self::Cancelled {
            resource: resource.into(),
        }
    }
}

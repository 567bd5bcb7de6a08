//! Error types for edge-server operations

use thiserror::Error;

/// Error types for content-server operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Network timeout
    #[error("Request timed out for {resource}")]
    Timeout {
        /// Resource being requested
        resource: String,
    },

    /// The edge refused to serve the content
    #[error("Access denied for {resource}")]
    AccessDenied {
        /// Resource being requested
        resource: String,
    },

    /// Content not found on any edge server
    #[error("Content not found: {resource}")]
    NotFound {
        /// The resource that was not found
        resource: String,
    },

    /// No content servers are configured
    #[error("No content servers available")]
    NoServers,

    /// All configured servers failed for a request
    #[error("All content servers exhausted for {resource}")]
    ServersExhausted {
        /// Resource being requested
        resource: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// Invalid content hash format
    #[error("Invalid content hash: {hash}")]
    InvalidHash {
        /// The invalid hash string
        hash: String,
    },

    /// Invalid response from the edge or directory service
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Reason for the invalid response
        reason: String,
    },
}

/// Result type for content-server operations
pub type Result<T> = std::result::Result<T, Error>;

// Helper methods for common error construction
impl Error {
    /// Create a timeout error
    pub fn timeout(resource: impl Into<String>) -> Self {
        Self::Timeout {
            resource: resource.into(),
        }
    }

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

    /// Create a servers exhausted error
    pub fn servers_exhausted(resource: impl Into<String>) -> Self {
        Self::ServersExhausted {
            resource: resource.into(),
        }
    }

    /// Create an invalid hash error
    pub fn invalid_hash(hash: impl Into<String>) -> Self {
        Self::InvalidHash { hash: hash.into() }
    }

    /// Create an invalid response error
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create a rate limited error
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }
}

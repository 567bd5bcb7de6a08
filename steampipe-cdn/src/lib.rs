//! Edge-server HTTP client for SteamPipe content delivery.
//!
//! Provides directory-service lookups (which edge servers serve a cell) and
//! a retrying, rotating client for fetching depot manifests and content
//! chunks from those servers.
//!
//! # Example
//!
//! ```no_run
//! use steampipe_cdn::{CdnClient, fetch_content_servers};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CdnClient::new()?;
//! let servers = fetch_content_servers(client.http_client(), 0).await?;
//! client.set_servers(servers);
//!
//! let manifest = client.fetch_manifest(570, 7280959080077824592, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod servers;

pub use client::{CdnClient, CdnClientBuilder};
pub use error::{Error, Result};
pub use servers::{ContentServer, fetch_content_servers, fetch_content_servers_from};

//! Content-server directory lookups.
//!
//! The directory service returns the list of edge servers available to a
//! cell. The list changes frequently and is cheap to refetch, so callers
//! cache it for a short TTL (see the server cache in `steampipe-cache`).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Public directory-service endpoint listing edge servers for a cell.
const DIRECTORY_URL: &str =
    "https://api.steampowered.com/IContentServerDirectoryService/GetServersForSteamPipe/v1/";

/// One edge-server descriptor from the directory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentServer {
    /// Server type, e.g. "SteamCache" or "CDN"
    #[serde(rename = "type", default)]
    pub server_type: String,
    /// Hostname to fetch from
    pub host: String,
    /// Virtual host to use in request URLs, when different from `host`
    #[serde(default)]
    pub vhost: Option<String>,
    /// Load-balancing weight; lower is less loaded
    #[serde(default)]
    pub weighted_load: i64,
    /// Whether this server requires an authenticated session
    #[serde(default)]
    pub https: bool,
}

impl ContentServer {
    /// Hostname to place in request URLs.
    pub fn url_host(&self) -> &str {
        self.vhost.as_deref().unwrap_or(&self.host)
    }
}

#[derive(Deserialize)]
struct DirectoryResponse {
    response: DirectoryBody,
}

#[derive(Deserialize)]
struct DirectoryBody {
    #[serde(default)]
    servers: Vec<ContentServer>,
}

/// Fetch the edge-server list for a cell from the directory service.
///
/// Servers are returned sorted by weighted load, least loaded first.
pub async fn fetch_content_servers(
    client: &reqwest::Client,
    cell_id: u32,
) -> Result<Vec<ContentServer>> {
    fetch_content_servers_from(client, DIRECTORY_URL, cell_id).await
}

/// Same as [`fetch_content_servers`], against a custom directory endpoint.
pub async fn fetch_content_servers_from(
    client: &reqwest::Client,
    endpoint: &str,
    cell_id: u32,
) -> Result<Vec<ContentServer>> {
    debug!("Fetching content server list for cell {cell_id}");
    let response = client
        .get(endpoint)
        .query(&[("cell_id", cell_id)])
        .send()
        .await?
        .error_for_status()?;

    let body: DirectoryResponse = response
        .json()
        .await
        .map_err(|e| Error::invalid_response(format!("directory service: {e}")))?;

    let mut servers: Vec<ContentServer> = body
        .response
        .servers
        .into_iter()
        .filter(|s| !s.host.is_empty())
        .collect();

    if servers.is_empty() {
        return Err(Error::invalid_response(
            "directory service returned no servers",
        ));
    }

    servers.sort_by_key(|s| s.weighted_load);
    debug!("Directory service returned {} servers", servers.len());
    Ok(servers)
}

//! Edge-server client for downloading depot content.

use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::servers::ContentServer;
use crate::{Error, Result};

/// Default maximum retries per host
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial backoff in milliseconds
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Default maximum backoff in milliseconds
const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;

/// Default backoff multiplier
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter factor (0.0 to 1.0)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default request timeout
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Manifest protocol version carried in manifest URLs
const MANIFEST_PROTOCOL_VERSION: u32 = 5;

/// Client for fetching manifests and chunks from content edge servers.
///
/// Owns the edge-server list for its lifetime and rotates across hosts,
/// retrying transient failures with exponential backoff. Authoritative
/// failures (not found, access denied) are surfaced immediately without
/// trying further hosts.
#[derive(Debug)]
pub struct CdnClient {
    /// HTTP client with connection pooling
    client: Client,
    /// Edge servers available to this client, least loaded first
    servers: RwLock<Vec<ContentServer>>,
    /// Round-robin cursor over `servers`
    next_server: AtomicUsize,
    /// Maximum number of retries per host
    max_retries: u32,
    /// Initial backoff duration in milliseconds
    initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    max_backoff_ms: u64,
    /// Backoff multiplier
    backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl CdnClient {
    /// Create a new edge client with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client.
    pub fn builder() -> CdnClientBuilder {
        CdnClientBuilder::new()
    }

    /// Borrow the underlying HTTP client (shared with directory lookups).
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Replace the edge-server list.
    pub fn set_servers(&self, servers: Vec<ContentServer>) {
        debug!("Using {} content servers", servers.len());
        *self.servers.write() = servers;
        self.next_server.store(0, Ordering::Relaxed);
    }

    /// Whether any edge servers are configured.
    pub fn has_servers(&self) -> bool {
        !self.servers.read().is_empty()
    }

    /// Snapshot of the configured servers.
    pub fn servers(&self) -> Vec<ContentServer> {
        self.servers.read().clone()
    }

    fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    fn pick_server(&self) -> Result<ContentServer> {
        let servers = self.servers.read();
        if servers.is_empty() {
            return Err(Error::NoServers);
        }
        let idx = self.next_server.fetch_add(1, Ordering::Relaxed) % servers.len();
        Ok(servers[idx].clone())
    }

    /// URL for one content chunk.
    pub fn chunk_url(host: &str, depot_id: u32, chunk_hex: &str) -> String {
        format!("http://{host}/depot/{depot_id}/chunk/{chunk_hex}")
    }

    /// URL for a depot manifest, optionally carrying a request code.
    pub fn manifest_url(host: &str, depot_id: u32, gid: u64, request_code: Option<u64>) -> String {
        match request_code {
            Some(code) => format!(
                "http://{host}/depot/{depot_id}/manifest/{gid}/{MANIFEST_PROTOCOL_VERSION}/{code}"
            ),
            None => {
                format!("http://{host}/depot/{depot_id}/manifest/{gid}/{MANIFEST_PROTOCOL_VERSION}")
            }
        }
    }

    /// Fetch one compressed chunk by its content id.
    pub async fn fetch_chunk(&self, depot_id: u32, chunk_sha: &[u8; 20]) -> Result<Vec<u8>> {
        let chunk_hex = hex::encode(chunk_sha);
        self.fetch_rotating(&format!("depot {depot_id} chunk {chunk_hex}"), |host| {
            Self::chunk_url(host, depot_id, &chunk_hex)
        })
        .await
    }

    /// Fetch the serialized manifest bytes for one (depot, gid) pair.
    pub async fn fetch_manifest(
        &self,
        depot_id: u32,
        gid: u64,
        request_code: Option<u64>,
    ) -> Result<Vec<u8>> {
        self.fetch_rotating(&format!("depot {depot_id} manifest {gid}"), |host| {
            Self::manifest_url(host, depot_id, gid, request_code)
        })
        .await
    }

    /// Fetch many chunks with bounded parallelism, preserving input order.
    ///
    /// Each chunk's outcome is independent; one failure does not abort the
    /// others.
    pub async fn fetch_chunks_parallel(
        &self,
        depot_id: u32,
        chunk_shas: &[[u8; 20]],
        concurrency: usize,
    ) -> Vec<Result<Vec<u8>>> {
        use futures_util::StreamExt as _;

        futures_util::stream::iter(chunk_shas)
            .map(|sha| self.fetch_chunk(depot_id, sha))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Try each configured server in rotation until one serves the resource.
    async fn fetch_rotating(
        &self,
        resource: &str,
        make_url: impl Fn(&str) -> String,
    ) -> Result<Vec<u8>> {
        let attempts = self.server_count();
        if attempts == 0 {
            return Err(Error::NoServers);
        }

        for _ in 0..attempts {
            let server = self.pick_server()?;
            let url = make_url(server.url_host());

            match self.execute_with_retry(&url).await {
                Ok(response) => {
                    let data = response.bytes().await?;
                    if data.is_empty() {
                        warn!("Empty response for {resource} from {}", server.url_host());
                        continue;
                    }
                    return Ok(data.to_vec());
                }
                // Authoritative answers are not worth asking another edge
                Err(e @ (Error::NotFound { .. } | Error::AccessDenied { .. })) => return Err(e),
                Err(e) => {
                    warn!(
                        "Content server {} failed for {resource}: {e}",
                        server.url_host()
                    );
                }
            }
        }

        Err(Error::servers_exhausted(resource))
    }

    /// Calculate backoff duration with exponential backoff and jitter.
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_backoff = base_backoff.min(self.max_backoff_ms as f64);

        // Add jitter
        let jitter_range = capped_backoff * self.jitter_factor;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let final_backoff = (capped_backoff + jitter).max(0.0) as u64;

        Duration::from_millis(final_backoff)
    }

    /// Execute a request with retry logic against one host.
    async fn execute_with_retry(&self, url: &str) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                debug!("Edge retry attempt {} after {:?} backoff", attempt, backoff);
                sleep(backoff).await;
            }

            debug!("Edge request to {} (attempt {})", url, attempt + 1);

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    trace!("Response status: {status}");

                    if status.is_success() {
                        return Ok(response);
                    }

                    // Check for rate limiting
                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(60);

                        warn!(
                            "Rate limited (attempt {}): retry after {} seconds",
                            attempt + 1,
                            retry_after
                        );
                        last_error = Some(Error::rate_limited(retry_after));
                        continue;
                    }

                    // Server errors - retry
                    if status.is_server_error() && attempt < self.max_retries {
                        warn!("Server error {} (attempt {}): will retry", status, attempt + 1);
                        last_error = Some(Error::invalid_response(format!("status {status}")));
                        continue;
                    }

                    // Authoritative client errors - don't retry
                    if status == StatusCode::NOT_FOUND {
                        return Err(Error::not_found(url));
                    }
                    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
                        return Err(Error::access_denied(url));
                    }

                    return Err(Error::invalid_response(format!("status {status}")));
                }
                Err(e) => {
                    let is_retryable = e.is_connect() || e.is_timeout() || e.is_request();

                    if is_retryable && attempt < self.max_retries {
                        warn!("Request failed (attempt {}): {}, will retry", attempt + 1, e);
                        last_error = Some(if e.is_timeout() {
                            Error::timeout(url)
                        } else {
                            Error::Http(e)
                        });
                    } else if e.is_timeout() {
                        return Err(Error::timeout(url));
                    } else {
                        return Err(Error::Http(e));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::invalid_response("all retry attempts failed")))
    }
}

/// Builder for configuring a [`CdnClient`].
#[derive(Debug, Clone)]
pub struct CdnClientBuilder {
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
    pool_max_idle_per_host: usize,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl CdnClientBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            pool_max_idle_per_host: 20,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set maximum idle connections per host
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set maximum retries per host
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial backoff in milliseconds
    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set maximum backoff in milliseconds
    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Build the edge client.
    pub fn build(self) -> Result<CdnClient> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .gzip(true)
            .deflate(true)
            .build()?;

        Ok(CdnClient {
            client,
            servers: RwLock::new(Vec::new()),
            next_server: AtomicUsize::new(0),
            max_retries: self.max_retries,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
        })
    }
}

impl Default for CdnClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> ContentServer {
        ContentServer {
            server_type: "CDN".into(),
            host: host.into(),
            vhost: None,
            weighted_load: 0,
            https: false,
        }
    }

    #[test]
    fn test_client_defaults() {
        let client = CdnClient::new().unwrap();
        assert_eq!(client.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!client.has_servers());
    }

    #[test]
    fn test_chunk_url() {
        let url = CdnClient::chunk_url("edge1.example.com", 570, "ab12cd34");
        assert_eq!(url, "http://edge1.example.com/depot/570/chunk/ab12cd34");
    }

    #[test]
    fn test_manifest_url() {
        assert_eq!(
            CdnClient::manifest_url("e.example.com", 570, 7280959080077824592, None),
            "http://e.example.com/depot/570/manifest/7280959080077824592/5"
        );
        assert_eq!(
            CdnClient::manifest_url("e.example.com", 570, 42, Some(99)),
            "http://e.example.com/depot/570/manifest/42/5/99"
        );
    }

    #[test]
    fn test_server_rotation() {
        let client = CdnClient::new().unwrap();
        client.set_servers(vec![server("a"), server("b")]);

        assert_eq!(client.pick_server().unwrap().host, "a");
        assert_eq!(client.pick_server().unwrap().host, "b");
        assert_eq!(client.pick_server().unwrap().host, "a");
    }

    #[test]
    fn test_pick_server_without_servers() {
        let client = CdnClient::new().unwrap();
        assert!(matches!(client.pick_server(), Err(Error::NoServers)));
    }

    #[test]
    fn test_backoff_calculation() {
        let client = CdnClient::builder()
            .initial_backoff_ms(100)
            .max_backoff_ms(1000)
            .backoff_multiplier(2.0)
            .jitter_factor(0.0)
            .build()
            .unwrap();

        assert_eq!(client.calculate_backoff(0).as_millis(), 100);
        assert_eq!(client.calculate_backoff(1).as_millis(), 200);
        assert_eq!(client.calculate_backoff(2).as_millis(), 400);
        // Capped at the configured maximum
        assert_eq!(client.calculate_backoff(5).as_millis(), 1000);
    }

    #[test]
    fn test_jitter_factor_clamping() {
        let builder = CdnClient::builder().jitter_factor(1.5);
        assert!((builder.jitter_factor - 1.0).abs() < f64::EPSILON);

        let builder = CdnClient::builder().jitter_factor(-0.5);
        assert!((builder.jitter_factor - 0.0).abs() < f64::EPSILON);
    }
}

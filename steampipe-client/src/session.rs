//! Session boundary.
//!
//! Authentication and the backing wire protocol live outside this crate.
//! The client only needs the four remote calls below; anything that can
//! answer them (a logged-in connection, a fixture, a replay file) can drive
//! the caching client.

use std::collections::HashMap;

use steampipe_manifest::DepotKey;

use crate::{Error, Result};

/// Result of a change-list query.
#[derive(Debug, Clone, Default)]
pub struct ChangeList {
    /// Server's current change number
    pub current_change_number: u32,
    /// When set, per-app diffing is impossible; all cached app info is stale
    pub force_full_update: bool,
    /// Apps that changed since the queried change number
    pub changed_apps: Vec<u32>,
}

/// One app's product info as served by the session.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    /// Change number this record was produced at
    pub change_number: u32,
    /// Raw product info document (depots, branches, config)
    pub info: serde_json::Value,
}

/// Remote calls the caching client needs from an authenticated session.
pub trait Session: Send + Sync {
    /// Changes since `change_number`, scoped to the given apps.
    fn get_changes_since(
        &self,
        change_number: u32,
        app_ids: &[u32],
    ) -> impl Future<Output = Result<ChangeList>> + Send;

    /// Product info documents for the given apps.
    fn get_product_info(
        &self,
        app_ids: &[u32],
    ) -> impl Future<Output = Result<HashMap<u32, ProductInfo>>> + Send;

    /// Decryption key for one depot.
    fn get_depot_key(
        &self,
        app_id: u32,
        depot_id: u32,
    ) -> impl Future<Output = Result<DepotKey>> + Send;

    /// Per-request authorization code required to fetch a manifest.
    fn get_manifest_request_code(
        &self,
        app_id: u32,
        depot_id: u32,
        gid: u64,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// Session stand-in for offline operation.
///
/// Every call fails with access denied, so cache-only workflows (cached
/// manifests, `--file` manifests) work while anything needing the remote
/// service reports a clear error.
pub struct NoSession;

impl Session for NoSession {
    async fn get_changes_since(&self, _change_number: u32, _app_ids: &[u32]) -> Result<ChangeList> {
        Err(Error::access_denied("change list (not logged in)"))
    }

    async fn get_product_info(&self, _app_ids: &[u32]) -> Result<HashMap<u32, ProductInfo>> {
        Err(Error::access_denied("product info (not logged in)"))
    }

    async fn get_depot_key(&self, _app_id: u32, depot_id: u32) -> Result<DepotKey> {
        Err(Error::access_denied(format!(
            "depot key for {depot_id} (not logged in)"
        )))
    }

    async fn get_manifest_request_code(
        &self,
        _app_id: u32,
        depot_id: u32,
        gid: u64,
    ) -> Result<u64> {
        Err(Error::access_denied(format!(
            "manifest request code for {depot_id}/{gid} (not logged in)"
        )))
    }
}

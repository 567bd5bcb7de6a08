//! Caching SteamPipe depot client.
//!
//! Composes the manifest model, edge client, and on-disk caches into the
//! workflows a depot consumer needs:
//! - [`CachingClient`]: cache-first manifests, depot keys, product info,
//!   and content-server discovery over an injected [`Session`]
//! - [`download`]: chunked, verified, resumable file downloads
//! - [`DownloadPool`]: bounded-concurrency scheduling with join-all
//!   semantics and shared progress counters
//! - [`ManifestFileIndex`]: path lookups across manifests, including
//!   members of embedded `.vpk` containers streamed from the edge

pub mod caching_client;
pub mod download;
pub mod error;
pub mod index;
pub mod progress;
pub mod scheduler;
pub mod session;

pub use caching_client::CachingClient;
pub use download::{ChunkSource, download_file, sanitize_relative_path};
pub use error::{Error, Result};
pub use index::{LoadedManifest, ManifestFileIndex, RemoteReader, is_package_container};
pub use progress::{NoopProgress, ProgressCounters, ProgressReporter};
pub use scheduler::{DEFAULT_POOL_WIDTH, DownloadPool};
pub use session::{ChangeList, NoSession, ProductInfo, Session};

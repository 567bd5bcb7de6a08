//! Depot manifest handling for the SteamPipe content system.
//!
//! A manifest describes one depot's file tree at a point in time: per-file
//! metadata plus the ordered, content-addressed chunk list each file is
//! reconstructed from. This crate covers the binary wire format, in-place
//! filename decryption, and the embedded package (`.vpk`) directory format.

pub mod crypto;
mod error;
pub mod manifest;
pub mod package;

pub use crypto::DepotKey;
pub use error::{Error, Result};
pub use manifest::{
    ChunkData, DepotManifest, EMPTY_FILE_SHA, FileFlags, FileMapping, ManifestMetadata,
};
pub use package::{PackageEntry, PackageIndex};

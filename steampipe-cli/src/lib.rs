//! SteamPipe depot tool library
//!
//! This library provides the command definitions and handlers for the
//! `steampipe` CLI binary.

pub mod commands;

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Where to get manifests from: the network (app/depot/manifest triple,
/// or app info + branch) or local manifest files.
#[derive(Args, Clone, Debug)]
pub struct ManifestSelector {
    /// App id
    #[arg(long)]
    pub app: Option<u32>,

    /// Depot id (omit to use every depot listed in app info)
    #[arg(long)]
    pub depot: Option<u32>,

    /// Manifest gid (omit to resolve from app info and branch)
    #[arg(long)]
    pub manifest: Option<u64>,

    /// Load manifests from local files, bypassing session and edge
    #[arg(long)]
    pub file: Vec<PathBuf>,

    /// Branch to resolve manifest gids from
    #[arg(long, default_value = "public")]
    pub branch: String,

    /// Only include depots matching this OS tag (e.g. windows64, linux)
    #[arg(long)]
    pub os: Option<String>,
}

/// Path filters shared by list/download.
#[derive(Args, Clone, Debug)]
pub struct PathFilter {
    /// Only paths matching this glob (e.g. "*.dll")
    #[arg(short, long)]
    pub name: Option<String>,

    /// Only paths matching this regular expression
    #[arg(short, long)]
    pub regex: Option<String>,

    /// Also index and include embedded .vpk package members
    #[arg(long)]
    pub vpk: bool,
}

#[derive(Subcommand, Debug)]
pub enum DepotCommands {
    /// Show manifest metadata and depot/branch info
    Info {
        #[command(flatten)]
        selector: ManifestSelector,
    },

    /// List files across the selected manifests
    List {
        #[command(flatten)]
        selector: ManifestSelector,

        #[command(flatten)]
        filter: PathFilter,

        /// Show size and content digest per file
        #[arg(short, long)]
        long: bool,
    },

    /// Download files from the selected manifests
    Download {
        #[command(flatten)]
        selector: ManifestSelector,

        #[command(flatten)]
        filter: PathFilter,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Put every file in the output directory root
        #[arg(long)]
        no_directories: bool,

        /// Do not verify existing files chunk by chunk before fetching
        #[arg(long)]
        skip_verify: bool,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,

        /// Concurrent download tasks
        #[arg(long, default_value_t = steampipe_client::DEFAULT_POOL_WIDTH)]
        workers: usize,
    },

    /// Compare a local directory against the selected manifests
    Diff {
        #[command(flatten)]
        selector: ManifestSelector,

        /// Directory to compare
        target: PathBuf,

        /// Also report local files not present in any manifest
        #[arg(long)]
        show_extra: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Remove cached manifests, app info, server lists, and depot keys
    Clean,

    /// Show or set the remembered username
    Lastuser {
        /// New username to remember (omit to print the current one)
        username: Option<String>,
    },
}

//! Depot inspection, listing, download, and diff.

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use walkdir::WalkDir;

use steampipe_cdn::CdnClient;
use steampipe_client::download::{
    download_file, expected_file_digest, local_file_digest, sanitize_relative_path,
};
use steampipe_client::{
    CachingClient, DownloadPool, Error as ClientError, LoadedManifest, ManifestFileIndex,
    NoSession, ProgressCounters, ProgressReporter,
};
use steampipe_manifest::DepotManifest;

use crate::{DepotCommands, ManifestSelector, PathFilter};

pub async fn handle(cmd: DepotCommands, cell_id: u32) -> Result<()> {
    let client = CachingClient::new(NoSession, cell_id).await?;

    let result = match cmd {
        DepotCommands::Info { selector } => info(&client, &selector).await,
        DepotCommands::List {
            selector,
            filter,
            long,
        } => list(&client, &selector, &filter, long).await,
        DepotCommands::Download {
            selector,
            filter,
            output,
            no_directories,
            skip_verify,
            no_progress,
            workers,
        } => {
            download(
                &client,
                &selector,
                &filter,
                &output,
                no_directories,
                !skip_verify,
                no_progress,
                workers,
            )
            .await
        }
        DepotCommands::Diff {
            selector,
            target,
            show_extra,
        } => diff(&client, &selector, &target, show_extra).await,
    };

    client.save_cache().await?;
    result
}

/// Translate a shell-style glob into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).context("invalid --name glob")
}

fn build_filter(filter: &PathFilter) -> Result<Option<Regex>> {
    match (&filter.name, &filter.regex) {
        (Some(_), Some(_)) => bail!("--name and --regex are mutually exclusive"),
        (Some(glob), None) => Ok(Some(glob_to_regex(glob)?)),
        (None, Some(re)) => Ok(Some(Regex::new(re).context("invalid --regex")?)),
        (None, None) => Ok(None),
    }
}

/// Fast skip for member filters: a glob like `pak01_dir.vpk:*.wav` names its
/// container before the colon, so only matching containers get scanned.
fn container_prefix_filter(filter: &PathFilter) -> Result<Option<Regex>> {
    let Some(glob) = &filter.name else {
        return Ok(None);
    };
    match glob.split_once(':') {
        Some((prefix, _)) if !prefix.is_empty() => Ok(Some(glob_to_regex(prefix)?)),
        _ => Ok(None),
    }
}

/// Pull the `(depot, gid)` pairs out of a product-info document.
///
/// Depot entries may carry an `oslist` config tag and either a bare gid
/// string or a `{"gid": ...}` object per branch. Depots borrowed from other
/// apps (`depotfromapp`) are skipped.
fn depots_from_app_info(
    info: &serde_json::Value,
    branch: &str,
    os: Option<&str>,
    only_depot: Option<u32>,
) -> Vec<(u32, u64)> {
    let Some(depots) = info.get("depots").and_then(|d| d.as_object()) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    for (key, entry) in depots {
        let Ok(depot_id) = key.parse::<u32>() else {
            continue;
        };
        if let Some(only) = only_depot
            && depot_id != only
        {
            continue;
        }
        if entry.get("depotfromapp").is_some() {
            continue;
        }
        if let Some(os) = os {
            let oslist = entry
                .pointer("/config/oslist")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !oslist.is_empty() && !oslist.split(',').any(|tag| tag.trim() == os) {
                continue;
            }
        }

        let Some(raw_gid) = entry.pointer(&format!("/manifests/{branch}")) else {
            continue;
        };
        let gid = match raw_gid {
            serde_json::Value::String(s) => s.parse::<u64>().ok(),
            serde_json::Value::Object(o) => o
                .get("gid")
                .and_then(|g| g.as_str())
                .and_then(|s| s.parse::<u64>().ok()),
            _ => None,
        };
        if let Some(gid) = gid {
            result.push((depot_id, gid));
        }
    }
    result.sort_unstable();
    result
}

/// Fetch a manifest, falling back to the raw (undecrypted) form when no
/// depot key can be obtained.
async fn get_manifest_lenient(
    client: &CachingClient<NoSession>,
    app_id: u32,
    depot_id: u32,
    gid: u64,
) -> Result<DepotManifest> {
    match client.get_manifest(app_id, depot_id, gid, true).await {
        Ok(manifest) => Ok(manifest),
        Err(ClientError::AccessDenied { .. }) => {
            warn!("No depot key available for {depot_id}; filenames may stay encrypted");
            Ok(client.get_manifest(app_id, depot_id, gid, false).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolve the selector into loaded manifests.
async fn load_manifests(
    client: &CachingClient<NoSession>,
    selector: &ManifestSelector,
) -> Result<Vec<LoadedManifest>> {
    let mut manifests = Vec::new();

    for path in &selector.file {
        let manifest = CachingClient::<NoSession>::load_manifest_file(path)
            .await
            .with_context(|| format!("loading manifest from {}", path.display()))?;
        manifests.push(LoadedManifest {
            app_id: manifest.metadata.app_id,
            manifest,
        });
    }

    if let Some(app_id) = selector.app {
        let pairs = match (selector.depot, selector.manifest) {
            (Some(depot_id), Some(gid)) => vec![(depot_id, gid)],
            _ => {
                let infos = client.get_product_info(&[app_id]).await?;
                let info = infos
                    .get(&app_id)
                    .with_context(|| format!("no product info for app {app_id}"))?;
                let pairs = depots_from_app_info(
                    &info.info,
                    &selector.branch,
                    selector.os.as_deref(),
                    selector.depot,
                );
                if pairs.is_empty() {
                    bail!(
                        "no depots resolved for app {app_id} branch {:?}",
                        selector.branch
                    );
                }
                pairs
            }
        };

        for (depot_id, gid) in pairs {
            manifests.push(LoadedManifest {
                app_id,
                manifest: get_manifest_lenient(client, app_id, depot_id, gid).await?,
            });
        }
    }

    if manifests.is_empty() {
        bail!("nothing selected: pass --app (with --depot/--manifest) or --file");
    }
    Ok(manifests)
}

async fn info(client: &CachingClient<NoSession>, selector: &ManifestSelector) -> Result<()> {
    let manifests = load_manifests(client, selector).await?;

    for loaded in &manifests {
        let meta = &loaded.manifest.metadata;
        let total_chunks = loaded.manifest.total_chunks();
        println!("App:                {}", meta.app_id);
        println!("Depot:              {}", meta.depot_id);
        println!("Manifest gid:       {}", meta.gid);
        println!("Created:            {}", meta.creation_time);
        println!("Size on disk:       {} bytes", meta.cb_disk_original);
        println!("Size compressed:    {} bytes", meta.cb_disk_compressed);
        println!(
            "Chunks:             {} unique / {} total",
            meta.unique_chunks, total_chunks
        );
        println!("Files:              {}", loaded.manifest.files.len());
        println!("Encrypted names:    {}", meta.filenames_encrypted);
        println!();
    }

    if let Some(app_id) = selector.app
        && selector.manifest.is_none()
        && let Ok(infos) = client.get_product_info(&[app_id]).await
        && let Some(info) = infos.get(&app_id)
        && let Some(branches) = info.info.pointer("/depots/branches").and_then(|b| b.as_object())
    {
        println!("Branches:");
        for (name, branch) in branches {
            let build = branch
                .get("buildid")
                .and_then(|b| b.as_str())
                .unwrap_or("?");
            println!("  {name} (build {build})");
        }
    }

    Ok(())
}

async fn list(
    client: &CachingClient<NoSession>,
    selector: &ManifestSelector,
    filter: &PathFilter,
    long: bool,
) -> Result<()> {
    let manifests = load_manifests(client, selector).await?;
    let pattern = build_filter(filter)?;

    let mut index = ManifestFileIndex::new(manifests);
    index.index(pattern.as_ref()).map_err(|e| match e {
        ClientError::FilenamesEncrypted { depot_id } => anyhow::anyhow!(
            "depot {depot_id} has encrypted filenames and no key is cached; \
             cannot list or filter paths"
        ),
        other => other.into(),
    })?;

    if filter.vpk {
        client.content_servers().await?;
        let container_filter = container_prefix_filter(filter)?;
        index
            .index_packages(client.cdn(), container_filter.as_ref())
            .await?;
    }

    // Member paths were not subject to the index filter; match them here
    // against the complete container:inner form
    let mut paths: Vec<String> = index
        .paths()
        .chain(
            index
                .member_paths()
                .filter(|m| pattern.as_ref().is_none_or(|p| p.is_match(m))),
        )
        .map(str::to_string)
        .collect();
    paths.sort_unstable();

    for path in &paths {
        if long {
            let size = index.size_of(path).unwrap_or(0);
            match index.lookup(path) {
                Some((_, file)) => {
                    println!("{:>14}  {}  {}", size, hex::encode(expected_file_digest(file)), path);
                }
                None => println!("{size:>14}  {:40}  {path}", "-"),
            }
        } else {
            println!("{path}");
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn download(
    client: &CachingClient<NoSession>,
    selector: &ManifestSelector,
    filter: &PathFilter,
    output: &Path,
    no_directories: bool,
    verify: bool,
    no_progress: bool,
    workers: usize,
) -> Result<()> {
    let manifests = load_manifests(client, selector).await?;
    let pattern = build_filter(filter)?;

    // Downloads always need edge servers; member indexing does too
    let servers = client.content_servers().await?;
    let cdn = Arc::new(CdnClient::new()?);
    cdn.set_servers(servers);

    // Pre-pass: what gets downloaded, and how much
    let mut planned: Vec<(u32, steampipe_manifest::FileMapping, PathBuf)> = Vec::new();
    for loaded in &manifests {
        let depot_id = loaded.manifest.metadata.depot_id;
        for file in loaded.manifest.iter_files()? {
            if let Some(pattern) = &pattern
                && !pattern.is_match(&file.filename)
            {
                continue;
            }
            let relative = sanitize_relative_path(&file.filename)?;
            let dest = if no_directories {
                match relative.file_name() {
                    Some(name) => output.join(name),
                    None => continue,
                }
            } else {
                output.join(relative)
            };
            planned.push((depot_id, file.clone(), dest));
        }
    }

    let mut member_tasks: Vec<(String, PathBuf)> = Vec::new();
    let mut index_arc = None;
    if filter.vpk {
        let mut index = ManifestFileIndex::new(manifests);
        index.index(None)?;
        let container_filter = container_prefix_filter(filter)?;
        index
            .index_packages(cdn.as_ref(), container_filter.as_ref())
            .await?;
        for member in index.member_paths() {
            // Filters match the complete container:inner form
            if let Some(pattern) = &pattern
                && !pattern.is_match(member)
            {
                continue;
            }
            let inner = member.split_once(':').map_or(member, |(_, inner)| inner);
            let relative = sanitize_relative_path(inner)?;
            let dest = if no_directories {
                match relative.file_name() {
                    Some(name) => output.join(name),
                    None => continue,
                }
            } else {
                output.join(relative)
            };
            member_tasks.push((member.to_string(), dest));
        }
        index_arc = Some(Arc::new(index));
    }

    let total_bytes: u64 = planned.iter().map(|(_, file, _)| file.size).sum();
    let total_files = planned.len() + member_tasks.len();
    if total_files == 0 {
        println!("Nothing to download");
        return Ok(());
    }
    println!("Downloading {total_files} files ({total_bytes} bytes) to {}", output.display());

    let pool = DownloadPool::with_width(workers);
    let counters = pool.counters();

    let reporter = if no_progress {
        None
    } else {
        Some(spawn_progress_bar(total_bytes, counters.clone()))
    };

    let ctrlc_counters = counters.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight chunks");
            ctrlc_counters.cancel();
        }
    });

    let mut labels: Vec<String> = Vec::new();
    let mut tasks: Vec<std::pin::Pin<Box<dyn Future<Output = steampipe_client::Result<()>> + Send>>> =
        Vec::new();

    for (depot_id, file, dest) in planned {
        labels.push(file.filename.clone());
        let cdn = Arc::clone(&cdn);
        let counters = counters.clone();
        tasks.push(Box::pin(async move {
            download_file(cdn.as_ref(), depot_id, &file, &dest, verify, &counters).await
        }));
    }

    if let Some(index_arc) = &index_arc {
        for (member, dest) in member_tasks {
            labels.push(member.clone());
            let cdn = Arc::clone(&cdn);
            let counters = counters.clone();
            let index = Arc::clone(index_arc);
            tasks.push(Box::pin(async move {
                let data = index.read_file(cdn.as_ref(), &member).await?;
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&dest, data).await?;
                counters.file_completed();
                Ok(())
            }));
        }
    }

    let results = pool.run(tasks).await;

    if let Some((bar, handle)) = reporter {
        handle.abort();
        bar.set_position(counters.bytes());
        bar.finish();
    }

    let mut failures = 0usize;
    for (label, result) in labels.iter().zip(&results) {
        if let Err(e) = result {
            failures += 1;
            eprintln!("FAILED {label}: {e}");
        }
    }

    println!(
        "Done: {} ok, {failures} failed, {} bytes",
        results.len() - failures,
        counters.bytes()
    );
    if failures > 0 {
        bail!("{failures} of {} downloads failed", results.len());
    }
    Ok(())
}

fn spawn_progress_bar(
    total_bytes: u64,
    counters: ProgressCounters,
) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let poll_bar = bar.clone();
    let handle = tokio::spawn(async move {
        // Time-sliced refresh instead of per-chunk redraw
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tick.tick().await;
            poll_bar.set_position(counters.bytes());
            poll_bar.set_message(format!("{} files", counters.files()));
        }
    });
    (bar, handle)
}

async fn diff(
    client: &CachingClient<NoSession>,
    selector: &ManifestSelector,
    target: &Path,
    show_extra: bool,
) -> Result<()> {
    let manifests = load_manifests(client, selector).await?;

    let mut known: HashSet<PathBuf> = HashSet::new();
    let mut missing = 0usize;
    let mut modified = 0usize;
    let mut matching = 0usize;

    for loaded in &manifests {
        for file in loaded.manifest.iter_files()? {
            let relative = sanitize_relative_path(&file.filename)?;
            let local = target.join(&relative);
            known.insert(relative.clone());

            let Ok(meta) = tokio::fs::metadata(&local).await else {
                println!("missing   {}", relative.display());
                missing += 1;
                continue;
            };
            if meta.len() != file.size {
                println!("modified  {} (size {} != {})", relative.display(), meta.len(), file.size);
                modified += 1;
                continue;
            }
            let digest = local_file_digest(&local).await?;
            if digest != expected_file_digest(file) {
                println!("modified  {}", relative.display());
                modified += 1;
            } else {
                matching += 1;
            }
        }
    }

    let mut extra = 0usize;
    if show_extra {
        for entry in WalkDir::new(target).into_iter().filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(target) else {
                continue;
            };
            if !known.contains(relative) {
                println!("extra     {}", relative.display());
                extra += 1;
            }
        }
    }

    println!(
        "{matching} unchanged, {modified} modified, {missing} missing{}",
        if show_extra {
            format!(", {extra} extra")
        } else {
            String::new()
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("*.dll").unwrap();
        assert!(re.is_match("bin/game.dll".rsplit('/').next().unwrap()));
        assert!(re.is_match("game.dll"));
        assert!(!re.is_match("game.dll.bak"));

        let re = glob_to_regex("game/?at.txt").unwrap();
        assert!(re.is_match("game/cat.txt"));
        assert!(!re.is_match("game/chat.txt"));
    }

    #[test]
    fn test_depots_from_app_info() {
        let info = serde_json::json!({
            "depots": {
                "571": {
                    "config": {"oslist": "windows"},
                    "manifests": {"public": "111"}
                },
                "572": {
                    "config": {"oslist": "linux,macos"},
                    "manifests": {"public": {"gid": "222"}}
                },
                "573": {
                    "depotfromapp": "570",
                    "manifests": {"public": "333"}
                },
                "branches": {"public": {"buildid": "100"}}
            }
        });

        let all = depots_from_app_info(&info, "public", None, None);
        assert_eq!(all, vec![(571, 111), (572, 222)]);

        let linux = depots_from_app_info(&info, "public", Some("linux"), None);
        assert_eq!(linux, vec![(572, 222)]);

        let one = depots_from_app_info(&info, "public", None, Some(571));
        assert_eq!(one, vec![(571, 111)]);

        assert!(depots_from_app_info(&info, "beta", None, None).is_empty());
    }

    #[test]
    fn test_member_paths_match_name_globs() {
        let re = glob_to_regex("*.wav").unwrap();
        assert!(re.is_match("game/pak01_dir.vpk:sounds/hit.wav"));

        let scoped = glob_to_regex("game/pak01_dir.vpk:*.wav").unwrap();
        assert!(scoped.is_match("game/pak01_dir.vpk:sounds/hit.wav"));
        assert!(!scoped.is_match("game/pak02_dir.vpk:sounds/hit.wav"));
    }

    #[test]
    fn test_container_prefix_filter() {
        let scoped = PathFilter {
            name: Some("game/pak01_dir.vpk:*.wav".into()),
            regex: None,
            vpk: true,
        };
        let re = container_prefix_filter(&scoped).unwrap().unwrap();
        assert!(re.is_match("game/pak01_dir.vpk"));
        assert!(!re.is_match("game/pak02_dir.vpk"));

        let plain = PathFilter {
            name: Some("*.wav".into()),
            regex: None,
            vpk: true,
        };
        assert!(container_prefix_filter(&plain).unwrap().is_none());

        let by_regex = PathFilter {
            name: None,
            regex: Some(r"\.wav$".into()),
            vpk: true,
        };
        assert!(container_prefix_filter(&by_regex).unwrap().is_none());
    }
}

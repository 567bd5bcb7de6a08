//! Chunked, verified, resumable file downloads.
//!
//! A file downloads as: pre-allocate to its exact size, then walk its chunk
//! list in manifest order. With verification on, each on-disk range is
//! hashed first and matching chunks are skipped (the byte counter still
//! advances); mismatched or missing chunks are fetched and written at their
//! offset. Partial files from an interrupted run resume the same way.

use sha1::{Digest, Sha1};
use std::io::{Cursor, Read, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use steampipe_manifest::{ChunkData, EMPTY_FILE_SHA, FileMapping};

use crate::progress::ProgressReporter;
use crate::{Error, Result};

/// Source of chunk bytes, abstracted for testing.
///
/// The production implementation is the edge client; tests substitute an
/// in-memory map.
pub trait ChunkSource: Send + Sync {
    /// Fetch one chunk's content bytes by id.
    fn fetch_chunk(
        &self,
        depot_id: u32,
        sha: &[u8; 20],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl ChunkSource for steampipe_cdn::CdnClient {
    async fn fetch_chunk(&self, depot_id: u32, sha: &[u8; 20]) -> Result<Vec<u8>> {
        Ok(steampipe_cdn::CdnClient::fetch_chunk(self, depot_id, sha).await?)
    }
}

/// Expected whole-file digest, honoring the empty-file convention.
///
/// Zero-length files carry the fixed all-zero digest, never the hash of an
/// empty byte string.
pub fn expected_file_digest(file: &FileMapping) -> [u8; 20] {
    if file.size == 0 {
        EMPTY_FILE_SHA
    } else {
        file.sha_content
    }
}

/// Compute the digest of a local file under the same convention.
pub async fn local_file_digest(path: &Path) -> Result<[u8; 20]> {
    let mut file = tokio::fs::File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(EMPTY_FILE_SHA);
    }

    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Validate a manifest-relative path and convert it to a safe local path.
///
/// Backslashes are treated as separators; absolute paths, drive prefixes,
/// and `..` components are rejected.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let candidate = Path::new(&normalized);

    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath { path: raw.into() });
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::UnsafePath { path: raw.into() });
    }
    Ok(out)
}

fn sha1_of(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Fetch a chunk and validate its content.
///
/// Payloads may arrive zlib-wrapped; size and digest are checked after
/// unwrapping. One re-fetch is attempted on digest mismatch before giving
/// up on the file.
pub(crate) async fn fetch_verified_chunk<S: ChunkSource>(
    source: &S,
    depot_id: u32,
    file_name: &str,
    chunk: &ChunkData,
) -> Result<Vec<u8>> {
    for attempt in 0..2 {
        let raw = source.fetch_chunk(depot_id, &chunk.sha).await?;
        let data = if raw.len() == chunk.cb_original as usize {
            raw
        } else {
            let mut decoded = Vec::with_capacity(chunk.cb_original as usize);
            let mut decoder = flate2::read::ZlibDecoder::new(Cursor::new(&raw));
            decoder.read_to_end(&mut decoded)?;
            decoded
        };

        if data.len() == chunk.cb_original as usize && sha1_of(&data) == chunk.sha {
            return Ok(data);
        }
        warn!(
            "Chunk {} of {file_name} failed digest check (attempt {})",
            hex::encode(chunk.sha),
            attempt + 1
        );
    }

    Err(Error::ChunkIntegrity {
        file: file_name.into(),
        chunk: hex::encode(chunk.sha),
    })
}

/// Download one manifest file entry to `dest`.
///
/// Directories are created, symlinks materialized where the platform
/// supports them. Regular files are pre-allocated then filled chunk by
/// chunk; with `verify` set, intact on-disk ranges are skipped. A fetch
/// failure aborts only this file.
pub async fn download_file<S, P>(
    source: &S,
    depot_id: u32,
    file: &FileMapping,
    dest: &Path,
    verify: bool,
    progress: &P,
) -> Result<()>
where
    S: ChunkSource,
    P: ProgressReporter + ?Sized,
{
    if file.is_directory() {
        tokio::fs::create_dir_all(dest).await?;
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if file.is_symlink() {
        materialize_symlink(file, dest).await?;
        progress.file_completed();
        return Ok(());
    }

    let existed = tokio::fs::metadata(dest).await.is_ok();
    let mut handle = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dest)
        .await?;

    // Exact-size pre-allocation; shortfall means the disk is full
    handle.set_len(file.size).await?;
    let actual = handle.metadata().await?.len();
    if actual != file.size {
        return Err(Error::AllocationFailed {
            path: dest.to_path_buf(),
            requested: file.size,
            actual,
        });
    }

    if file.size == 0 {
        progress.file_completed();
        return Ok(());
    }

    let verifying = verify && existed;
    trace!(
        "Downloading {} ({} bytes, {} chunks, verify={verifying})",
        file.filename,
        file.size,
        file.chunks.len()
    );

    for chunk in &file.chunks {
        if progress.is_cancelled() {
            debug!("Cancelled while downloading {}", file.filename);
            return Ok(());
        }

        if verifying {
            handle.seek(SeekFrom::Start(chunk.offset)).await?;
            let mut existing = vec![0u8; chunk.cb_original as usize];
            handle.read_exact(&mut existing).await?;
            if sha1_of(&existing) == chunk.sha {
                progress.update(u64::from(chunk.cb_original));
                continue;
            }
        }

        let data =
            fetch_verified_chunk(source, depot_id, &file.filename, chunk).await?;
        handle.seek(SeekFrom::Start(chunk.offset)).await?;
        handle.write_all(&data).await?;
        progress.update(u64::from(chunk.cb_original));
    }

    handle.flush().await?;
    progress.file_completed();
    Ok(())
}

#[cfg(unix)]
async fn materialize_symlink(file: &FileMapping, dest: &Path) -> Result<()> {
    let Some(target) = file.link_target.as_deref() else {
        warn!("Symlink entry {} has no target, skipping", file.filename);
        return Ok(());
    };
    let _ = tokio::fs::remove_file(dest).await;
    tokio::fs::symlink(target, dest).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn materialize_symlink(file: &FileMapping, _dest: &Path) -> Result<()> {
    warn!(
        "Skipping symlink entry {} (unsupported on this platform)",
        file.filename
    );
    Ok(())
}

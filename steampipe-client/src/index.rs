//! Path index over loaded manifests, with archive-within-archive support.
//!
//! `ManifestFileIndex` maps relative paths to their owning manifest entry
//! and can additionally index the members of embedded `.vpk` containers.
//! Container directory trees are streamed from the remote edge via ranged
//! chunk reads; the container body is never materialized locally. Index
//! building is explicit so that runs without member lookups stay off the
//! network.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

use steampipe_manifest::package::{PackageHeader, PackageIndex};
use steampipe_manifest::{DepotManifest, FileMapping, PackageEntry};

use crate::download::{ChunkSource, fetch_verified_chunk};
use crate::{Error, Result};

/// Numbered data-only sibling of a `_dir.vpk` container, e.g. `pak01_042.vpk`.
static NUMBERED_PART: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"_\d+\.vpk$").unwrap()
});

/// Whether a manifest path names a scannable package container.
///
/// `_dir.vpk` files always qualify; other `.vpk` files qualify unless they
/// are numbered data parts, which carry no directory tree of their own.
pub fn is_package_container(path: &str) -> bool {
    if !path.ends_with(".vpk") {
        return false;
    }
    path.ends_with("_dir.vpk") || !NUMBERED_PART.is_match(path)
}

/// One manifest loaded into the index, tagged with its owning app.
pub struct LoadedManifest {
    pub app_id: u32,
    pub manifest: DepotManifest,
}

struct PackageMember {
    /// File that holds the member body: the container itself for inline
    /// data, a numbered sibling otherwise
    body_file: String,
    /// Absolute offset of the body within `body_file`
    body_offset: u64,
    /// Body length, excluding preload
    body_length: u64,
    /// Preload bytes captured from the directory tree
    preload: Vec<u8>,
}

/// Lazy path index across a set of loaded manifests.
pub struct ManifestFileIndex {
    manifests: Vec<LoadedManifest>,
    files: HashMap<String, (usize, usize)>,
    members: HashMap<String, PackageMember>,
    indexed: bool,
}

impl ManifestFileIndex {
    pub fn new(manifests: Vec<LoadedManifest>) -> Self {
        Self {
            manifests,
            files: HashMap::new(),
            members: HashMap::new(),
            indexed: false,
        }
    }

    /// Build the path index, optionally restricted to paths matching
    /// `pattern`.
    ///
    /// Fails when any loaded manifest still has encrypted filenames; path
    /// lookups over ciphertext would silently match nothing.
    pub fn index(&mut self, pattern: Option<&Regex>) -> Result<()> {
        self.files.clear();

        for (mi, loaded) in self.manifests.iter().enumerate() {
            if loaded.manifest.filenames_encrypted() {
                return Err(Error::FilenamesEncrypted {
                    depot_id: loaded.manifest.metadata.depot_id,
                });
            }

            for (fi, file) in loaded.manifest.files.iter().enumerate() {
                if !file.is_file() {
                    continue;
                }
                if let Some(pattern) = pattern
                    && !pattern.is_match(&file.filename)
                {
                    continue;
                }
                self.files.insert(file.filename.clone(), (mi, fi));
            }
        }

        debug!("Indexed {} files from {} manifests", self.files.len(), self.manifests.len());
        self.indexed = true;
        Ok(())
    }

    /// Scan `.vpk` containers and add their members to the index.
    ///
    /// Candidates come straight from the loaded manifests, so a path filter
    /// applied to [`index`](Self::index) never hides a container from the
    /// scan; filters are meant to match against the resulting
    /// `container.vpk:inner/path` member keys. `container_filter`, when
    /// given, skips containers whose own path does not match it.
    ///
    /// Only the header and directory-tree region of each container is
    /// fetched.
    pub async fn index_packages<S: ChunkSource>(
        &mut self,
        source: &S,
        container_filter: Option<&Regex>,
    ) -> Result<()> {
        for container in self.container_candidates() {
            if let Some(filter) = container_filter
                && !filter.is_match(&container)
            {
                continue;
            }
            match self.scan_container(source, &container).await {
                Ok(count) => trace!("Indexed {count} members of {container}"),
                Err(e) => warn!("Skipping package {container}: {e}"),
            }
        }
        Ok(())
    }

    fn container_candidates(&self) -> Vec<String> {
        let mut out = Vec::new();
        for loaded in &self.manifests {
            for file in &loaded.manifest.files {
                if file.is_file() && is_package_container(&file.filename) {
                    out.push(file.filename.clone());
                }
            }
        }
        out
    }

    async fn scan_container<S: ChunkSource>(
        &mut self,
        source: &S,
        container: &str,
    ) -> Result<usize> {
        let (mi, fi) = self
            .find_anywhere(container)
            .ok_or_else(|| Error::FileNotIndexed {
                path: container.to_string(),
            })?;
        let loaded = &self.manifests[mi];
        let file = &loaded.manifest.files[fi];
        let depot_id = loaded.manifest.metadata.depot_id;

        let reader = RemoteReader {
            source,
            depot_id,
            file,
        };

        // Header first, to learn the tree extent, then exactly the tree
        let prefix_len = 28.min(file.size);
        let prefix = reader.read_range(0, prefix_len).await?;
        let header = PackageHeader::parse(&prefix)?;
        let index_bytes = reader.read_range(0, header.index_length() as u64).await?;
        let package = PackageIndex::parse(&index_bytes)?;

        let count = package.entries().len();
        let inline_base = package.inline_data_base();
        for entry in package.entries() {
            let member = self.resolve_member(container, inline_base, entry);
            self.members
                .insert(format!("{container}:{}", entry.path), member);
        }
        Ok(count)
    }

    fn resolve_member(
        &self,
        container: &str,
        inline_base: u64,
        entry: &PackageEntry,
    ) -> PackageMember {
        let (body_file, body_offset) = if entry.is_inline() {
            (container.to_string(), inline_base + u64::from(entry.entry_offset))
        } else {
            let sibling = container.replace(
                "_dir.vpk",
                &format!("_{:03}.vpk", entry.archive_index),
            );
            (sibling, u64::from(entry.entry_offset))
        };

        PackageMember {
            body_file,
            body_offset,
            body_length: u64::from(entry.entry_length),
            preload: entry.preload.clone(),
        }
    }

    /// Whether `path` names an indexed file or package member.
    pub fn file_exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.members.contains_key(path)
    }

    /// Look up a plain (non-member) indexed file.
    pub fn lookup(&self, path: &str) -> Option<(&LoadedManifest, &FileMapping)> {
        let &(mi, fi) = self.files.get(path)?;
        let loaded = &self.manifests[mi];
        Some((loaded, &loaded.manifest.files[fi]))
    }

    /// Indexed plain file paths, unordered.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Indexed package member paths (`container.vpk:inner`), unordered.
    pub fn member_paths(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Size of an indexed file or member in bytes.
    pub fn size_of(&self, path: &str) -> Option<u64> {
        if let Some((_, file)) = self.lookup(path) {
            return Some(file.size);
        }
        self.members
            .get(path)
            .map(|m| m.preload.len() as u64 + m.body_length)
    }

    /// Whether the path index has been built.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    fn find_anywhere(&self, path: &str) -> Option<(usize, usize)> {
        if let Some(&slot) = self.files.get(path) {
            return Some(slot);
        }
        // Data siblings are often excluded by the listing filter; fall back
        // to a full manifest scan
        for (mi, loaded) in self.manifests.iter().enumerate() {
            for (fi, file) in loaded.manifest.files.iter().enumerate() {
                if file.is_file() && file.filename == path {
                    return Some((mi, fi));
                }
            }
        }
        None
    }

    /// Read the full content of an indexed file or package member.
    pub async fn read_file<S: ChunkSource>(&self, source: &S, path: &str) -> Result<Vec<u8>> {
        if let Some(member) = self.members.get(path) {
            let (mi, fi) = self
                .find_anywhere(&member.body_file)
                .ok_or_else(|| Error::FileNotIndexed {
                    path: member.body_file.clone(),
                })?;
            let loaded = &self.manifests[mi];
            let reader = RemoteReader {
                source,
                depot_id: loaded.manifest.metadata.depot_id,
                file: &loaded.manifest.files[fi],
            };

            let mut data = member.preload.clone();
            if member.body_length > 0 {
                data.extend(reader.read_range(member.body_offset, member.body_length).await?);
            }
            return Ok(data);
        }

        let (loaded, file) = self
            .lookup(path)
            .ok_or_else(|| Error::FileNotIndexed { path: path.into() })?;
        let reader = RemoteReader {
            source,
            depot_id: loaded.manifest.metadata.depot_id,
            file,
        };
        reader.read_range(0, file.size).await
    }

    /// Streaming reader over an indexed plain file.
    pub fn open<'a, S: ChunkSource>(
        &'a self,
        source: &'a S,
        path: &str,
    ) -> Result<RemoteReader<'a, S>> {
        let (loaded, file) = self
            .lookup(path)
            .ok_or_else(|| Error::FileNotIndexed { path: path.into() })?;
        Ok(RemoteReader {
            source,
            depot_id: loaded.manifest.metadata.depot_id,
            file,
        })
    }
}

/// Ranged reader reconstructing file bytes from remote chunks.
///
/// Fetches only the chunks overlapping the requested range.
pub struct RemoteReader<'a, S: ChunkSource> {
    source: &'a S,
    depot_id: u32,
    file: &'a FileMapping,
}

impl<S: ChunkSource> RemoteReader<'_, S> {
    /// Total file size.
    pub fn size(&self) -> u64 {
        self.file.size
    }

    /// Read `len` bytes starting at `offset`, clamped to the file end.
    pub async fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = (offset + len).min(self.file.size);
        if offset >= end {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity((end - offset) as usize);
        for chunk in &self.file.chunks {
            let chunk_end = chunk.offset + u64::from(chunk.cb_original);
            if chunk_end <= offset {
                continue;
            }
            if chunk.offset >= end {
                break;
            }

            let data =
                fetch_verified_chunk(self.source, self.depot_id, &self.file.filename, chunk)
                    .await?;
            let from = offset.saturating_sub(chunk.offset) as usize;
            let to = (end.min(chunk_end) - chunk.offset) as usize;
            out.extend_from_slice(&data[from..to]);
        }
        Ok(out)
    }

    /// Read the whole file.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        self.read_range(0, self.file.size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use sha1::{Digest, Sha1};
    use std::sync::Mutex;
    use steampipe_manifest::{ChunkData, ManifestMetadata};

    struct MapSource {
        chunks: HashMap<[u8; 20], Vec<u8>>,
        log: Mutex<Vec<[u8; 20]>>,
    }

    impl MapSource {
        fn new() -> Self {
            Self {
                chunks: HashMap::new(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn add(&mut self, data: &[u8]) -> ChunkData {
            let sha: [u8; 20] = Sha1::digest(data).into();
            self.chunks.insert(sha, data.to_vec());
            ChunkData {
                sha,
                offset: 0,
                cb_original: data.len() as u32,
                cb_compressed: data.len() as u32,
            }
        }

        fn fetch_count(&self) -> usize {
            self.log.lock().unwrap().len()
        }
    }

    impl ChunkSource for MapSource {
        async fn fetch_chunk(&self, _depot_id: u32, sha: &[u8; 20]) -> Result<Vec<u8>> {
            self.log.lock().unwrap().push(*sha);
            self.chunks
                .get(sha)
                .cloned()
                .ok_or_else(|| Error::not_found(hex::encode(sha)))
        }
    }

    /// Split `content` into fixed-size chunks registered with the source.
    fn chunked_file(
        source: &mut MapSource,
        name: &str,
        content: &[u8],
        chunk_size: usize,
    ) -> FileMapping {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        for piece in content.chunks(chunk_size) {
            let mut chunk = source.add(piece);
            chunk.offset = offset;
            offset += piece.len() as u64;
            chunks.push(chunk);
        }
        FileMapping {
            filename: name.into(),
            flags: 0,
            size: content.len() as u64,
            sha_content: Sha1::digest(content).into(),
            link_target: None,
            chunks,
        }
    }

    fn manifest_of(files: Vec<FileMapping>) -> LoadedManifest {
        let total: u64 = files.iter().map(|f| f.size).sum();
        LoadedManifest {
            app_id: 570,
            manifest: DepotManifest {
                metadata: ManifestMetadata {
                    app_id: 570,
                    depot_id: 571,
                    gid: 99,
                    creation_time: 0,
                    cb_disk_original: total,
                    cb_disk_compressed: total,
                    unique_chunks: 0,
                    filenames_encrypted: false,
                },
                files,
            },
        }
    }

    fn encrypted_manifest() -> LoadedManifest {
        let mut loaded = manifest_of(vec![]);
        loaded.manifest.metadata.filenames_encrypted = true;
        loaded.manifest.files.push(FileMapping {
            filename: "b64garbage==".into(),
            flags: 0,
            size: 1,
            sha_content: [0u8; 20],
            link_target: None,
            chunks: vec![],
        });
        loaded
    }

    #[test]
    fn test_container_naming_rule() {
        assert!(is_package_container("pak01_dir.vpk"));
        assert!(is_package_container("single.vpk"));
        assert!(!is_package_container("pak01_003.vpk"));
        assert!(!is_package_container("file.txt"));
        // A numbered name that is still a _dir file stays scannable
        assert!(is_package_container("maps/pak01_dir.vpk"));
    }

    #[test]
    fn test_index_with_pattern() {
        let mut source = MapSource::new();
        let files = vec![
            chunked_file(&mut source, "game/bin/tool", b"tool", 8),
            chunked_file(&mut source, "game/readme.txt", b"hello", 8),
        ];
        let mut index = ManifestFileIndex::new(vec![manifest_of(files)]);

        index
            .index(Some(&Regex::new(r"\.txt$").unwrap()))
            .unwrap();
        assert!(index.file_exists("game/readme.txt"));
        assert!(!index.file_exists("game/bin/tool"));
        assert_eq!(index.size_of("game/readme.txt"), Some(5));
    }

    #[test]
    fn test_encrypted_manifest_refuses_indexing() {
        let mut index = ManifestFileIndex::new(vec![encrypted_manifest()]);
        let err = index.index(Some(&Regex::new("anything").unwrap())).unwrap_err();
        assert!(matches!(err, Error::FilenamesEncrypted { depot_id: 571 }));
    }

    #[tokio::test]
    async fn test_ranged_read_touches_only_needed_chunks() {
        let mut source = MapSource::new();
        let content: Vec<u8> = (0u8..=199).collect();
        let file = chunked_file(&mut source, "data.bin", &content, 50);
        let mut index = ManifestFileIndex::new(vec![manifest_of(vec![file])]);
        index.index(None).unwrap();

        let reader = index.open(&source, "data.bin").unwrap();
        assert_eq!(reader.size(), 200);

        // Bytes 60..80 live entirely in the second of four chunks
        let range = reader.read_range(60, 20).await.unwrap();
        assert_eq!(range, &content[60..80]);
        assert_eq!(source.fetch_count(), 1);

        let all = reader.read_all().await.unwrap();
        assert_eq!(all, content);
    }

    fn build_vpk() -> Vec<u8> {
        // v1 container with one inline member "sounds/hit.wav"
        let mut tree = Vec::new();
        let body = b"WAVDATA";
        for s in ["wav", "sounds", "hit"] {
            tree.extend_from_slice(s.as_bytes());
            tree.push(0);
        }
        tree.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        tree.write_u16::<LittleEndian>(3).unwrap(); // preload length
        tree.write_u16::<LittleEndian>(0x7fff).unwrap(); // inline
        tree.write_u32::<LittleEndian>(0).unwrap(); // offset past tree
        tree.write_u32::<LittleEndian>(body.len() as u32).unwrap();
        tree.write_u16::<LittleEndian>(0xffff).unwrap();
        tree.extend_from_slice(b"pre"); // preload bytes
        tree.push(0); // end of names
        tree.push(0); // end of dirs
        tree.push(0); // end of exts

        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(0x55aa1234).unwrap();
        data.write_u32::<LittleEndian>(1).unwrap();
        data.write_u32::<LittleEndian>(tree.len() as u32).unwrap();
        data.extend_from_slice(&tree);
        data.extend_from_slice(body);
        data
    }

    #[tokio::test]
    async fn test_package_members_are_indexed_and_readable() {
        let vpk = build_vpk();
        let mut source = MapSource::new();
        let file = chunked_file(&mut source, "game/pak01_dir.vpk", &vpk, 16);
        let mut index = ManifestFileIndex::new(vec![manifest_of(vec![file])]);
        index.index(None).unwrap();
        index.index_packages(&source, None).await.unwrap();

        let member = "game/pak01_dir.vpk:sounds/hit.wav";
        assert!(index.file_exists(member));
        assert_eq!(index.size_of(member), Some(10));

        let data = index.read_file(&source, member).await.unwrap();
        assert_eq!(data, b"preWAVDATA");
    }

    #[tokio::test]
    async fn test_member_filter_does_not_hide_containers_from_scan() {
        let vpk = build_vpk();
        let mut source = MapSource::new();
        let file = chunked_file(&mut source, "game/pak01_dir.vpk", &vpk, 16);
        let mut index = ManifestFileIndex::new(vec![manifest_of(vec![file])]);

        // A member-targeting filter excludes the container from the plain
        // path index, but the container must still be scanned
        index.index(Some(&Regex::new(r"\.wav$").unwrap())).unwrap();
        assert!(!index.file_exists("game/pak01_dir.vpk"));

        index.index_packages(&source, None).await.unwrap();
        let member = "game/pak01_dir.vpk:sounds/hit.wav";
        assert!(index.file_exists(member));
        assert_eq!(
            index.read_file(&source, member).await.unwrap(),
            b"preWAVDATA"
        );
    }

    #[tokio::test]
    async fn test_container_filter_skips_scanning() {
        let vpk = build_vpk();
        let mut source = MapSource::new();
        let file = chunked_file(&mut source, "game/pak01_dir.vpk", &vpk, 16);
        let mut index = ManifestFileIndex::new(vec![manifest_of(vec![file])]);
        index.index(None).unwrap();

        index
            .index_packages(&source, Some(&Regex::new(r"^maps/").unwrap()))
            .await
            .unwrap();
        assert_eq!(index.member_paths().count(), 0);
        assert_eq!(source.fetch_count(), 0);
    }
}

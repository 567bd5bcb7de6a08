//! Depot manifest binary format.
//!
//! A manifest serializes as a little-endian body, optionally wrapped in a
//! zlib frame:
//!
//! - body: magic `"SPMF"`, version, metadata, file mapping table with each
//!   file's ordered chunk list
//! - compressed wrapper: magic `"SPMZ"`, uncompressed length, zlib stream
//!
//! Chunk ids are the SHA-1 of the chunk's content bytes; the same chunk may
//! be referenced by several files within one depot (dedup).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Cursor, Read, Write};
use tracing::{debug, trace};

use crate::crypto::{self, DepotKey};
use crate::{Error, Result};

/// Magic bytes for an uncompressed manifest body: "SPMF"
const MANIFEST_MAGIC: [u8; 4] = *b"SPMF";

/// Magic bytes for a zlib-wrapped manifest: "SPMZ"
const COMPRESSED_MAGIC: [u8; 4] = *b"SPMZ";

const MANIFEST_VERSION: u8 = 1;

/// Metadata flag: file paths are still encrypted with the depot key
const FLAG_FILENAMES_ENCRYPTED: u8 = 0x01;

/// Content digest assigned to zero-length files.
///
/// Empty files carry an all-zero digest on the wire, not the SHA-1 of an
/// empty byte string.
pub const EMPTY_FILE_SHA: [u8; 20] = [0; 20];

/// Per-file flag bits within a manifest.
pub struct FileFlags;

impl FileFlags {
    pub const READ_ONLY: u32 = 0x08;
    pub const HIDDEN: u32 = 0x10;
    pub const EXECUTABLE: u32 = 0x20;
    pub const DIRECTORY: u32 = 0x40;
    pub const SYMLINK: u32 = 0x200;
}

/// Manifest metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMetadata {
    /// Owning application id
    pub app_id: u32,
    /// Depot this manifest describes
    pub depot_id: u32,
    /// 64-bit content GID identifying this manifest revision
    pub gid: u64,
    /// Creation timestamp (seconds since epoch)
    pub creation_time: u64,
    /// Total uncompressed size of all files
    pub cb_disk_original: u64,
    /// Total compressed size of all chunks
    pub cb_disk_compressed: u64,
    /// Count of unique chunks in the depot's chunk pool
    pub unique_chunks: u32,
    /// Whether file paths are still encrypted
    pub filenames_encrypted: bool,
}

/// One chunk of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// SHA-1 of the chunk's content bytes; addresses the chunk on the edge
    pub sha: [u8; 20],
    /// Offset of this chunk within the reconstructed file
    pub offset: u64,
    /// Uncompressed size
    pub cb_original: u32,
    /// Compressed size on the wire
    pub cb_compressed: u32,
}

/// One logical file, directory, or symlink within a depot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    /// Relative path; base64 ciphertext while filenames are encrypted
    pub filename: String,
    /// Flag bits, see [`FileFlags`]
    pub flags: u32,
    /// Total uncompressed file size
    pub size: u64,
    /// SHA-1 of the full file content ([`EMPTY_FILE_SHA`] for empty files)
    pub sha_content: [u8; 20],
    /// Symlink target, when [`FileFlags::SYMLINK`] is set
    pub link_target: Option<String>,
    /// Ordered chunk list reconstructing the file
    pub chunks: Vec<ChunkData>,
}

impl FileMapping {
    /// True for real file payloads (not a directory or symlink entry).
    pub fn is_file(&self) -> bool {
        !self.is_directory() && !self.is_symlink()
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FileFlags::DIRECTORY != 0
    }

    pub fn is_symlink(&self) -> bool {
        self.flags & FileFlags::SYMLINK != 0 || self.link_target.is_some()
    }

    pub fn is_executable(&self) -> bool {
        self.flags & FileFlags::EXECUTABLE != 0
    }
}

/// A parsed depot manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotManifest {
    pub metadata: ManifestMetadata,
    pub files: Vec<FileMapping>,
}

impl DepotManifest {
    /// Parse a manifest from its wire form, compressed or not.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BadMagic);
        }

        if data[..4] == COMPRESSED_MAGIC {
            let mut cursor = Cursor::new(&data[4..]);
            let expected_len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut body = Vec::with_capacity(expected_len);
            ZlibDecoder::new(cursor).read_to_end(&mut body)?;
            trace!(
                "Inflated manifest body: {} -> {} bytes",
                data.len(),
                body.len()
            );
            Self::parse_body(&body)
        } else {
            Self::parse_body(data)
        }
    }

    fn parse_body(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != MANIFEST_MAGIC {
            return Err(Error::BadMagic);
        }

        let version = cursor.read_u8()?;
        if version != MANIFEST_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let app_id = cursor.read_u32::<LittleEndian>()?;
        let depot_id = cursor.read_u32::<LittleEndian>()?;
        let gid = cursor.read_u64::<LittleEndian>()?;
        let creation_time = cursor.read_u64::<LittleEndian>()?;
        let cb_disk_original = cursor.read_u64::<LittleEndian>()?;
        let cb_disk_compressed = cursor.read_u64::<LittleEndian>()?;
        let unique_chunks = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u8()?;
        let file_count = cursor.read_u32::<LittleEndian>()?;

        let metadata = ManifestMetadata {
            app_id,
            depot_id,
            gid,
            creation_time,
            cb_disk_original,
            cb_disk_compressed,
            unique_chunks,
            filenames_encrypted: flags & FLAG_FILENAMES_ENCRYPTED != 0,
        };

        debug!(
            "Parsing manifest {} for depot {}: {} files",
            gid, depot_id, file_count
        );

        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let filename = read_string(&mut cursor)?;
            let flags = cursor.read_u32::<LittleEndian>()?;
            let size = cursor.read_u64::<LittleEndian>()?;
            let mut sha_content = [0u8; 20];
            cursor.read_exact(&mut sha_content)?;
            let link_target = match read_string(&mut cursor)? {
                s if s.is_empty() => None,
                s => Some(s),
            };

            let chunk_count = cursor.read_u32::<LittleEndian>()?;
            let mut chunks = Vec::with_capacity(chunk_count as usize);
            for _ in 0..chunk_count {
                let mut sha = [0u8; 20];
                cursor.read_exact(&mut sha)?;
                chunks.push(ChunkData {
                    sha,
                    offset: cursor.read_u64::<LittleEndian>()?,
                    cb_original: cursor.read_u32::<LittleEndian>()?,
                    cb_compressed: cursor.read_u32::<LittleEndian>()?,
                });
            }

            files.push(FileMapping {
                filename,
                flags,
                size,
                sha_content,
                link_target,
                chunks,
            });
        }

        Ok(Self { metadata, files })
    }

    /// Serialize back to the wire form, optionally recompressing.
    pub fn serialize(&self, compress: bool) -> Result<Vec<u8>> {
        let body = self.serialize_body()?;
        if !compress {
            return Ok(body);
        }

        let mut out = Vec::with_capacity(body.len() / 2 + 8);
        out.extend_from_slice(&COMPRESSED_MAGIC);
        out.write_u32::<LittleEndian>(body.len() as u32)?;
        let mut encoder = ZlibEncoder::new(out, Compression::default());
        encoder.write_all(&body)?;
        Ok(encoder.finish()?)
    }

    fn serialize_body(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&MANIFEST_MAGIC);
        out.write_u8(MANIFEST_VERSION)?;

        let m = &self.metadata;
        out.write_u32::<LittleEndian>(m.app_id)?;
        out.write_u32::<LittleEndian>(m.depot_id)?;
        out.write_u64::<LittleEndian>(m.gid)?;
        out.write_u64::<LittleEndian>(m.creation_time)?;
        out.write_u64::<LittleEndian>(m.cb_disk_original)?;
        out.write_u64::<LittleEndian>(m.cb_disk_compressed)?;
        out.write_u32::<LittleEndian>(m.unique_chunks)?;
        out.write_u8(if m.filenames_encrypted {
            FLAG_FILENAMES_ENCRYPTED
        } else {
            0
        })?;
        out.write_u32::<LittleEndian>(self.files.len() as u32)?;

        for file in &self.files {
            write_string(&mut out, &file.filename)?;
            out.write_u32::<LittleEndian>(file.flags)?;
            out.write_u64::<LittleEndian>(file.size)?;
            out.extend_from_slice(&file.sha_content);
            write_string(&mut out, file.link_target.as_deref().unwrap_or(""))?;

            out.write_u32::<LittleEndian>(file.chunks.len() as u32)?;
            for chunk in &file.chunks {
                out.extend_from_slice(&chunk.sha);
                out.write_u64::<LittleEndian>(chunk.offset)?;
                out.write_u32::<LittleEndian>(chunk.cb_original)?;
                out.write_u32::<LittleEndian>(chunk.cb_compressed)?;
            }
        }

        Ok(out)
    }

    /// A manifest with a zero GID or no files is considered empty; empty
    /// manifests should never be cached or served.
    pub fn is_empty(&self) -> bool {
        self.metadata.gid == 0 || self.files.is_empty()
    }

    pub fn filenames_encrypted(&self) -> bool {
        self.metadata.filenames_encrypted
    }

    /// Total chunk references across all files (>= unique chunk count).
    pub fn total_chunks(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }

    /// Decrypt all file paths (and symlink targets) in place.
    ///
    /// Clears the encrypted flag on success so the manifest can be
    /// re-serialized in decrypted form.
    pub fn decrypt_filenames(&mut self, key: &DepotKey) -> Result<()> {
        if !self.metadata.filenames_encrypted {
            return Ok(());
        }

        for file in &mut self.files {
            file.filename = crypto::decrypt_filename(&file.filename, key)?;
            if let Some(target) = file.link_target.take() {
                file.link_target = Some(crypto::decrypt_filename(&target, key)?);
            }
        }

        self.metadata.filenames_encrypted = false;
        debug!(
            "Decrypted filenames for manifest {} (depot {})",
            self.metadata.gid, self.metadata.depot_id
        );
        Ok(())
    }

    /// Iterate real file payloads, skipping directory and symlink entries.
    ///
    /// Fails while filenames are still encrypted; path-based consumers would
    /// otherwise silently operate on ciphertext.
    pub fn iter_files(&self) -> Result<impl Iterator<Item = &FileMapping>> {
        if self.metadata.filenames_encrypted {
            return Err(Error::FilenamesEncrypted);
        }
        Ok(self.files.iter().filter(|f| f.is_file()))
    }

    /// Check the size invariant: every file's size equals the sum of its
    /// chunks' uncompressed sizes.
    pub fn validate(&self) -> bool {
        self.files.iter().filter(|f| f.is_file()).all(|f| {
            f.size == f.chunks.iter().map(|c| u64::from(c.cb_original)).sum::<u64>()
        })
    }
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16::<LittleEndian>()?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| Error::StringTooLong(s.len()))?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_filename;

    fn chunk(seed: u8, offset: u64, size: u32) -> ChunkData {
        ChunkData {
            sha: [seed; 20],
            offset,
            cb_original: size,
            cb_compressed: size / 2,
        }
    }

    pub(crate) fn sample_manifest() -> DepotManifest {
        DepotManifest {
            metadata: ManifestMetadata {
                app_id: 570,
                depot_id: 570,
                gid: 7280959080077824592,
                creation_time: 1693526400,
                cb_disk_original: 3072,
                cb_disk_compressed: 1536,
                unique_chunks: 3,
                filenames_encrypted: false,
            },
            files: vec![
                FileMapping {
                    filename: "game".into(),
                    flags: FileFlags::DIRECTORY,
                    size: 0,
                    sha_content: EMPTY_FILE_SHA,
                    link_target: None,
                    chunks: vec![],
                },
                FileMapping {
                    filename: "game/bin/app".into(),
                    flags: FileFlags::EXECUTABLE,
                    size: 2048,
                    sha_content: [0xAB; 20],
                    link_target: None,
                    chunks: vec![chunk(1, 0, 1024), chunk(2, 1024, 1024)],
                },
                FileMapping {
                    filename: "game/data.pak".into(),
                    flags: 0,
                    size: 1024,
                    sha_content: [0xCD; 20],
                    link_target: None,
                    chunks: vec![chunk(3, 0, 1024)],
                },
                FileMapping {
                    filename: "game/link".into(),
                    flags: FileFlags::SYMLINK,
                    size: 0,
                    sha_content: EMPTY_FILE_SHA,
                    link_target: Some("game/data.pak".into()),
                    chunks: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_round_trip_uncompressed() {
        let manifest = sample_manifest();
        let bytes = manifest.serialize(false).unwrap();
        let parsed = DepotManifest::parse(&bytes).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_round_trip_compressed() {
        let manifest = sample_manifest();
        let bytes = manifest.serialize(true).unwrap();
        assert_eq!(&bytes[..4], b"SPMZ");
        let parsed = DepotManifest::parse(&bytes).unwrap();
        assert_eq!(parsed, manifest);
        // Serialized forms of both parse paths agree
        assert_eq!(
            parsed.serialize(false).unwrap(),
            manifest.serialize(false).unwrap()
        );
    }

    #[test]
    fn test_oversized_filename_refuses_serialization() {
        let mut manifest = sample_manifest();
        manifest.files[0].filename = "x".repeat(usize::from(u16::MAX) + 1);
        assert!(matches!(
            manifest.serialize(false),
            Err(Error::StringTooLong(65536))
        ));
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            DepotManifest::parse(b"NOPE1234"),
            Err(Error::BadMagic)
        ));
        assert!(matches!(DepotManifest::parse(b"SP"), Err(Error::BadMagic)));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = sample_manifest().serialize(false).unwrap();
        let result = DepotManifest::parse(&bytes[..bytes.len() - 10]);
        assert!(matches!(result, Err(Error::IOError(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_manifest().serialize(false).unwrap();
        bytes[4] = 99;
        assert!(matches!(
            DepotManifest::parse(&bytes),
            Err(Error::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_iter_files_skips_pseudo_entries() {
        let manifest = sample_manifest();
        let names: Vec<_> = manifest
            .iter_files()
            .unwrap()
            .map(|f| f.filename.as_str())
            .collect();
        assert_eq!(names, vec!["game/bin/app", "game/data.pak"]);
    }

    #[test]
    fn test_iter_files_refuses_encrypted() {
        let mut manifest = sample_manifest();
        manifest.metadata.filenames_encrypted = true;
        assert!(matches!(
            manifest.iter_files(),
            Err(Error::FilenamesEncrypted)
        ));
    }

    #[test]
    fn test_is_empty() {
        let mut manifest = sample_manifest();
        assert!(!manifest.is_empty());
        manifest.metadata.gid = 0;
        assert!(manifest.is_empty());

        let mut manifest = sample_manifest();
        manifest.files.clear();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_validate_chunk_sums() {
        let mut manifest = sample_manifest();
        assert!(manifest.validate());
        manifest.files[1].size += 1;
        assert!(!manifest.validate());
    }

    #[test]
    fn test_decrypt_filenames_in_place() {
        let key = DepotKey::from_bytes([0x42; 32]);
        let mut manifest = sample_manifest();
        for (i, file) in manifest.files.iter_mut().enumerate() {
            file.filename = encrypt_filename(&file.filename, &key, [i as u8; 16]);
            if let Some(target) = &file.link_target {
                file.link_target = Some(encrypt_filename(target, &key, [0x55; 16]));
            }
        }
        manifest.metadata.filenames_encrypted = true;

        manifest.decrypt_filenames(&key).unwrap();
        assert!(!manifest.filenames_encrypted());
        assert_eq!(manifest.files[1].filename, "game/bin/app");
        assert_eq!(
            manifest.files[3].link_target.as_deref(),
            Some("game/data.pak")
        );

        // Round-trips in decrypted form afterwards
        let bytes = manifest.serialize(false).unwrap();
        let parsed = DepotManifest::parse(&bytes).unwrap();
        assert!(!parsed.filenames_encrypted());
        assert_eq!(parsed.files[2].filename, "game/data.pak");
    }

    #[test]
    fn test_decrypt_is_noop_when_plain() {
        let key = DepotKey::from_bytes([0x42; 32]);
        let mut manifest = sample_manifest();
        manifest.decrypt_filenames(&key).unwrap();
        assert_eq!(manifest, sample_manifest());
    }

    #[test]
    fn test_empty_file_sha_is_all_zero() {
        use sha1::{Digest, Sha1};
        let hashed_empty: [u8; 20] = Sha1::digest(b"").into();
        // The sentinel is a convention, not the hash of empty input
        assert_ne!(EMPTY_FILE_SHA, hashed_empty);
        assert_eq!(EMPTY_FILE_SHA, [0u8; 20]);
    }
}

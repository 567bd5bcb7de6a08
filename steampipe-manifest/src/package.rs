//! Embedded package (`.vpk`) directory index.
//!
//! Depots commonly ship a directory-plus-data-blob archive: one `_dir.vpk`
//! file carrying the directory tree (and optional inline preload data),
//! alongside numbered data-only siblings (`pak01_000.vpk`, ...). Parsing only
//! needs the header and tree region, so a consumer can stream those bytes and
//! address members without materializing the container.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use tracing::trace;

use crate::{Error, Result};

/// Package index signature, little-endian.
pub const PACKAGE_SIGNATURE: u32 = 0x55aa1234;

/// Archive index meaning "data is inline in the directory file, after the tree".
pub const INLINE_ARCHIVE_INDEX: u16 = 0x7fff;

/// Per-entry terminator marker.
const ENTRY_TERMINATOR: u16 = 0xffff;

/// Fixed header lengths by version.
const HEADER_V1_LEN: usize = 12;
const HEADER_V2_LEN: usize = 28;

/// Parsed package header: enough to know how many bytes the tree occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    pub version: u32,
    /// Size of the directory tree in bytes, immediately after the header
    pub tree_size: u32,
    /// Header length in bytes (version dependent)
    pub header_length: usize,
}

impl PackageHeader {
    /// Parse the fixed header from the front of a package file.
    ///
    /// Needs at most [`HEADER_V2_LEN`] bytes; a prefix read is enough to
    /// learn the tree region's extent.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != PACKAGE_SIGNATURE {
            return Err(Error::BadMagic);
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        let tree_size = cursor.read_u32::<LittleEndian>()?;
        let header_length = match version {
            1 => HEADER_V1_LEN,
            2 => {
                // v2 appends four section sizes we don't need for indexing
                if data.len() < HEADER_V2_LEN {
                    return Err(Error::TruncatedIndex);
                }
                HEADER_V2_LEN
            }
            other => return Err(Error::UnsupportedPackageVersion(other)),
        };

        Ok(Self {
            version,
            tree_size,
            header_length,
        })
    }

    /// Total bytes needed to parse the full index: header plus tree.
    pub fn index_length(&self) -> usize {
        self.header_length + self.tree_size as usize
    }
}

/// One member file within a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    /// Member path, `dir/name.ext`
    pub path: String,
    /// CRC32 of the member content
    pub crc32: u32,
    /// Preload bytes stored inline in the directory tree
    pub preload: Vec<u8>,
    /// Which numbered data sibling holds the body ([`INLINE_ARCHIVE_INDEX`]
    /// for data stored in the directory file itself)
    pub archive_index: u16,
    /// Offset of the body within its archive
    pub entry_offset: u32,
    /// Body length (excluding preload)
    pub entry_length: u32,
}

impl PackageEntry {
    pub fn is_inline(&self) -> bool {
        self.archive_index == INLINE_ARCHIVE_INDEX
    }

    /// Full member size: preload plus archived body.
    pub fn total_length(&self) -> u64 {
        self.preload.len() as u64 + u64::from(self.entry_length)
    }
}

/// Parsed package directory index.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    pub header: PackageHeader,
    entries: Vec<PackageEntry>,
}

impl PackageIndex {
    /// Parse the directory index from the front of a package file.
    ///
    /// `data` must cover the header and the whole tree region
    /// ([`PackageHeader::index_length`]); member bodies are not required.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = PackageHeader::parse(data)?;
        if data.len() < header.index_length() {
            return Err(Error::TruncatedIndex);
        }

        let tree = &data[header.header_length..header.index_length()];
        let mut cursor = Cursor::new(tree);
        let mut entries = Vec::new();

        loop {
            let ext = read_cstring(&mut cursor)?;
            if ext.is_empty() {
                break;
            }
            loop {
                let dir = read_cstring(&mut cursor)?;
                if dir.is_empty() {
                    break;
                }
                loop {
                    let name = read_cstring(&mut cursor)?;
                    if name.is_empty() {
                        break;
                    }

                    let crc32 = cursor.read_u32::<LittleEndian>()?;
                    let preload_length = cursor.read_u16::<LittleEndian>()?;
                    let archive_index = cursor.read_u16::<LittleEndian>()?;
                    let entry_offset = cursor.read_u32::<LittleEndian>()?;
                    let entry_length = cursor.read_u32::<LittleEndian>()?;
                    let terminator = cursor.read_u16::<LittleEndian>()?;
                    if terminator != ENTRY_TERMINATOR {
                        return Err(Error::TruncatedIndex);
                    }

                    let mut preload = vec![0u8; preload_length as usize];
                    cursor.read_exact(&mut preload)?;

                    // A single-space directory marks the package root
                    let path = if dir == " " || dir.is_empty() {
                        format!("{name}.{ext}")
                    } else {
                        format!("{dir}/{name}.{ext}")
                    };

                    trace!(
                        "Package entry {path}: archive {archive_index}, {entry_length} bytes"
                    );
                    entries.push(PackageEntry {
                        path,
                        crc32,
                        preload,
                        archive_index,
                        entry_offset,
                        entry_length,
                    });
                }
            }
        }

        Ok(Self { header, entries })
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn find(&self, path: &str) -> Option<&PackageEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Offset within the directory file where inline member bodies start.
    pub fn inline_data_base(&self) -> u64 {
        self.header.index_length() as u64
    }
}

fn read_cstring<R: Read>(reader: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8(buf)?)
}

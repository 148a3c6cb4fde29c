//! Shard-index and field-index serialization
//!
//! Both index families share the same framing: a fixed [`Pod`] header
//! carrying a magic number, the format version, and the uncompressed and
//! compressed payload sizes, followed by a zstd payload. The field index is
//! additionally followed by a footer so it can be located from the end of
//! its column file.

use std::fs::{self, File};
use std::io::Write;
use std::mem::size_of;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use zstd::stream::{copy_decode, copy_encode};

use super::{DEFAULT_COMPRESSION_LEVEL, FIELD_INDEX_MAGIC, FORMAT_VERSION, SHARD_INDEX_MAGIC};
use crate::coord::{Coord, CoordRange};
use crate::error::{CorruptionError, Result};
use crate::path::shard_index_path;

/// The location and coordinate interval of one block within a field file.
///
/// This is stored identically in memory and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BlockIndexEntry {
    /// Coordinate of the first record in the block
    pub start_addr: Coord,
    /// Coordinate of the last record in the block (inclusive)
    pub end_addr: Coord,
    /// Byte offset of the block header within the field file
    pub file_offset: u64,
    /// Number of records in the block, always positive
    pub num_records: u32,
    padding: u32,
}
impl BlockIndexEntry {
    #[must_use]
    pub fn new(start_addr: Coord, end_addr: Coord, file_offset: u64, num_records: u32) -> Self {
        Self {
            start_addr,
            end_addr,
            file_offset,
            num_records,
            padding: 0,
        }
    }
}

/// Shared framing header for compressed index payloads.
///
/// This is stored identically in memory and on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct IndexHeader {
    magic: [u8; 8],
    version: u32,
    padding: u32,
    /// Number of bytes in the uncompressed payload
    pub(crate) u_bytes: u64,
    /// Number of bytes in the compressed payload
    pub(crate) z_bytes: u64,
}
impl IndexHeader {
    pub(crate) fn new(magic: &[u8; 8], u_bytes: u64, z_bytes: u64) -> Self {
        Self {
            magic: *magic,
            version: FORMAT_VERSION,
            padding: 0,
            u_bytes,
            z_bytes,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decodes a header and verifies its magic and version, naming `path`
    /// in any failure.
    pub(crate) fn from_bytes(bytes: &[u8], magic: &[u8; 8], path: &Path) -> Result<Self> {
        let header: Self = bytemuck::pod_read_unaligned(bytes);
        if header.magic != *magic {
            let err = if magic == SHARD_INDEX_MAGIC {
                CorruptionError::ShardIndexMagic {
                    path: path.display().to_string(),
                }
            } else {
                CorruptionError::FieldIndexMagic {
                    path: path.display().to_string(),
                }
            };
            return Err(err.into());
        }
        if header.version != FORMAT_VERSION {
            return Err(CorruptionError::VersionMismatch {
                path: path.display().to_string(),
                found: header.version,
                expected: FORMAT_VERSION,
            }
            .into());
        }
        Ok(header)
    }
}

/// The footer closing a field-index trailer.
///
/// This is stored identically in memory and on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct IndexFooter {
    /// Number of bytes in the compressed index payload
    pub(crate) z_bytes: u64,
    magic: [u8; 8],
}
impl IndexFooter {
    pub(crate) fn new(z_bytes: u64) -> Self {
        Self {
            z_bytes,
            magic: *FIELD_INDEX_MAGIC,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub(crate) fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let footer: Self = bytemuck::pod_read_unaligned(bytes);
        if footer.magic != *FIELD_INDEX_MAGIC {
            return Err(CorruptionError::FieldIndexMagic {
                path: path.display().to_string(),
            }
            .into());
        }
        Ok(footer)
    }
}

/// The block table of one field file, stored as its trailer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIndex {
    pub blocks: Vec<BlockIndexEntry>,
}
impl FieldIndex {
    /// Rejects tables violating the block invariants: every block holds at
    /// least one record, file offsets increase strictly, and coordinate
    /// intervals are ordered and non-overlapping.
    pub fn validate(&self) -> Result<()> {
        let mut prev: Option<&BlockIndexEntry> = None;
        for block in &self.blocks {
            if block.num_records == 0 {
                return Err(CorruptionError::EmptyBlock.into());
            }
            if block.end_addr < block.start_addr {
                return Err(CorruptionError::NonMonotoneBlocks {
                    prev: block.start_addr,
                    next: block.end_addr,
                }
                .into());
            }
            if let Some(prev) = prev {
                if prev.file_offset >= block.file_offset {
                    return Err(CorruptionError::DecreasingOffsets {
                        prev: prev.file_offset,
                        next: block.file_offset,
                    }
                    .into());
                }
                if block.start_addr < prev.end_addr {
                    return Err(CorruptionError::NonMonotoneBlocks {
                        prev: prev.end_addr,
                        next: block.start_addr,
                    }
                    .into());
                }
            }
            prev = Some(block);
        }
        Ok(())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.blocks)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % size_of::<BlockIndexEntry>() != 0 {
            return Err(CorruptionError::IndexSize(bytes.len()).into());
        }
        Ok(Self {
            blocks: bytemuck::pod_collect_to_vec(bytes),
        })
    }
}

/// The metadata file of one row-shard: format version, covered range, and
/// the opaque dataset header blob replicated in every shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIndex {
    pub version: u32,
    pub range: CoordRange,
    pub header: Vec<u8>,
}
impl ShardIndex {
    #[must_use]
    pub fn new(range: CoordRange, header: Vec<u8>) -> Self {
        Self {
            version: FORMAT_VERSION,
            range,
            header,
        }
    }
}

/// Serializes `index` into `dir/<range>.index`, replacing any existing file
/// atomically through a temporary file and rename.
pub fn write_shard_index(dir: &Path, index: &ShardIndex) -> Result<()> {
    let path = shard_index_path(dir, index.range);
    let mut payload = Vec::with_capacity(size_of::<CoordRange>() + 4 + index.header.len());
    payload.extend_from_slice(bytemuck::bytes_of(&index.range));
    payload.write_u32::<LittleEndian>(index.header.len() as u32)?;
    payload.extend_from_slice(&index.header);

    let mut z_payload = Vec::new();
    copy_encode(payload.as_slice(), &mut z_payload, DEFAULT_COMPRESSION_LEVEL)?;
    let header = IndexHeader::new(SHARD_INDEX_MAGIC, payload.len() as u64, z_payload.len() as u64);

    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let mut out = File::create(tmp)?;
        out.write_all(header.as_bytes())?;
        out.write_all(&z_payload)?;
        out.sync_all()?;
    }
    fs::rename(tmp, &path)?;
    Ok(())
}

/// Reads and verifies the shard-index file at `path`.
pub fn read_shard_index(path: &Path) -> Result<ShardIndex> {
    let bytes = fs::read(path)?;
    let header_len = size_of::<IndexHeader>();
    if bytes.len() < header_len {
        return Err(CorruptionError::MissingTrailer {
            path: path.display().to_string(),
        }
        .into());
    }
    let header = IndexHeader::from_bytes(&bytes[..header_len], SHARD_INDEX_MAGIC, path)?;
    let z_end = header_len + header.z_bytes as usize;
    if bytes.len() < z_end {
        return Err(CorruptionError::Truncated {
            path: path.display().to_string(),
        }
        .into());
    }

    let mut payload = Vec::with_capacity(header.u_bytes as usize);
    copy_decode(&bytes[header_len..z_end], &mut payload)?;
    if payload.len() != header.u_bytes as usize {
        return Err(CorruptionError::PayloadSizeMismatch {
            got: payload.len(),
            expected: header.u_bytes as usize,
        }
        .into());
    }
    let range_len = size_of::<CoordRange>();
    if payload.len() < range_len + 4 {
        return Err(CorruptionError::Truncated {
            path: path.display().to_string(),
        }
        .into());
    }
    let range: CoordRange = bytemuck::pod_read_unaligned(&payload[..range_len]);
    let header_bytes = LittleEndian::read_u32(&payload[range_len..range_len + 4]) as usize;
    if payload.len() != range_len + 4 + header_bytes {
        return Err(CorruptionError::Truncated {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(ShardIndex {
        version: FORMAT_VERSION,
        range,
        header: payload[range_len + 4..].to_vec(),
    })
}

/// Decodes and validates the field-index trailer at the end of a mapped
/// column file. Returns the index and the offset where block data ends.
pub(crate) fn parse_field_trailer(bytes: &[u8], path: &Path) -> Result<(FieldIndex, usize)> {
    let footer_len = size_of::<IndexFooter>();
    let header_len = size_of::<IndexHeader>();
    if bytes.len() < footer_len + header_len {
        return Err(CorruptionError::MissingTrailer {
            path: path.display().to_string(),
        }
        .into());
    }
    let footer_start = bytes.len() - footer_len;
    let footer = IndexFooter::from_bytes(&bytes[footer_start..], path)?;
    let header_start = footer_start
        .checked_sub(footer.z_bytes as usize + header_len)
        .ok_or_else(|| CorruptionError::Truncated {
            path: path.display().to_string(),
        })?;
    let header = IndexHeader::from_bytes(
        &bytes[header_start..header_start + header_len],
        FIELD_INDEX_MAGIC,
        path,
    )?;

    let mut table = Vec::with_capacity(header.u_bytes as usize);
    copy_decode(&bytes[header_start + header_len..footer_start], &mut table)?;
    if table.len() != header.u_bytes as usize {
        return Err(CorruptionError::PayloadSizeMismatch {
            got: table.len(),
            expected: header.u_bytes as usize,
        }
        .into());
    }
    let index = FieldIndex::from_bytes(&table)?;
    index.validate()?;
    Ok((index, header_start))
}

/// Reads only the index trailer of the field file at `path`.
pub fn read_field_index(path: &Path) -> Result<FieldIndex> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file) }?;
    let (index, _) = parse_field_trailer(&mmap, path)?;
    Ok(index)
}

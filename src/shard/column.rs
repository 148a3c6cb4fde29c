//! Per-field column I/O
//!
//! A [`ColumnWriter`] buffers framed record payloads for one field and emits
//! them as compressed blocks, tracking one [`BlockIndexEntry`] per block for
//! the trailer written by `finish`. A [`ColumnReader`] maps the finished
//! file, seeks to a block by coordinate, and yields payloads one record at a
//! time. Block boundaries are dictated by the owning shard writer, never by
//! the column itself, which keeps every column of a shard aligned.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use zstd::stream::{copy_decode, copy_encode};

use super::index::{parse_field_trailer, BlockIndexEntry, FieldIndex, IndexFooter, IndexHeader};
use super::{BLOCK_MAGIC, FIELD_INDEX_MAGIC};
use crate::cancel::CancelToken;
use crate::coord::Coord;
use crate::error::{CorruptionError, Result, WriteError};
use crate::path::field_data_path;
use crate::record::Field;

/// The framing header preceding every compressed block.
///
/// This is stored identically in memory and on disk.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct BlockHeader {
    magic: [u8; 4],
    padding: [u8; 4],
    /// Number of bytes in the decompressed block
    u_bytes: u64,
    /// Number of bytes in the compressed block
    z_bytes: u64,
}
impl BlockHeader {
    fn new(u_bytes: u64, z_bytes: u64) -> Self {
        Self {
            magic: *BLOCK_MAGIC,
            padding: [0; 4],
            u_bytes,
            z_bytes,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    fn from_bytes(bytes: &[u8], offset: u64) -> Result<Self> {
        let header: Self = bytemuck::pod_read_unaligned(bytes);
        if header.magic != *BLOCK_MAGIC {
            return Err(CorruptionError::BlockMagic { offset }.into());
        }
        Ok(header)
    }
}

pub(crate) const BLOCK_HEADER_LEN: usize = size_of::<BlockHeader>();

/// Block-buffered writer for one field column.
pub(crate) struct ColumnWriter {
    field: Field,
    out: BufWriter<File>,
    /// Framed record payloads waiting for the next block flush
    buf: Vec<u8>,
    /// Reusable compression buffer
    zbuf: Vec<u8>,
    first: Option<Coord>,
    last: Coord,
    pending: u32,
    index: FieldIndex,
    offset: u64,
    level: i32,
    failed: bool,
}
impl ColumnWriter {
    pub(crate) fn create(
        dir: &Path,
        range: crate::coord::CoordRange,
        field: Field,
        level: i32,
    ) -> Result<Self> {
        let file = File::create(field_data_path(dir, range, field))?;
        Ok(Self {
            field,
            out: BufWriter::new(file),
            buf: Vec::new(),
            zbuf: Vec::new(),
            first: None,
            last: Coord::zero(),
            pending: 0,
            index: FieldIndex::default(),
            offset: 0,
            level,
            failed: false,
        })
    }

    pub(crate) fn field(&self) -> Field {
        self.field
    }

    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    fn check(&self) -> Result<()> {
        if self.failed {
            return Err(WriteError::ColumnFailed { field: self.field }.into());
        }
        Ok(())
    }

    /// Appends one framed record payload to the pending block.
    pub(crate) fn append(&mut self, coord: Coord, payload: &[u8]) -> Result<()> {
        self.check()?;
        if self.first.is_none() {
            self.first = Some(coord);
        }
        self.last = coord;
        self.pending += 1;
        self.buf.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Emits the pending records as one compressed block and records its
    /// index entry. A no-op when nothing is pending.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.check()?;
        let result = self.flush_inner();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn flush_inner(&mut self) -> Result<()> {
        let Some(first) = self.first else {
            return Ok(());
        };
        self.zbuf.clear();
        copy_encode(self.buf.as_slice(), &mut self.zbuf, self.level)?;
        let header = BlockHeader::new(self.buf.len() as u64, self.zbuf.len() as u64);
        self.out.write_all(header.as_bytes())?;
        self.out.write_all(&self.zbuf)?;
        self.index.blocks.push(BlockIndexEntry::new(
            first,
            self.last,
            self.offset,
            self.pending,
        ));
        self.offset += (BLOCK_HEADER_LEN + self.zbuf.len()) as u64;
        self.buf.clear();
        self.first = None;
        self.pending = 0;
        Ok(())
    }

    /// Flushes any pending block and writes the field-index trailer.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.flush()?;
        let result = self.finish_inner();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn finish_inner(&mut self) -> Result<()> {
        let table = self.index.as_bytes();
        self.zbuf.clear();
        copy_encode(table, &mut self.zbuf, self.level)?;
        let header = IndexHeader::new(FIELD_INDEX_MAGIC, table.len() as u64, self.zbuf.len() as u64);
        let footer = IndexFooter::new(self.zbuf.len() as u64);
        self.out.write_all(header.as_bytes())?;
        self.out.write_all(&self.zbuf)?;
        self.out.write_all(footer.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    pub(crate) fn index(&self) -> &FieldIndex {
        &self.index
    }
}

/// Memory-mapped reader for one field column, yielding record payloads in
/// file order from a seek position.
#[derive(Debug)]
pub(crate) struct ColumnReader {
    field: Field,
    path: PathBuf,
    mmap: Mmap,
    blocks: Vec<BlockIndexEntry>,
    /// Next block to load, as an index into `blocks`
    next_block: usize,
    /// Decompressed payload of the current block
    payload: Vec<u8>,
    pos: usize,
    /// Records left in the current block
    remaining: u32,
    cancel: CancelToken,
}
impl ColumnReader {
    /// Maps the column file for `field`, returning `None` when the shard
    /// does not store that field.
    pub(crate) fn open(
        dir: &Path,
        shard_range: crate::coord::CoordRange,
        field: Field,
        cancel: CancelToken,
    ) -> Result<Option<Self>> {
        let path = field_data_path(dir, shard_range, field);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mmap = unsafe { Mmap::map(&file) }?;
        let (index, _) = parse_field_trailer(&mmap, &path)?;
        Ok(Some(Self {
            field,
            path,
            mmap,
            blocks: index.blocks,
            next_block: 0,
            payload: Vec::new(),
            pos: 0,
            remaining: 0,
            cancel,
        }))
    }

    /// Positions the reader at the first block that may hold `start`, i.e.
    /// the first block whose end coordinate is not below it.
    pub(crate) fn seek(&mut self, start: Coord) {
        self.next_block = self.blocks.partition_point(|b| b.end_addr < start);
        self.payload.clear();
        self.pos = 0;
        self.remaining = 0;
    }

    fn load_next_block(&mut self) -> Result<bool> {
        let Some(entry) = self.blocks.get(self.next_block).copied() else {
            return Ok(false);
        };
        self.cancel.check()?;
        let start = entry.file_offset as usize;
        let data_start = start + BLOCK_HEADER_LEN;
        if data_start > self.mmap.len() {
            return Err(CorruptionError::Truncated {
                path: self.path.display().to_string(),
            }
            .into());
        }
        let header = BlockHeader::from_bytes(&self.mmap[start..data_start], entry.file_offset)?;
        let data_end = data_start + header.z_bytes as usize;
        if data_end > self.mmap.len() {
            return Err(CorruptionError::Truncated {
                path: self.path.display().to_string(),
            }
            .into());
        }
        self.payload.clear();
        copy_decode(&self.mmap[data_start..data_end], &mut self.payload)?;
        if self.payload.len() != header.u_bytes as usize {
            return Err(CorruptionError::PayloadSizeMismatch {
                got: self.payload.len(),
                expected: header.u_bytes as usize,
            }
            .into());
        }
        self.pos = 0;
        self.remaining = entry.num_records;
        self.next_block += 1;
        Ok(true)
    }

    /// The next framed record payload, or `None` past the last block.
    pub(crate) fn next_value(&mut self) -> Result<Option<&[u8]>> {
        while self.remaining == 0 {
            if !self.load_next_block()? {
                return Ok(None);
            }
        }
        if self.pos + 4 > self.payload.len() {
            return Err(CorruptionError::TruncatedRecord.into());
        }
        let len = LittleEndian::read_u32(&self.payload[self.pos..self.pos + 4]) as usize;
        self.pos += 4;
        if self.pos + len > self.payload.len() {
            return Err(CorruptionError::TruncatedRecord.into());
        }
        let value = &self.payload[self.pos..self.pos + len];
        self.pos += len;
        self.remaining -= 1;
        Ok(Some(value))
    }

    /// Discards the next record payload. The caller knows one must exist
    /// because the coord column produced a record at this position.
    pub(crate) fn skip_value(&mut self) -> Result<()> {
        match self.next_value()? {
            Some(_) => Ok(()),
            None => Err(CorruptionError::ColumnDesync { field: self.field }.into()),
        }
    }
}

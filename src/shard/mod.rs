//! # Row-shard format
//!
//! A row-shard stores every record whose coordinate falls inside its range,
//! one block-compressed file per field plus one shard-index file. All field
//! files of a shard share identical block boundaries, so record `k` of block
//! `j` refers to the same logical record in every column.
//!
//! ## Field-column file `<range>.<field>`
//!
//! ```text
//! ┌─────────────────────┐
//! │    Block Header     │ 24 bytes
//! ├─────────────────────┤
//! │  Compressed Block   │ Variable size
//! ├─────────────────────┤
//! │        ...          │ More blocks
//! ├─────────────────────┤
//! │ Field Index Header  │ 32 bytes
//! ├─────────────────────┤
//! │  Compressed Index   │ Variable size
//! ├─────────────────────┤
//! │    Index Footer     │ 16 bytes
//! └─────────────────────┘
//! ```
//!
//! Each decompressed block is a run of length-prefixed record payloads. The
//! index trailer is a table of [`BlockIndexEntry`] rows giving the coordinate
//! interval, file offset, and record count of every block; readers locate it
//! through the footer at the end of the file.
//!
//! ## Shard-index file `<range>.index`
//!
//! ```text
//! ┌─────────────────────┐
//! │ Shard Index Header  │ 32 bytes
//! ├─────────────────────┤
//! │ Compressed Payload  │ Variable size
//! └─────────────────────┘
//! ```
//!
//! The payload is the shard's coordinate range followed by the opaque
//! dataset header blob, replicated in every shard. The shard-index file is
//! written last, so its presence marks a completely written shard.

mod column;
mod index;
mod reader;
mod writer;

pub use index::{read_field_index, read_shard_index, write_shard_index, BlockIndexEntry, FieldIndex, ShardIndex};
pub use reader::{ReadOpts, ShardReader};
pub use writer::{ShardWriter, WriterOpts};

/// The magic number identifying a shard-index file.
pub const SHARD_INDEX_MAGIC: &[u8; 8] = b"PAMSHARD";

/// The magic number identifying a field-index trailer.
pub const FIELD_INDEX_MAGIC: &[u8; 8] = b"PAMFIELD";

/// The magic number prefixed to every block.
pub const BLOCK_MAGIC: &[u8; 4] = b"PBLK";

/// The current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Default number of buffered records before a synchronized block flush.
pub const DEFAULT_RECORDS_PER_BLOCK: usize = 512;

/// Default byte threshold on the largest column buffer before a flush.
pub const DEFAULT_BLOCK_BYTES: usize = 1 << 20;

/// The default compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 0;

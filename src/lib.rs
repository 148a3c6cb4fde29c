#![doc = include_str!("../README.md")]
//!
//! # Overview
//!
//! The library is organized around three moving parts:
//!
//! - [`ShardWriter`] streams coordinate-ordered records into one row-shard,
//!   fanning every record out to per-field [`shard`] column files with
//!   synchronized block boundaries.
//! - [`ShardReader`] and [`DatasetReader`] reassemble records from the
//!   columns, restricted to a query [`CoordRange`].
//! - [`generate_read_shards`] plans byte-balanced query sub-ranges from the
//!   field indexes for parallel scans.
//!
//! Field payloads are opaque byte strings at this layer; encoding record
//! attributes belongs to the upstream codec, and the dataset header blob is
//! stored verbatim in every shard index.
//!
//! # Example
//!
//! ```
//! use pamseq::{Coord, CoordRange, DatasetReader, Field, Record, Result, ShardWriter};
//!
//! fn main() -> Result<()> {
//!     let dir = tempfile::tempdir()?;
//!     let fields = [Field::Flags, Field::Seq];
//!
//!     // Write one row-shard covering the whole coordinate space.
//!     let mut writer = ShardWriter::new(dir.path(), CoordRange::universal(), b"hdr", &fields)?;
//!     for pos in 0..100 {
//!         let record = Record::new(Coord::new(0, pos, 0))
//!             .with(Field::Flags, vec![0, 1])
//!             .with(Field::Seq, b"ACGTACGT".to_vec());
//!         writer.append(&record)?;
//!     }
//!     writer.close()?;
//!
//!     // Read back a sub-range.
//!     let query = CoordRange::new(Coord::new(0, 10, 0), Coord::new(0, 20, 0));
//!     let reader = DatasetReader::open(dir.path(), query, &fields)?;
//!     let records = reader.collect_records()?;
//!     assert_eq!(records.len(), 10);
//!     assert_eq!(records[0].get(Field::Seq), b"ACGTACGT");
//!     Ok(())
//! }
//! ```

/// Cooperative cancellation
mod cancel;

/// Coordinates and coordinate ranges
mod coord;

/// Range queries across a whole dataset
mod dataset;

/// Error definitions
pub mod error;

/// Dataset file naming
mod path;

/// Record fields and the opaque record container
mod record;

/// Row-shard format: columns, indexes, writer, reader
pub mod shard;

/// Read-shard planning
mod sharder;

pub use cancel::CancelToken;
pub use coord::{
    block_intersects_range, validate_coord_range, Coord, CoordRange, INFINITY_REFID,
    UNMAPPED_REFID,
};
pub use dataset::{read_dataset_header, DatasetReader};
pub use error::{Error, Result};
pub use path::{
    choose_index_files_in_range, field_data_path, find_index_files_in_range, list_index_files,
    parse_path, shard_index_path, FileInfo, FileType,
};
pub use record::{Field, Record};
pub use shard::{
    read_field_index, read_shard_index, write_shard_index, BlockIndexEntry, FieldIndex, ReadOpts,
    ShardIndex, ShardReader, ShardWriter, WriterOpts,
};
pub use sharder::{
    generate_read_shards, plan_read_shards, read_indexes, ReadShardOpts, ShardSummary,
};

//! Row-shard writer
//!
//! One [`ShardWriter`] owns every column of one row-shard. Records must
//! arrive in non-decreasing coordinate order and inside the shard range;
//! the writer fans each record out to its field columns and triggers block
//! flushes on all columns at the same record boundary, so every field file
//! of the shard ends up with an identical block table.
//!
//! A flush is taken once the buffered-record or buffered-byte target is
//! crossed, but only when the incoming record starts a new `(refid, pos)`
//! locus. A run of records sharing a locus is therefore never split across
//! blocks.
//!
//! On close the columns write their index trailers first and the shard-index
//! file last, making the shard visible to readers atomically. A writer that
//! failed or was cancelled never publishes the shard index.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::column::ColumnWriter;
use super::index::{write_shard_index, ShardIndex};
use super::{DEFAULT_BLOCK_BYTES, DEFAULT_COMPRESSION_LEVEL, DEFAULT_RECORDS_PER_BLOCK};
use crate::cancel::CancelToken;
use crate::coord::{validate_coord_range, Coord, CoordRange};
use crate::error::{Error, Result, WriteError};
use crate::record::{Field, Record};

/// Tunables for a [`ShardWriter`].
#[derive(Debug, Clone)]
pub struct WriterOpts {
    /// Number of buffered records that arms the next block flush
    pub records_per_block: usize,
    /// Byte size of the largest column buffer that arms the next flush
    pub block_bytes: usize,
    /// zstd compression level for blocks and index payloads
    pub compression_level: i32,
    /// Cancellation token polled at every block boundary
    pub cancel: CancelToken,
}
impl Default for WriterOpts {
    fn default() -> Self {
        Self {
            records_per_block: DEFAULT_RECORDS_PER_BLOCK,
            block_bytes: DEFAULT_BLOCK_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            cancel: CancelToken::default(),
        }
    }
}

/// Writer for one row-shard of a dataset.
pub struct ShardWriter {
    dir: PathBuf,
    range: CoordRange,
    header: Vec<u8>,
    columns: Vec<ColumnWriter>,
    /// Reusable buffer for the coord column payload
    coord_buf: Vec<u8>,
    last: Option<Coord>,
    pending: usize,
    opts: WriterOpts,
    /// Message of the first failure; set once, then the shard is dead
    failed: Option<String>,
}
impl ShardWriter {
    /// Creates a shard writer with default options. `fields` is the set of
    /// columns stored for the dataset; the coord column is always included.
    pub fn new(
        dir: impl AsRef<Path>,
        range: CoordRange,
        header: &[u8],
        fields: &[Field],
    ) -> Result<Self> {
        Self::with_opts(dir, range, header, fields, WriterOpts::default())
    }

    pub fn with_opts(
        dir: impl AsRef<Path>,
        mut range: CoordRange,
        header: &[u8],
        fields: &[Field],
        opts: WriterOpts,
    ) -> Result<Self> {
        validate_coord_range(&mut range)?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut ordered = vec![Field::Coord];
        for &field in fields {
            if !ordered.contains(&field) {
                ordered.push(field);
            }
        }
        let columns = ordered
            .iter()
            .map(|&field| ColumnWriter::create(&dir, range, field, opts.compression_level))
            .collect::<Result<Vec<_>>>()?;
        debug!(dir = %dir.display(), %range, columns = columns.len(), "opened shard writer");
        Ok(Self {
            dir,
            range,
            header: header.to_vec(),
            columns,
            coord_buf: Vec::with_capacity(16),
            last: None,
            pending: 0,
            opts,
            failed: None,
        })
    }

    #[must_use]
    pub fn range(&self) -> CoordRange {
        self.range
    }

    /// The columns of this shard, coord first.
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        self.columns.iter().map(ColumnWriter::field).collect()
    }

    fn check(&self) -> Result<()> {
        if let Some(reason) = &self.failed {
            return Err(WriteError::ShardFailed {
                reason: reason.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.failed.is_none() {
            self.failed = Some(err.to_string());
        }
        err
    }

    /// Appends one record. Coordinates must be non-decreasing and inside the
    /// shard range; a violation kills the shard.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.check()?;
        match self.append_inner(record) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn append_inner(&mut self, record: &Record) -> Result<()> {
        let coord = record.coord;
        if !self.range.contains(coord) {
            return Err(WriteError::CoordOutOfRange {
                coord,
                range: self.range,
            }
            .into());
        }
        if let Some(last) = self.last {
            if coord < last {
                return Err(WriteError::CoordDecreased {
                    prev: last,
                    next: coord,
                }
                .into());
            }
            // Flush only between coord-runs, once a target is crossed.
            if !last.same_locus(&coord)
                && (self.pending >= self.opts.records_per_block
                    || self.max_buffered_bytes() >= self.opts.block_bytes)
            {
                self.flush_blocks()?;
            }
        }

        self.coord_buf.clear();
        coord.encode_into(&mut self.coord_buf)?;
        for column in &mut self.columns {
            match column.field() {
                Field::Coord => column.append(coord, &self.coord_buf)?,
                field => column.append(coord, record.get(field))?,
            }
        }
        self.last = Some(coord);
        self.pending += 1;
        Ok(())
    }

    fn max_buffered_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(ColumnWriter::buffered_bytes)
            .max()
            .unwrap_or(0)
    }

    /// Flushes every column at the same record boundary.
    fn flush_blocks(&mut self) -> Result<()> {
        self.opts.cancel.check()?;
        trace!(records = self.pending, "flushing synchronized block");
        for column in &mut self.columns {
            column.flush()?;
        }
        self.pending = 0;
        Ok(())
    }

    /// Finishes every column and publishes the shard by writing its index
    /// file last. On failure the columns are still finalized best-effort and
    /// the shard index is withheld, so readers never see a partial shard.
    pub fn close(mut self) -> Result<()> {
        if let Some(reason) = self.failed.take() {
            // Dead shard: release file resources without publishing.
            for column in &mut self.columns {
                let _ = column.finish();
            }
            return Err(WriteError::ShardFailed { reason }.into());
        }

        let mut first_err: Option<Error> = None;
        if let Err(err) = self.opts.cancel.check() {
            first_err = Some(err);
        }
        for column in &mut self.columns {
            // Finalize every column even after a failure, to release them.
            if let Err(err) = column.finish() {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        write_shard_index(&self.dir, &ShardIndex::new(self.range, self.header.clone()))?;
        debug!(dir = %self.dir.display(), range = %self.range, "published shard");
        Ok(())
    }
}

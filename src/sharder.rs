//! Read-sharder
//!
//! Given a dataset, a query range, and a field set, the sharder produces a
//! list of non-overlapping coordinate ranges that partition the query range
//! and cover roughly equal on-disk bytes each. Callers hand the ranges to
//! independent readers for parallel scans.
//!
//! Byte costs come from the field indexes: for each row-shard the largest
//! selected field is sampled, since it carries the densest offset samples,
//! and its offset span is scaled by the ratio of total to sampled field
//! bytes.

use std::fs;
use std::path::Path;

use tracing::{debug, trace};

use crate::coord::{
    block_intersects_range, validate_coord_range, Coord, CoordRange, UNMAPPED_REFID,
};
use crate::error::{CorruptionError, Result};
use crate::path::{field_data_path, find_index_files_in_range, shard_index_path, FileInfo};
use crate::record::Field;
use crate::shard::{read_field_index, BlockIndexEntry};

/// Options for [`generate_read_shards`].
#[derive(Debug, Clone, Default)]
pub struct ReadShardOpts {
    /// The query range to partition. Unset means the universal range.
    pub range: CoordRange,

    /// Allow splitting a run of mapped reads sharing one `(refid, pos)`
    /// across shards. Evens out shard sizes, but the caller must cope with
    /// split runs.
    pub split_mapped: bool,

    /// Allow splitting a run of unmapped reads across shards.
    pub split_unmapped: bool,

    /// Force a shard boundary at the start of the unmapped bucket, so no
    /// shard mixes mapped and unmapped reads.
    pub always_split_mapped_and_unmapped: bool,

    /// Target shard size in bytes across all selected fields. Takes
    /// precedence over `num_shards`.
    pub bytes_per_shard: Option<u64>,

    /// Target shard count. When neither target is set, four shards per CPU
    /// are produced.
    pub num_shards: Option<usize>,
}

/// Index data derived from one row-shard, as consumed by the sharder.
#[derive(Debug, Clone)]
pub struct ShardSummary {
    /// The row-shard's coordinate range
    pub range: CoordRange,
    /// Estimated bytes across all selected fields for the queried blocks
    pub approx_bytes: u64,
    /// The sampled field's blocks intersecting the query range
    pub blocks: Vec<BlockIndexEntry>,
}

fn field_file_size(dir: &Path, range: CoordRange, field: Field) -> u64 {
    let path = field_data_path(dir, range, field);
    match fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            trace!(path = %path.display(), %err, "stat failed, counting zero bytes");
            0
        }
    }
}

/// Reads the shard summaries for every row-shard of the dataset at `dir`
/// intersecting `range`. An empty result means the range holds no records.
pub fn read_indexes(dir: &Path, range: CoordRange, fields: &[Field]) -> Result<Vec<ShardSummary>> {
    let mut range = range;
    validate_coord_range(&mut range)?;
    let files = find_index_files_in_range(dir, &range)?;

    let mut summaries = Vec::with_capacity(files.len());
    for file in &files {
        if let Some(summary) = summarize_shard(file, &range, fields)? {
            summaries.push(summary);
        }
    }
    if summaries.is_empty() {
        debug!(dir = %dir.display(), %range, "no intersecting index found");
    }
    Ok(summaries)
}

fn summarize_shard(
    file: &FileInfo,
    range: &CoordRange,
    fields: &[Field],
) -> Result<Option<ShardSummary>> {
    // Pick the largest field to sample record coordinates and file offsets
    // from; it has the most blocks to choose boundaries at.
    let mut sampled_field = Field::Coord;
    let mut sampled_size = -1i64;
    let mut total_bytes = 0u64;
    for &field in fields {
        let size = field_file_size(&file.dir, file.range, field);
        if size as i64 > sampled_size {
            sampled_field = field;
            sampled_size = size as i64;
        }
        total_bytes += size;
    }

    let index = read_field_index(&field_data_path(&file.dir, file.range, sampled_field))?;
    let blocks: Vec<BlockIndexEntry> = index
        .blocks
        .into_iter()
        .filter(|b| {
            let keep = block_intersects_range(b.start_addr, b.end_addr, range);
            if !keep {
                trace!(start = %b.start_addr, end = %b.end_addr, %range, "dropping block");
            }
            keep
        })
        .collect();
    if blocks.is_empty() {
        // The shard holds no queried records. This can happen because block
        // coordinates need not start at the shard range's start.
        return Ok(None);
    }

    let min_offset = blocks[0].file_offset;
    let max_offset = blocks[blocks.len() - 1].file_offset;
    if min_offset > max_offset {
        return Err(CorruptionError::DecreasingOffsets {
            prev: min_offset,
            next: max_offset,
        }
        .into());
    }
    if sampled_size <= 0 {
        // A readable, nonempty index inside a zero-byte file.
        return Err(CorruptionError::EmptySampledField(
            shard_index_path(&file.dir, file.range).display().to_string(),
        )
        .into());
    }
    let span = (max_offset - min_offset) as f64;
    let scale = total_bytes as f64 / sampled_size as f64;
    Ok(Some(ShardSummary {
        range: file.range,
        approx_bytes: (span * scale) as u64,
        blocks,
    }))
}

/// Accumulates output shard ranges, splitting at the mapped/unmapped
/// boundary when requested.
struct Bounds {
    out: Vec<CoordRange>,
    prev_limit: Coord,
    always_split_mapped_and_unmapped: bool,
}
impl Bounds {
    fn push_limit(&mut self, limit: Coord) {
        if limit <= self.prev_limit {
            return;
        }
        let unmapped = Coord::unmapped_start();
        if self.always_split_mapped_and_unmapped
            && self.prev_limit < unmapped
            && limit > unmapped
        {
            self.out.push(CoordRange::new(self.prev_limit, unmapped));
            self.out.push(CoordRange::new(unmapped, limit));
        } else {
            self.out.push(CoordRange::new(self.prev_limit, limit));
        }
        trace!(bounds = self.out.len(), %limit, "closed read shard");
        self.prev_limit = limit;
    }
}

/// Computes read-shard ranges from the summaries produced by
/// [`read_indexes`].
///
/// The returned ranges partition `opts.range` exactly, sorted in ascending
/// coordinate order. Their count is at least the derived target but may
/// exceed it, because shards are also closed at every row-shard limit and
/// splits are suppressed inside coord-runs unless the matching split flag is
/// set. With no summaries the whole query range is returned as the single
/// shard.
pub fn generate_read_shards(
    opts: &ReadShardOpts,
    indexes: &[ShardSummary],
) -> Result<Vec<CoordRange>> {
    let mut query = opts.range;
    validate_coord_range(&mut query)?;
    if indexes.is_empty() {
        debug!(%query, "no intersecting index; returning the query range whole");
        return Ok(vec![query]);
    }

    let total_blocks: usize = indexes.iter().map(|ix| ix.blocks.len()).sum();
    let total_bytes: u64 = indexes.iter().map(|ix| ix.approx_bytes).sum();

    let n_shards = match (opts.bytes_per_shard, opts.num_shards) {
        (Some(bytes), _) if bytes > 0 => (total_bytes / bytes) as usize,
        (_, Some(n)) if n > 0 => n,
        _ => num_cpus::get() * 4,
    };
    debug!(
        n_shards,
        total_blocks, total_bytes, "generating read shards"
    );
    let target_blocks_per_shard = total_blocks as f64 / n_shards as f64;

    let mut bounds = Bounds {
        out: Vec::new(),
        prev_limit: query.start,
        always_split_mapped_and_unmapped: opts.always_split_mapped_and_unmapped,
    };
    let mut n_blocks = 0usize;
    for index in indexes {
        trace!(range = %index.range, bytes = index.approx_bytes, "walking shard");
        for (block_index, block) in index.blocks.iter().enumerate() {
            if block_index > 0
                && n_blocks as f64 > (bounds.out.len() + 1) as f64 * target_blocks_per_shard
            {
                // Candidate boundary at the start of this block. Reject it
                // when the previous block ends on the same locus and the
                // matching split flag is off; splitting there would tear a
                // coord-run apart.
                let limit_addr = block.start_addr;
                let prev_end = index.blocks[block_index - 1].end_addr;
                if prev_end.same_locus(&limit_addr) {
                    if prev_end.refid != UNMAPPED_REFID && !opts.split_mapped {
                        trace!(at = %limit_addr, "skipping split inside mapped run");
                        continue;
                    }
                    if prev_end.refid == UNMAPPED_REFID && !opts.split_unmapped {
                        trace!(at = %limit_addr, "skipping split inside unmapped run");
                        continue;
                    }
                }
                bounds.push_limit(limit_addr);
            }
            n_blocks += 1;
        }
        // Readers perform best when aligned to row-shard files, so always
        // close the read shard at the row-shard limit.
        bounds.push_limit(index.range.limit.min(query.limit));
    }
    Ok(bounds.out)
}

/// Convenience wrapper reading the indexes under `dir` and generating read
/// shards in one step.
pub fn plan_read_shards(
    dir: &Path,
    opts: &ReadShardOpts,
    fields: &[Field],
) -> Result<Vec<CoordRange>> {
    let indexes = read_indexes(dir, opts.range, fields)?;
    generate_read_shards(opts, &indexes)
}

//! Range queries across a whole dataset
//!
//! A dataset directory holds one or more row-shards with non-overlapping
//! ranges. [`DatasetReader`] finds every shard intersecting a query range
//! and concatenates their readers in coordinate order; since the shards are
//! ordered and disjoint, the concatenation yields globally ordered records.

use std::path::{Path, PathBuf};
use std::vec;

use tracing::debug;

use crate::coord::{validate_coord_range, CoordRange};
use crate::error::Result;
use crate::path::{find_index_files_in_range, list_index_files, shard_index_path, FileInfo};
use crate::record::{Field, Record};
use crate::shard::{read_shard_index, ReadOpts, ShardReader};

/// Iterator over every record of a dataset inside a query range, in
/// ascending coordinate order across row-shards.
///
/// A query intersecting no shard yields an empty iteration, not an error.
/// Like [`ShardReader`], the iterator is fused around failure.
pub struct DatasetReader {
    dir: PathBuf,
    query: CoordRange,
    fields: Vec<Field>,
    shards: vec::IntoIter<FileInfo>,
    current: Option<ShardReader>,
    opts: ReadOpts,
    done: bool,
}
impl DatasetReader {
    /// Opens the dataset at `dir` for `query` over the given fields.
    pub fn open(dir: impl AsRef<Path>, query: CoordRange, fields: &[Field]) -> Result<Self> {
        Self::with_opts(dir, query, fields, ReadOpts::default())
    }

    pub fn with_opts(
        dir: impl AsRef<Path>,
        mut query: CoordRange,
        fields: &[Field],
        opts: ReadOpts,
    ) -> Result<Self> {
        validate_coord_range(&mut query)?;
        let dir = dir.as_ref().to_path_buf();
        let shards = find_index_files_in_range(&dir, &query)?;
        debug!(dir = %dir.display(), %query, shards = shards.len(), "opened dataset reader");
        Ok(Self {
            dir,
            query,
            fields: fields.to_vec(),
            shards: shards.into_iter(),
            current: None,
            opts,
            done: false,
        })
    }

    /// Collects every remaining record, surfacing the first error.
    pub fn collect_records(self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for item in self {
            records.push(item?);
        }
        Ok(records)
    }
}

impl Iterator for DatasetReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(reader) = &mut self.current {
                match reader.next() {
                    Some(Ok(record)) => return Some(Ok(record)),
                    Some(Err(err)) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                    None => self.current = None,
                }
            }
            let Some(info) = self.shards.next() else {
                self.done = true;
                return None;
            };
            match ShardReader::with_opts(
                &self.dir,
                info.range,
                self.query,
                &self.fields,
                self.opts.clone(),
            ) {
                Ok(reader) => self.current = Some(reader),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Reads the opaque dataset header blob, replicated in every shard index.
/// Returns `None` for a directory holding no shards.
pub fn read_dataset_header(dir: &Path) -> Result<Option<Vec<u8>>> {
    let files = list_index_files(dir)?;
    let Some(first) = files.first() else {
        return Ok(None);
    };
    let index = read_shard_index(&shard_index_path(&first.dir, first.range))?;
    Ok(Some(index.header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Coord, INFINITY_REFID};
    use crate::shard::{ShardWriter, WriterOpts};
    use parking_lot::Mutex;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const FIELDS: [Field; 3] = [Field::Flags, Field::Seq, Field::Qual];

    fn make_records(refids: std::ops::Range<i32>, per_refid: i32) -> Vec<Record> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut records = Vec::new();
        for refid in refids {
            for pos in 0..per_refid {
                let n: usize = rng.random_range(1..=8);
                records.push(
                    Record::new(Coord::new(refid, pos * 3, 0))
                        .with(Field::Flags, vec![(pos % 251) as u8])
                        .with(Field::Seq, vec![b"ACGT"[n % 4]; n])
                        .with(Field::Qual, vec![b'I'; n]),
                );
            }
        }
        records
    }

    fn shard_ranges() -> [CoordRange; 2] {
        let split = Coord::new(2, 0, 0);
        [
            CoordRange::new(Coord::zero(), split),
            CoordRange::new(split, Coord::infinity()),
        ]
    }

    fn write_dataset(dir: &Path, records: &[Record], records_per_block: usize) {
        let opts = WriterOpts {
            records_per_block,
            ..WriterOpts::default()
        };
        for range in shard_ranges() {
            let mut writer =
                ShardWriter::with_opts(dir, range, b"@HD demo", &FIELDS, opts.clone()).unwrap();
            for record in records.iter().filter(|r| range.contains(r.coord)) {
                writer.append(record).unwrap();
            }
            writer.close().unwrap();
        }
    }

    // ==================== Multi-Shard Query Tests ====================

    #[test]
    fn test_universal_query_spans_shards_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let records = make_records(0..4, 40);
        write_dataset(dir.path(), &records, 16);

        let reader = DatasetReader::open(dir.path(), CoordRange::universal(), &FIELDS).unwrap();
        let got = reader.collect_records().unwrap();
        assert_eq!(got, records);
    }

    #[test]
    fn test_range_query_across_shard_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let records = make_records(0..4, 40);
        write_dataset(dir.path(), &records, 16);

        let query = CoordRange::new(Coord::new(1, 60, 0), Coord::new(2, 30, 0));
        let reader = DatasetReader::open(dir.path(), query, &FIELDS).unwrap();
        let got = reader.collect_records().unwrap();
        let expected: Vec<_> = records
            .iter()
            .filter(|r| query.contains(r.coord))
            .cloned()
            .collect();
        assert!(!expected.is_empty());
        assert_eq!(got, expected);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reader =
            DatasetReader::open(dir.path(), CoordRange::universal(), &[Field::Flags]).unwrap();
        assert!(reader.collect_records().unwrap().is_empty());
    }

    #[test]
    fn test_nonintersecting_query_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let records = make_records(0..2, 10);
        write_dataset(dir.path(), &records, 8);
        let query = CoordRange::new(
            Coord::new(INFINITY_REFID - 2, 0, 0),
            Coord::new(INFINITY_REFID - 1, 0, 0),
        );
        let reader = DatasetReader::open(dir.path(), query, &FIELDS).unwrap();
        assert!(reader.collect_records().unwrap().is_empty());
    }

    // ==================== Header Tests ====================

    #[test]
    fn test_read_dataset_header() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &make_records(0..3, 5), 8);
        let header = read_dataset_header(dir.path()).unwrap();
        assert_eq!(header.as_deref(), Some(&b"@HD demo"[..]));
    }

    #[test]
    fn test_read_dataset_header_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_dataset_header(dir.path()).unwrap(), None);
    }

    // ==================== Determinism Tests ====================

    #[test]
    fn test_rewrite_is_byte_identical() {
        let records = make_records(0..3, 30);
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write_dataset(dir_a.path(), &records, 16);
        write_dataset(dir_b.path(), &records, 16);

        let mut names: Vec<String> = std::fs::read_dir(dir_a.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert!(!names.is_empty());
        for name in names {
            let a = std::fs::read(dir_a.path().join(&name)).unwrap();
            let b = std::fs::read(dir_b.path().join(&name)).unwrap();
            assert_eq!(a, b, "file {name} differs between identical writes");
        }
    }

    // ==================== Parallel Write Tests ====================

    #[test]
    fn test_parallel_shard_writes() {
        let dir = tempfile::tempdir().unwrap();
        let records = make_records(0..4, 25);
        let failures = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for range in shard_ranges() {
                let dir = dir.path();
                let records = &records;
                let failures = &failures;
                scope.spawn(move || {
                    let result = (|| -> crate::Result<()> {
                        let mut writer = ShardWriter::new(dir, range, b"hdr", &FIELDS)?;
                        for record in records.iter().filter(|r| range.contains(r.coord)) {
                            writer.append(record)?;
                        }
                        writer.close()
                    })();
                    if let Err(err) = result {
                        failures.lock().push(err.to_string());
                    }
                });
            }
        });
        assert!(failures.lock().is_empty());

        let reader = DatasetReader::open(dir.path(), CoordRange::universal(), &FIELDS).unwrap();
        assert_eq!(reader.collect_records().unwrap(), records);
    }

    // ==================== End-to-End Sharder Tests ====================

    #[test]
    fn test_planned_shards_partition_and_cover() {
        let dir = tempfile::tempdir().unwrap();
        let records = make_records(0..4, 60);
        write_dataset(dir.path(), &records, 8);

        let opts = crate::sharder::ReadShardOpts {
            num_shards: Some(5),
            ..Default::default()
        };
        let plan = crate::sharder::plan_read_shards(dir.path(), &opts, &FIELDS).unwrap();
        assert!(plan.len() >= 2);
        for window in plan.windows(2) {
            assert_eq!(window[0].limit, window[1].start);
        }
        assert_eq!(plan[0].start, Coord::zero());

        // Reading the planned sub-ranges back to back reproduces the full
        // dataset with no duplicate or dropped record.
        let mut got = Vec::new();
        for range in &plan {
            let reader = DatasetReader::open(dir.path(), *range, &FIELDS).unwrap();
            got.extend(reader.collect_records().unwrap());
        }
        assert_eq!(got, records);
    }
}

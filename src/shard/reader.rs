//! Row-shard reader
//!
//! A [`ShardReader`] reassembles records from the column files of one
//! row-shard. Because every column of a shard shares the same block table,
//! record `k` of a block refers to the same logical record in all of them:
//! the coord column decides which records fall inside the query range and
//! the remaining columns advance in lockstep.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::column::ColumnReader;
use crate::cancel::CancelToken;
use crate::coord::{validate_coord_range, CoordRange};
use crate::error::{CorruptionError, Error, Result};
use crate::path::field_data_path;
use crate::record::{Field, Record};

/// Tunables for a [`ShardReader`].
#[derive(Debug, Clone, Default)]
pub struct ReadOpts {
    /// Cancellation token polled at every block load
    pub cancel: CancelToken,
}

/// Reader over one row-shard, yielding records inside a query range in
/// ascending coordinate order.
///
/// The iterator is fused around failure: after yielding an `Err` it only
/// returns `None`.
#[derive(Debug)]
pub struct ShardReader {
    query: CoordRange,
    coord_col: ColumnReader,
    /// Requested non-coord columns; `None` marks a field the shard does not
    /// store, which reads back as an empty payload.
    columns: Vec<(Field, Option<ColumnReader>)>,
    done: bool,
}
impl ShardReader {
    /// Opens the shard stored under `dir` for `shard_range` and positions
    /// every requested column at the first block overlapping `query_range`.
    pub fn new(
        dir: impl AsRef<Path>,
        shard_range: CoordRange,
        query_range: CoordRange,
        fields: &[Field],
    ) -> Result<Self> {
        Self::with_opts(dir, shard_range, query_range, fields, ReadOpts::default())
    }

    pub fn with_opts(
        dir: impl AsRef<Path>,
        shard_range: CoordRange,
        mut query_range: CoordRange,
        fields: &[Field],
        opts: ReadOpts,
    ) -> Result<Self> {
        validate_coord_range(&mut query_range)?;
        let dir = dir.as_ref();

        let coord_path: PathBuf = field_data_path(dir, shard_range, Field::Coord);
        let mut coord_col =
            ColumnReader::open(dir, shard_range, Field::Coord, opts.cancel.clone())?.ok_or_else(
                || CorruptionError::MissingCoordColumn {
                    path: coord_path.display().to_string(),
                },
            )?;
        coord_col.seek(query_range.start);

        let mut columns = Vec::new();
        for &field in fields {
            if field == Field::Coord || columns.iter().any(|(f, _)| *f == field) {
                continue;
            }
            let column = ColumnReader::open(dir, shard_range, field, opts.cancel.clone())?;
            let column = column.map(|mut col| {
                col.seek(query_range.start);
                col
            });
            columns.push((field, column));
        }
        debug!(dir = %dir.display(), shard = %shard_range, query = %query_range, "opened shard reader");
        Ok(Self {
            query: query_range,
            coord_col,
            columns,
            done: false,
        })
    }

    fn next_inner(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(payload) = self.coord_col.next_value()? else {
                return Ok(None);
            };
            let coord = crate::coord::Coord::decode(payload)?;
            if coord >= self.query.limit {
                return Ok(None);
            }
            if coord < self.query.start {
                // The seek lands on a block boundary; records below the
                // query start are skipped in lockstep.
                for (_, column) in &mut self.columns {
                    if let Some(column) = column {
                        column.skip_value()?;
                    }
                }
                continue;
            }
            let mut record = Record::new(coord);
            for (field, column) in &mut self.columns {
                match column {
                    Some(column) => {
                        let value = column
                            .next_value()?
                            .ok_or(CorruptionError::ColumnDesync { field: *field })?;
                        record.set(*field, value.to_vec());
                    }
                    None => record.set(*field, Vec::new()),
                }
            }
            return Ok(Some(record));
        }
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

impl Iterator for ShardReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_inner() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use crate::shard::writer::{ShardWriter, WriterOpts};

    fn write_records(
        dir: &Path,
        range: CoordRange,
        fields: &[Field],
        records: &[Record],
        records_per_block: usize,
    ) {
        let opts = WriterOpts {
            records_per_block,
            ..WriterOpts::default()
        };
        let mut writer = ShardWriter::with_opts(dir, range, b"header", fields, opts).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.close().unwrap();
    }

    fn sample_records() -> Vec<Record> {
        let mut records = Vec::new();
        for (refid, pos, seq) in [
            (0, 5, 0),
            (1, 10, 0),
            (1, 10, 1),
            (1, 10, 2),
            (1, 11, 0),
            (2, 0, 0),
            (2, 7, 0),
        ] {
            records.push(
                Record::new(Coord::new(refid, pos, seq))
                    .with(Field::Flags, vec![pos as u8, seq as u8])
                    .with(Field::Name, format!("r{refid}:{pos}:{seq}").into_bytes()),
            );
        }
        records
    }

    // ==================== Roundtrip Tests ====================

    #[test]
    fn test_universal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fields = [Field::Flags, Field::Name];
        let records = sample_records();
        write_records(dir.path(), CoordRange::universal(), &fields, &records, 3);

        let reader = ShardReader::new(
            dir.path(),
            CoordRange::universal(),
            CoordRange::universal(),
            &fields,
        )
        .unwrap();
        let got = reader.collect_records().unwrap();
        assert_eq!(got, records);
    }

    #[test]
    fn test_roundtrip_with_duplicate_coords() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<_> = [(3, 10, 0), (3, 10, 1), (3, 10, 2), (3, 11, 0)]
            .into_iter()
            .map(|(r, p, s)| {
                Record::new(Coord::new(r, p, s)).with(Field::Flags, vec![s as u8])
            })
            .collect();
        write_records(
            dir.path(),
            CoordRange::universal(),
            &[Field::Flags],
            &records,
            2,
        );

        let reader = ShardReader::new(
            dir.path(),
            CoordRange::universal(),
            CoordRange::universal(),
            &[Field::Flags],
        )
        .unwrap();
        assert_eq!(reader.collect_records().unwrap(), records);
    }

    // ==================== Query Range Tests ====================

    #[test]
    fn test_query_range_filters_records() {
        let dir = tempfile::tempdir().unwrap();
        let fields = [Field::Flags, Field::Name];
        let records = sample_records();
        write_records(dir.path(), CoordRange::universal(), &fields, &records, 2);

        let query = CoordRange::new(Coord::new(1, 10, 1), Coord::new(2, 1, 0));
        let reader =
            ShardReader::new(dir.path(), CoordRange::universal(), query, &fields).unwrap();
        let got = reader.collect_records().unwrap();
        let expected: Vec<_> = records
            .iter()
            .filter(|r| query.contains(r.coord))
            .cloned()
            .collect();
        assert_eq!(got, expected);
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn test_query_before_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records();
        write_records(
            dir.path(),
            CoordRange::universal(),
            &[Field::Flags],
            &records,
            3,
        );
        let query = CoordRange::new(Coord::new(9, 0, 0), Coord::infinity());
        let reader = ShardReader::new(dir.path(), CoordRange::universal(), query, &[Field::Flags])
            .unwrap();
        assert!(reader.collect_records().unwrap().is_empty());
    }

    // ==================== Missing Field Tests ====================

    #[test]
    fn test_absent_field_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records();
        write_records(
            dir.path(),
            CoordRange::universal(),
            &[Field::Flags],
            &records,
            3,
        );

        let reader = ShardReader::new(
            dir.path(),
            CoordRange::universal(),
            CoordRange::universal(),
            &[Field::Flags, Field::Qual],
        )
        .unwrap();
        let got = reader.collect_records().unwrap();
        assert_eq!(got.len(), records.len());
        for record in &got {
            assert_eq!(record.get(Field::Qual), b"");
            assert!(!record.get(Field::Flags).is_empty());
        }
    }

    #[test]
    fn test_missing_coord_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShardReader::new(
            dir.path(),
            CoordRange::universal(),
            CoordRange::universal(),
            &[Field::Flags],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptionError(CorruptionError::MissingCoordColumn { .. })
        ));
    }

    // ==================== Cancellation Tests ====================

    #[test]
    fn test_cancelled_reader() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample_records();
        write_records(
            dir.path(),
            CoordRange::universal(),
            &[Field::Flags],
            &records,
            3,
        );
        let opts = ReadOpts::default();
        let token = opts.cancel.clone();
        let mut reader = ShardReader::with_opts(
            dir.path(),
            CoordRange::universal(),
            CoordRange::universal(),
            &[Field::Flags],
            opts,
        )
        .unwrap();
        token.cancel();
        assert!(matches!(reader.next(), Some(Err(Error::Cancelled))));
        assert!(reader.next().is_none());
    }
}

use crate::coord::{Coord, CoordRange};
use crate::record::Field;

/// Custom Result type for pamseq operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the pamseq library, encompassing all possible error
/// cases that can occur while writing, reading, or sharding a PAM dataset.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors raised while parsing dataset file names
    #[error("Error parsing path: {0}")]
    PathError(#[from] PathError),

    /// A coordinate range whose limit precedes its start
    #[error("Invalid coordinate range [{start},{limit})")]
    InvalidRange { start: Coord, limit: Coord },

    /// Errors caused by malformed on-disk data
    #[error("Corrupt data: {0}")]
    CorruptionError(#[from] CorruptionError),

    /// Errors that occur during shard write operations
    #[error("Error writing shard: {0}")]
    WriteError(#[from] WriteError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// The cancellation token fired before the operation completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Conversion errors from anyhow errors
    #[cfg(feature = "anyhow")]
    #[error("Generic error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

/// Errors raised while decoding dataset file names
///
/// Dataset files are named `<range>.index` or `<range>.<field>`; anything
/// else under a dataset directory is rejected with one of these.
#[derive(thiserror::Error, Debug)]
pub enum PathError {
    /// The path has no parseable `<range>.<type>` file name
    #[error("Cannot parse file name: {0}")]
    InvalidFileName(String),

    /// The file extension is not `index` and not a known field name
    #[error("Unknown field name in path: {0}")]
    UnknownField(String),

    /// The range component of the file name does not parse
    #[error("Cannot parse coordinate range: {0}")]
    InvalidRangeEncoding(String),
}

/// Errors caused by on-disk state that violates the format invariants
#[derive(thiserror::Error, Debug)]
pub enum CorruptionError {
    /// The magic number of a shard index file does not match
    #[error("{path}: invalid shard index magic")]
    ShardIndexMagic { path: String },

    /// The magic number of a field index trailer does not match
    #[error("{path}: invalid field index magic")]
    FieldIndexMagic { path: String },

    /// The format version does not match the supported version
    #[error("{path}: wrong format version {found}; expect {expected}")]
    VersionMismatch {
        path: String,
        found: u32,
        expected: u32,
    },

    /// A block header with an unexpected magic number
    #[error("invalid block magic at offset {offset}")]
    BlockMagic { offset: u64 },

    /// The file is too short to hold an index trailer
    #[error("{path}: file does not contain an index trailer")]
    MissingTrailer { path: String },

    /// A length field points outside the file
    #[error("{path}: truncated file")]
    Truncated { path: String },

    /// A block index entry claiming zero records
    #[error("corrupt block index: block with zero records")]
    EmptyBlock,

    /// Block file offsets that do not increase monotonically
    #[error("corrupt block index: decreasing file offsets ({prev} > {next})")]
    DecreasingOffsets { prev: u64, next: u64 },

    /// Block coordinate intervals that overlap or run backwards
    #[error("corrupt block index: non-monotone block coords ({prev} then {next})")]
    NonMonotoneBlocks { prev: Coord, next: Coord },

    /// Decompressed payload length disagrees with the recorded length
    #[error("block payload length mismatch: got {got}, expected {expected}")]
    PayloadSizeMismatch { got: usize, expected: usize },

    /// The serialized block table is not a whole number of entries
    #[error("field index size is not a multiple of the entry size: {0}")]
    IndexSize(usize),

    /// A record frame extends past the end of its block payload
    #[error("corrupt record frame in block")]
    TruncatedRecord,

    /// A coord column payload with the wrong length
    #[error("coord payload has {0} bytes")]
    CoordPayload(usize),

    /// A non-coord column ran out of records before the coord column
    #[error("column '{field}' exhausted before coord column")]
    ColumnDesync { field: Field },

    /// A shard directory entry without its mandatory coord column
    #[error("{path}: missing coord column")]
    MissingCoordColumn { path: String },

    /// The sampled field file was empty even though its index was readable
    #[error("{0}: sampled field file size is zero")]
    EmptySampledField(String),
}

/// Errors raised by the shard writer
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The record coordinate falls outside the shard range
    #[error("coord {coord} out of shard range [{range})")]
    CoordOutOfRange { coord: Coord, range: CoordRange },

    /// Records must arrive in non-decreasing coordinate order
    #[error("coord decreased: {next} arrived after {prev}")]
    CoordDecreased { prev: Coord, next: Coord },

    /// A previous operation on this shard failed; the shard is dead
    #[error("shard writer already failed: {reason}")]
    ShardFailed { reason: String },

    /// A previous operation on this column failed
    #[error("column '{field}' writer already failed")]
    ColumnFailed { field: Field },
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Error Conversion Tests ====================

    #[test]
    fn test_error_from_path_error() {
        let err: Error = PathError::InvalidFileName("foo".to_string()).into();
        assert!(matches!(err, Error::PathError(_)));
    }

    #[test]
    fn test_error_from_corruption_error() {
        let err: Error = CorruptionError::EmptyBlock.into();
        assert!(matches!(err, Error::CorruptionError(_)));
    }

    #[test]
    fn test_error_from_write_error() {
        let err: Error = WriteError::CoordDecreased {
            prev: Coord::new(1, 2, 0),
            next: Coord::new(1, 1, 0),
        }
        .into();
        assert!(matches!(err, Error::WriteError(_)));
    }

    #[test]
    fn test_error_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IoError(_)));
    }

    // ==================== Display Tests ====================

    #[test]
    fn test_version_mismatch_message() {
        let err = CorruptionError::VersionMismatch {
            path: "d/0:0,-:0.index".to_string(),
            found: 9,
            expected: 1,
        };
        let msg = format!("{err}");
        assert!(msg.contains("d/0:0,-:0.index"));
        assert!(msg.contains('9'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn test_coord_decreased_message() {
        let err = WriteError::CoordDecreased {
            prev: Coord::new(2, 100, 1),
            next: Coord::new(2, 99, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("2:100:1"));
        assert!(msg.contains("2:99"));
    }
}

//! Dataset file naming
//!
//! A dataset directory holds two file families, both named by the coordinate
//! range they cover:
//!
//! - `<range>.index` for the shard index of one row-shard
//! - `<range>.<field>` for one field column of that row-shard
//!
//! where `<range>` is the `start,limit` form produced by
//! [`CoordRange`]'s `Display` (`refid:pos[:seq]` per endpoint, `-` for the
//! infinity refid). Ranges never contain dots, so the file type is whatever
//! follows the last dot.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::coord::CoordRange;
use crate::error::{PathError, Result};
use crate::record::Field;

/// The two kinds of files making up a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A `<range>.index` shard-index file
    ShardIndex,
    /// A `<range>.<field>` field-column file
    FieldData,
}

/// A parsed dataset file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_type: FileType,
    /// The directory holding the file
    pub dir: PathBuf,
    /// The coordinate range embedded in the file name
    pub range: CoordRange,
    /// The column, for [`FileType::FieldData`] files
    pub field: Option<Field>,
}

/// Path of the shard-index file for `range` under `dir`.
#[must_use]
pub fn shard_index_path(dir: &Path, range: CoordRange) -> PathBuf {
    dir.join(format!("{range}.index"))
}

/// Path of the `field` column file for `range` under `dir`.
#[must_use]
pub fn field_data_path(dir: &Path, range: CoordRange, field: Field) -> PathBuf {
    dir.join(format!("{range}.{field}"))
}

/// Decodes a dataset file path into its components.
pub fn parse_path(path: &Path) -> Result<FileInfo> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PathError::InvalidFileName(path.display().to_string()))?;
    let (range_str, ext) = name
        .rsplit_once('.')
        .ok_or_else(|| PathError::InvalidFileName(path.display().to_string()))?;
    let range: CoordRange = range_str.parse()?;
    let dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    match ext {
        "index" => Ok(FileInfo {
            file_type: FileType::ShardIndex,
            dir,
            range,
            field: None,
        }),
        name => match Field::parse(name) {
            Some(field) => Ok(FileInfo {
                file_type: FileType::FieldData,
                dir,
                range,
                field: Some(field),
            }),
            None => Err(PathError::UnknownField(path.display().to_string()).into()),
        },
    }
}

/// Lists every shard-index file under `dir`, sorted by range start.
///
/// Entries that do not parse as dataset files are skipped, so a dataset can
/// coexist with unrelated files.
pub fn list_index_files(dir: &Path) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match parse_path(&path) {
            Ok(info) if info.file_type == FileType::ShardIndex => files.push(info),
            Ok(_) => {}
            Err(_) => trace!(path = %path.display(), "skipping non-dataset file"),
        }
    }
    files.sort_by(|a, b| a.range.start.cmp(&b.range.start));
    Ok(files)
}

/// The subset of `files` whose embedded range intersects `range`.
///
/// Expects shard-index entries, e.g. the output of [`list_index_files`].
#[must_use]
pub fn choose_index_files_in_range(files: Vec<FileInfo>, range: &CoordRange) -> Vec<FileInfo> {
    files
        .into_iter()
        .inspect(|fi| debug_assert_eq!(fi.file_type, FileType::ShardIndex))
        .filter(|fi| fi.range.intersects(range))
        .collect()
}

/// Lists the shard-index files under `dir` whose range intersects `range`,
/// sorted by range start.
pub fn find_index_files_in_range(dir: &Path, range: &CoordRange) -> Result<Vec<FileInfo>> {
    Ok(choose_index_files_in_range(list_index_files(dir)?, range))
}

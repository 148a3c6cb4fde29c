//! Genomic coordinates and half-open coordinate ranges
//!
//! Every record in a PAM dataset is addressed by a `(refid, pos, seq)`
//! triple. `refid` names a reference contig, `pos` is the 0-based alignment
//! position on it, and `seq` disambiguates records that share the same
//! `(refid, pos)`. Two refid values are reserved: [`UNMAPPED_REFID`] buckets
//! reads without an alignment and sorts after every real contig, and
//! [`INFINITY_REFID`] is the upper sentinel used by range limits.
//!
//! Coordinates also serialize into dataset file names, so [`Coord`] and
//! [`CoordRange`] carry `Display`/`FromStr` implementations producing the
//! `refid:pos[:seq]` and `start,limit` forms used on disk.

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CorruptionError, Error, PathError, Result};

/// The refid bucketing reads that have no alignment. Sorts after every real
/// contig but before [`INFINITY_REFID`].
pub const UNMAPPED_REFID: i32 = -1;

/// The upper-sentinel refid. No record carries it; it only appears as the
/// limit of a coordinate range.
pub const INFINITY_REFID: i32 = i32::MAX;

/// Number of bytes in the on-disk little-endian coord encoding.
pub(crate) const COORD_ENCODED_LEN: usize = 12;

/// The address of one record: reference contig, position, and a sequence
/// number separating records that share a position.
///
/// This is stored identically in memory and on disk inside index entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Coord {
    pub refid: i32,
    pub pos: i32,
    pub seq: i32,
}
impl Coord {
    #[must_use]
    pub const fn new(refid: i32, pos: i32, seq: i32) -> Self {
        Self { refid, pos, seq }
    }

    /// The smallest coordinate, `(0, 0, 0)`.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// The upper sentinel, `(INFINITY, 0, 0)`.
    #[must_use]
    pub const fn infinity() -> Self {
        Self::new(INFINITY_REFID, 0, 0)
    }

    /// The first coordinate of the unmapped bucket, `(UNMAPPED, 0, 0)`.
    #[must_use]
    pub const fn unmapped_start() -> Self {
        Self::new(UNMAPPED_REFID, 0, 0)
    }

    #[must_use]
    pub const fn is_unmapped(&self) -> bool {
        self.refid == UNMAPPED_REFID
    }

    /// Whether two coordinates name the same `(refid, pos)` locus,
    /// ignoring the sequence number. Records sharing a locus form a
    /// coord-run that block boundaries must not split.
    #[must_use]
    pub const fn same_locus(&self, other: &Self) -> bool {
        self.refid == other.refid && self.pos == other.pos
    }

    /// Maps a refid onto a rank that sorts real contigs first, then the
    /// unmapped bucket, then the infinity sentinel.
    const fn refid_rank(refid: i32) -> i64 {
        match refid {
            INFINITY_REFID => i64::MAX,
            UNMAPPED_REFID => i64::MAX - 1,
            r => r as i64,
        }
    }

    fn key(&self) -> (i64, i32, i32) {
        (Self::refid_rank(self.refid), self.pos, self.seq)
    }

    /// Three-way comparison in the dataset's total order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    /// Writes the 12-byte little-endian encoding used by the coord column.
    pub(crate) fn encode_into<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.refid)?;
        w.write_i32::<LittleEndian>(self.pos)?;
        w.write_i32::<LittleEndian>(self.seq)?;
        Ok(())
    }

    /// Decodes the 12-byte little-endian coord column payload.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COORD_ENCODED_LEN {
            return Err(CorruptionError::CoordPayload(bytes.len()).into());
        }
        let mut rdr = bytes;
        Ok(Self {
            refid: rdr.read_i32::<LittleEndian>()?,
            pos: rdr.read_i32::<LittleEndian>()?,
            seq: rdr.read_i32::<LittleEndian>()?,
        })
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.refid == INFINITY_REFID {
            write!(f, "-:{}", self.pos)?;
        } else {
            write!(f, "{}:{}", self.refid, self.pos)?;
        }
        if self.seq != 0 {
            write!(f, ":{}", self.seq)?;
        }
        Ok(())
    }
}

impl FromStr for Coord {
    type Err = PathError;

    fn from_str(s: &str) -> std::result::Result<Self, PathError> {
        let bad = || PathError::InvalidRangeEncoding(s.to_string());
        let mut parts = s.split(':');
        let refid = match parts.next().ok_or_else(bad)? {
            "-" => INFINITY_REFID,
            tok => tok.parse().map_err(|_| bad())?,
        };
        let pos = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let seq = match parts.next() {
            Some(tok) => tok.parse().map_err(|_| bad())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self { refid, pos, seq })
    }
}

/// A half-open interval of coordinates, `[start, limit)`.
///
/// This is stored identically in memory and on disk inside the shard index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct CoordRange {
    pub start: Coord,
    pub limit: Coord,
}
impl CoordRange {
    #[must_use]
    pub const fn new(start: Coord, limit: Coord) -> Self {
        Self { start, limit }
    }

    /// The range covering every possible record, `[(0,0,0), (INF,0,0))`.
    #[must_use]
    pub const fn universal() -> Self {
        Self::new(Coord::zero(), Coord::infinity())
    }

    #[must_use]
    pub fn contains(&self, coord: Coord) -> bool {
        self.start <= coord && coord < self.limit
    }

    /// Whether two half-open ranges share at least one coordinate.
    #[must_use]
    pub fn intersects(&self, other: &CoordRange) -> bool {
        self.start < other.limit && other.start < self.limit
    }
}

impl fmt::Display for CoordRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.limit)
    }
}

impl FromStr for CoordRange {
    type Err = PathError;

    fn from_str(s: &str) -> std::result::Result<Self, PathError> {
        let (start, limit) = s
            .split_once(',')
            .ok_or_else(|| PathError::InvalidRangeEncoding(s.to_string()))?;
        Ok(Self {
            start: start.parse()?,
            limit: limit.parse()?,
        })
    }
}

/// Whether the inclusive block interval `[block_start, block_end]`
/// intersects the half-open range `r`.
#[must_use]
pub fn block_intersects_range(block_start: Coord, block_end: Coord, r: &CoordRange) -> bool {
    r.start <= block_end && block_start < r.limit
}

/// Rejects ranges whose limit precedes their start and normalizes the unset
/// (all-zero) range to the universal range.
pub fn validate_coord_range(r: &mut CoordRange) -> Result<()> {
    if *r == CoordRange::default() {
        *r = CoordRange::universal();
        return Ok(());
    }
    if r.limit < r.start {
        return Err(Error::InvalidRange {
            start: r.start,
            limit: r.limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Ordering Tests ====================

    #[test]
    fn test_compare_refid_then_pos() {
        assert!(Coord::new(0, 2, 0) < Coord::new(1, 2, 0));
        assert!(Coord::new(1, 1, 0) < Coord::new(1, 2, 0));
        assert!(Coord::new(1, 2, 0) < Coord::new(1, 2, 1));
        assert!(Coord::new(0, 1, 0) >= Coord::new(0, 1, 0));
    }

    #[test]
    fn test_compare_sentinels() {
        let real = Coord::new(0, 2, 0);
        let big = Coord::new(INFINITY_REFID - 1, 0, 0);
        let unmapped = Coord::unmapped_start();
        let inf = Coord::infinity();
        assert!(real < inf);
        assert!(big < unmapped);
        assert!(unmapped < inf);
        assert!(real < unmapped);
    }

    #[test]
    fn test_min_max() {
        let a = Coord::new(3, 5, 0);
        let b = Coord::unmapped_start();
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
    }

    // ==================== Range Tests ====================

    #[test]
    fn test_contains_half_open() {
        let r = CoordRange::new(Coord::new(10, 20, 0), Coord::new(15, 5, 0));
        assert!(!r.contains(Coord::new(10, 19, 0)));
        assert!(r.contains(Coord::new(10, 20, 0)));
        assert!(r.contains(Coord::new(15, 4, 0)));
        assert!(!r.contains(Coord::new(15, 5, 0)));
    }

    #[test]
    fn test_intersects() {
        let a = CoordRange::new(Coord::new(1, 0, 0), Coord::new(2, 0, 0));
        let b = CoordRange::new(Coord::new(1, 500, 0), Coord::new(3, 0, 0));
        let c = CoordRange::new(Coord::new(2, 0, 0), Coord::new(3, 0, 0));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(a.intersects(&CoordRange::universal()));
    }

    #[test]
    fn test_block_intersects_range() {
        let start = Coord::new(3, 2, 0);
        let end = Coord::new(10, 5, 0);
        let touching = CoordRange::new(Coord::new(10, 5, 0), Coord::new(11, 0, 0));
        let above = CoordRange::new(Coord::new(10, 6, 0), Coord::new(11, 0, 0));
        assert!(block_intersects_range(start, end, &touching));
        assert!(!block_intersects_range(start, end, &above));
    }

    #[test]
    fn test_validate_rejects_inverted() {
        let mut r = CoordRange::new(Coord::new(2, 0, 0), Coord::new(1, 0, 0));
        assert!(matches!(
            validate_coord_range(&mut r),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_validate_normalizes_unset() {
        let mut r = CoordRange::default();
        validate_coord_range(&mut r).unwrap();
        assert_eq!(r, CoordRange::universal());
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_display_omits_zero_seq() {
        assert_eq!(Coord::new(3, 123, 0).to_string(), "3:123");
        assert_eq!(Coord::new(3, 123, 7).to_string(), "3:123:7");
        assert_eq!(Coord::infinity().to_string(), "-:0");
        assert_eq!(Coord::unmapped_start().to_string(), "-1:0");
    }

    #[test]
    fn test_range_display_parse_roundtrip() {
        for r in [
            CoordRange::universal(),
            CoordRange::new(Coord::new(3, 123, 0), Coord::new(4, 234, 0)),
            CoordRange::new(Coord::new(0, 0, 5), Coord::unmapped_start()),
        ] {
            let parsed: CoordRange = r.to_string().parse().unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Coord>().is_err());
        assert!("1".parse::<Coord>().is_err());
        assert!("1:2:3:4".parse::<Coord>().is_err());
        assert!("x:2".parse::<Coord>().is_err());
        assert!("1:2".parse::<CoordRange>().is_err());
    }

    #[test]
    fn test_coord_binary_roundtrip() {
        let mut buf = Vec::new();
        let c = Coord::new(-1, 77, 3);
        c.encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), COORD_ENCODED_LEN);
        assert_eq!(Coord::decode(&buf).unwrap(), c);
        assert!(Coord::decode(&buf[..8]).is_err());
    }
}

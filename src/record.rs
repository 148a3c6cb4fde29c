//! Record fields and the opaque record container
//!
//! A record is one aligned read: a mandatory coordinate plus a set of
//! per-field byte payloads. The storage layer never interprets the payloads;
//! encoding and decoding them belongs to the upstream record codec. The set
//! of fields stored for a dataset is fixed when its writer is created.

use std::collections::BTreeMap;
use std::fmt;

use crate::coord::Coord;

/// One column of a PAM dataset.
///
/// Every field is stored in its own block-compressed file per row-shard.
/// [`Field::Coord`] is mandatory and drives record reassembly; the rest are
/// optional attributes of the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Coord,
    Flags,
    Mapq,
    Cigar,
    MateRefid,
    MatePos,
    TemplateLength,
    Seq,
    Qual,
    Aux,
    Name,
}
impl Field {
    /// Every field, in canonical column order.
    pub const ALL: [Field; 11] = [
        Field::Coord,
        Field::Flags,
        Field::Mapq,
        Field::Cigar,
        Field::MateRefid,
        Field::MatePos,
        Field::TemplateLength,
        Field::Seq,
        Field::Qual,
        Field::Aux,
        Field::Name,
    ];

    /// The column name used in dataset file names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Field::Coord => "coord",
            Field::Flags => "flags",
            Field::Mapq => "mapq",
            Field::Cigar => "cigar",
            Field::MateRefid => "mate_refid",
            Field::MatePos => "mate_pos",
            Field::TemplateLength => "template_length",
            Field::Seq => "seq",
            Field::Qual => "qual",
            Field::Aux => "aux",
            Field::Name => "name",
        }
    }

    /// Looks a field up by its column name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aligned read: a coordinate plus opaque per-field payloads.
///
/// A field that was never set reads back as an empty payload, so records
/// compare equal regardless of whether an empty field is present or absent.
#[derive(Debug, Clone, Default, Eq)]
pub struct Record {
    pub coord: Coord,
    values: BTreeMap<Field, Vec<u8>>,
}
impl Record {
    #[must_use]
    pub fn new(coord: Coord) -> Self {
        Self {
            coord,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style payload assignment.
    #[must_use]
    pub fn with(mut self, field: Field, value: impl Into<Vec<u8>>) -> Self {
        self.set(field, value.into());
        self
    }

    /// Sets the payload for one field. The coordinate lives in
    /// [`Record::coord`]; assigning a payload to [`Field::Coord`] is ignored.
    pub fn set(&mut self, field: Field, value: Vec<u8>) {
        if field != Field::Coord {
            self.values.insert(field, value);
        }
    }

    /// The payload for one field, empty when the field was never set.
    #[must_use]
    pub fn get(&self, field: Field) -> &[u8] {
        self.values.get(&field).map_or(&[], Vec::as_slice)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.coord == other.coord
            && Field::ALL
                .into_iter()
                .all(|field| self.get(field) == other.get(field))
    }
}

//! Row and block data model.
//!
//! This module defines the in-memory and on-disk record types shared by the
//! data-file layer and the snapshot transport:
//!
//! - [`TableId`] — the two-level `(suid, uid)` table identifier.
//! - [`RowKey`] — the `(ts, version)` pair that orders rows within a table.
//! - [`Row`] / [`Cell`] — the smallest addressable unit and its typed values.
//! - [`BlockData`] — a columnar, in-memory run of rows sorted by
//!   `(ts asc, version asc)`; the staging area for both reads and merges.
//! - [`Block`] / [`BlockIdx`] — on-disk block descriptors: per-block key and
//!   version bounds plus file offsets, and the per-table index entry that
//!   points at a table's block map.
//! - [`DelIdx`] / [`DelData`] — the tombstone-file counterparts.
//!
//! # Invariants
//!
//! - Rows inside a [`BlockData`] are **strictly ascending** by
//!   `(ts, version)`; [`BlockData::append_row`] enforces this, so a
//!   duplicate `(ts, version)` can never be materialized.
//! - Every column holds exactly `n_row` cells; a row appended from a
//!   narrower schema back-fills [`Cell::Null`] in the columns it does not
//!   mention, and introduces new columns with `Null` for all earlier rows.
//! - Columns are kept sorted by column id.


use crate::encoding::{self, Decode, Encode, EncodingError};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by block-data operations.
#[derive(Debug, Error)]
pub enum BlockError {
    /// A row was appended out of order or duplicates an existing key.
    #[error("row key (ts={ts}, version={version}) not greater than preceding key")]
    RowOutOfOrder {
        /// Timestamp of the offending row.
        ts: i64,
        /// Version of the offending row.
        version: i64,
    },

    /// A cell's value does not match its column's declared type.
    #[error("cell type mismatch for column {cid}")]
    TypeMismatch {
        /// Column id of the offending cell.
        cid: i16,
    },

    /// A row's cells are not strictly ascending by column id.
    #[error("duplicate or unordered column {cid} in row")]
    UnorderedColumn {
        /// Column id of the offending cell.
        cid: i16,
    },

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

// ------------------------------------------------------------------------------------------------
// Identifiers and keys
// ------------------------------------------------------------------------------------------------

/// Two-level table identifier: super-table id plus table id.
///
/// Ordering is lexicographic `(suid, uid)` — the order in which block and
/// tombstone indices are laid out on disk and on the snapshot wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId {
    /// Super-table id.
    pub suid: i64,

    /// Table id.
    pub uid: i64,
}

/// Position of a row within a table: timestamp plus mutation version.
///
/// Ordering is `(ts asc, version asc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    /// Row timestamp, in the vnode's configured precision.
    pub ts: i64,

    /// Mutation version that produced the row.
    pub version: i64,
}

// ------------------------------------------------------------------------------------------------
// Cells and columns
// ------------------------------------------------------------------------------------------------

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    /// 64-bit signed integer.
    I64,

    /// 64-bit IEEE-754 float.
    F64,

    /// Variable-length byte string.
    Bytes,
}

/// A single typed value, or its absence.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// No value recorded for this row/column.
    Null,

    /// Integer value.
    I64(i64),

    /// Float value.
    F64(f64),

    /// Byte-string value.
    Bytes(Vec<u8>),
}

impl Cell {
    /// Returns `true` if the cell can live in a column of type `ctype`.
    ///
    /// `Null` is compatible with every column type.
    pub fn matches(&self, ctype: ColType) -> bool {
        matches!(
            (self, ctype),
            (Cell::Null, _)
                | (Cell::I64(_), ColType::I64)
                | (Cell::F64(_), ColType::F64)
                | (Cell::Bytes(_), ColType::Bytes)
        )
    }
}

/// One column of a [`BlockData`]: id, type, statistics flag, and cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ColData {
    /// Column id, unique within a table schema.
    pub cid: i16,

    /// Declared value type.
    pub ctype: ColType,

    /// Whether per-block column statistics are maintained for this column.
    pub sma_on: bool,

    /// One cell per row, index-aligned with the block's row keys.
    pub cells: Vec<Cell>,
}

/// A single cell of a materialized [`Row`], carrying its column schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCell {
    /// Column id.
    pub cid: i16,

    /// Declared value type.
    pub ctype: ColType,

    /// Statistics flag, propagated when the row seeds a new column.
    pub sma_on: bool,

    /// The value itself.
    pub cell: Cell,
}

/// An owned, materialized row — the smallest addressable unit.
///
/// Cells are sorted by column id.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Row position.
    pub key: RowKey,

    /// Column values, sorted by `cid`.
    pub cells: Vec<RowCell>,
}

// ------------------------------------------------------------------------------------------------
// BlockData — columnar staging area
// ------------------------------------------------------------------------------------------------

/// Column-oriented, in-memory materialization of a run of rows.
///
/// Used as the decode target for on-disk blocks, the staging buffer for
/// merge output, and the payload of `type = 1` snapshot frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockData {
    /// Per-row timestamps.
    ts: Vec<i64>,

    /// Per-row versions, index-aligned with `ts`.
    versions: Vec<i64>,

    /// Columns, sorted by `cid`, each holding exactly `n_row` cells.
    cols: Vec<ColData>,
}

impl BlockData {
    /// Creates an empty block-data buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all rows and columns.
    pub fn clear(&mut self) {
        self.ts.clear();
        self.versions.clear();
        self.cols.clear();
    }

    /// Number of rows currently held.
    pub fn n_row(&self) -> usize {
        self.ts.len()
    }

    /// Returns `true` if no rows are held.
    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    /// Key of the first (smallest) row, if any.
    pub fn first_key(&self) -> Option<RowKey> {
        Some(RowKey {
            ts: *self.ts.first()?,
            version: *self.versions.first()?,
        })
    }

    /// Key of the last (largest) row, if any.
    pub fn last_key(&self) -> Option<RowKey> {
        Some(RowKey {
            ts: *self.ts.last()?,
            version: *self.versions.last()?,
        })
    }

    /// Smallest row version held, if any.
    pub fn min_version(&self) -> Option<i64> {
        self.versions.iter().copied().min()
    }

    /// Largest row version held, if any.
    pub fn max_version(&self) -> Option<i64> {
        self.versions.iter().copied().max()
    }

    /// Read access to the column array.
    pub fn cols(&self) -> &[ColData] {
        &self.cols
    }

    /// Key of row `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= n_row()` — callers iterate `0..n_row()`.
    pub fn key(&self, i: usize) -> RowKey {
        RowKey {
            ts: self.ts[i],
            version: self.versions[i],
        }
    }

    /// Materializes row `i` as an owned [`Row`], cloning its cells.
    ///
    /// # Panics
    ///
    /// Panics if `i >= n_row()`.
    pub fn row(&self, i: usize) -> Row {
        let cells = self
            .cols
            .iter()
            .map(|col| RowCell {
                cid: col.cid,
                ctype: col.ctype,
                sma_on: col.sma_on,
                cell: col.cells[i].clone(),
            })
            .collect();
        Row {
            key: self.key(i),
            cells,
        }
    }

    /// Materializes every row in order.
    pub fn rows(&self) -> Vec<Row> {
        (0..self.n_row()).map(|i| self.row(i)).collect()
    }

    /// Appends a row, maintaining the strictly-ascending key invariant and
    /// aligning columns by `cid`.
    ///
    /// Columns the row does not mention receive [`Cell::Null`]; columns the
    /// buffer has not seen yet are inserted (sorted by `cid`) with `Null`
    /// back-filled for all earlier rows.
    ///
    /// # Errors
    ///
    /// - [`BlockError::RowOutOfOrder`] if the row's key is not strictly
    ///   greater than the last key held.
    /// - [`BlockError::TypeMismatch`] if a cell's value contradicts the
    ///   column's declared type.
    pub fn append_row(&mut self, row: &Row) -> Result<(), BlockError> {
        if let Some(last) = self.last_key() {
            if row.key <= last {
                return Err(BlockError::RowOutOfOrder {
                    ts: row.key.ts,
                    version: row.key.version,
                });
            }
        }

        // Validate the whole row before any mutation so a rejected row
        // can never leave the columns ragged.
        for (i, rc) in row.cells.iter().enumerate() {
            if i > 0 && rc.cid <= row.cells[i - 1].cid {
                return Err(BlockError::UnorderedColumn { cid: rc.cid });
            }
            let declared = match self.cols.binary_search_by_key(&rc.cid, |c| c.cid) {
                Ok(idx) => self.cols[idx].ctype,
                Err(_) => rc.ctype,
            };
            if !rc.cell.matches(declared) {
                return Err(BlockError::TypeMismatch { cid: rc.cid });
            }
        }

        let n_before = self.n_row();
        for rc in &row.cells {
            let idx = match self.cols.binary_search_by_key(&rc.cid, |c| c.cid) {
                Ok(idx) => idx,
                Err(idx) => {
                    self.cols.insert(
                        idx,
                        ColData {
                            cid: rc.cid,
                            ctype: rc.ctype,
                            sma_on: rc.sma_on,
                            cells: vec![Cell::Null; n_before],
                        },
                    );
                    idx
                }
            };
            self.cols[idx].cells.push(rc.cell.clone());
        }

        // Null-fill columns the row did not mention.
        for col in &mut self.cols {
            if col.cells.len() == n_before {
                col.cells.push(Cell::Null);
            }
        }

        self.ts.push(row.key.ts);
        self.versions.push(row.key.version);
        Ok(())
    }

    /// Copies the column schema of `other` (ids, types, flags) into an empty
    /// buffer without copying any cells.
    ///
    /// Used by the snapshot reader so a filtered copy preserves the source
    /// block's schema even for columns that end up all-`Null`.
    pub fn clone_schema(&mut self, other: &BlockData) {
        self.clear();
        self.cols = other
            .cols
            .iter()
            .map(|c| ColData {
                cid: c.cid,
                ctype: c.ctype,
                sma_on: c.sma_on,
                cells: Vec::new(),
            })
            .collect();
    }

    /// Verifies the strictly-ascending row-key invariant over the whole
    /// buffer.
    ///
    /// Decoded buffers come from untrusted bytes, so the snapshot writer
    /// re-checks what `append_row` would have enforced.
    pub fn check_strictly_ascending(&self) -> Result<(), BlockError> {
        for i in 1..self.n_row() {
            if self.key(i) <= self.key(i - 1) {
                let k = self.key(i);
                return Err(BlockError::RowOutOfOrder {
                    ts: k.ts,
                    version: k.version,
                });
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// On-disk descriptors
// ------------------------------------------------------------------------------------------------

/// Descriptor of one on-disk block: key/version bounds, row count, and the
/// location of its payload (and optional column statistics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Smallest row key in the block.
    pub min_key: RowKey,

    /// Largest row key in the block.
    pub max_key: RowKey,

    /// Smallest row version in the block.
    pub min_version: i64,

    /// Largest row version in the block.
    pub max_version: i64,

    /// Number of rows.
    pub n_row: u32,

    /// `true` if this is the table's trailing under-sized block, stored in
    /// the last file rather than the data file.  At most one per table.
    pub last: bool,

    /// Offset of the checksummed payload section in the data (or last) file.
    pub offset: u64,

    /// Total size of the payload section, including length prefix and CRC.
    pub size: u32,

    /// Offset of the column-statistics section in the sma file (0 if none).
    pub sma_offset: u64,

    /// Total size of the column-statistics section (0 if none).
    pub sma_size: u32,
}

/// Per-table index entry: locates the table's block map in the head file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIdx {
    /// Table this entry describes.
    pub table: TableId,

    /// Offset of the block-map section in the head file.
    pub offset: u64,

    /// Total size of the block-map section.
    pub size: u32,
}

/// One deletion record: a key interval `[s_key, e_key]` removed at `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelData {
    /// Mutation version of the delete.
    pub version: i64,

    /// Start of the deleted timestamp interval (inclusive).
    pub s_key: i64,

    /// End of the deleted timestamp interval (inclusive).
    pub e_key: i64,
}

/// Per-table index entry of the tombstone file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelIdx {
    /// Table this entry describes.
    pub table: TableId,

    /// Offset of the table's deletion section in the tombstone file.
    pub offset: u64,

    /// Total size of the deletion section.
    pub size: u32,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for TableId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.suid.encode_to(buf)?;
        self.uid.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (suid, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (uid, n) = i64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { suid, uid }, off))
    }
}

impl Encode for RowKey {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.ts.encode_to(buf)?;
        self.version.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for RowKey {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (ts, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { ts, version }, off))
    }
}

impl Encode for ColType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u32 = match self {
            ColType::I64 => 0,
            ColType::F64 => 1,
            ColType::Bytes => 2,
        };
        tag.encode_to(buf)
    }
}

impl Decode for ColType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u32::decode_from(buf)?;
        let ctype = match tag {
            0 => ColType::I64,
            1 => ColType::F64,
            2 => ColType::Bytes,
            _ => {
                return Err(EncodingError::InvalidTag {
                    tag,
                    type_name: "ColType",
                });
            }
        };
        Ok((ctype, n))
    }
}

impl Encode for Cell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Cell::Null => 0u32.encode_to(buf)?,
            Cell::I64(v) => {
                1u32.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Cell::F64(v) => {
                2u32.encode_to(buf)?;
                v.encode_to(buf)?;
            }
            Cell::Bytes(v) => {
                3u32.encode_to(buf)?;
                v.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Cell {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tag, n) = u32::decode_from(buf)?;
        off += n;
        let cell = match tag {
            0 => Cell::Null,
            1 => {
                let (v, n) = i64::decode_from(&buf[off..])?;
                off += n;
                Cell::I64(v)
            }
            2 => {
                let (v, n) = f64::decode_from(&buf[off..])?;
                off += n;
                Cell::F64(v)
            }
            3 => {
                let (v, n) = <Vec<u8>>::decode_from(&buf[off..])?;
                off += n;
                Cell::Bytes(v)
            }
            _ => {
                return Err(EncodingError::InvalidTag {
                    tag,
                    type_name: "Cell",
                });
            }
        };
        Ok((cell, off))
    }
}

impl Encode for ColData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.cid.encode_to(buf)?;
        self.ctype.encode_to(buf)?;
        self.sma_on.encode_to(buf)?;
        encoding::encode_vec(&self.cells, buf)?;
        Ok(())
    }
}

impl Decode for ColData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (cid, n) = i16::decode_from(&buf[off..])?;
        off += n;
        let (ctype, n) = ColType::decode_from(&buf[off..])?;
        off += n;
        let (sma_on, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let (cells, n) = encoding::decode_vec::<Cell>(&buf[off..])?;
        off += n;
        for cell in &cells {
            if !cell.matches(ctype) {
                return Err(EncodingError::Custom(format!(
                    "cell type mismatch for column {cid}"
                )));
            }
        }
        Ok((
            Self {
                cid,
                ctype,
                sma_on,
                cells,
            },
            off,
        ))
    }
}

impl Encode for BlockData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::encode_vec(&self.ts, buf)?;
        encoding::encode_vec(&self.versions, buf)?;
        encoding::encode_vec(&self.cols, buf)?;
        Ok(())
    }
}

impl Decode for BlockData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (ts, n) = encoding::decode_vec::<i64>(&buf[off..])?;
        off += n;
        let (versions, n) = encoding::decode_vec::<i64>(&buf[off..])?;
        off += n;
        let (cols, n) = encoding::decode_vec::<ColData>(&buf[off..])?;
        off += n;
        if versions.len() != ts.len() {
            return Err(EncodingError::Custom(format!(
                "row count mismatch: {} timestamps vs {} versions",
                ts.len(),
                versions.len()
            )));
        }
        for col in &cols {
            if col.cells.len() != ts.len() {
                return Err(EncodingError::Custom(format!(
                    "column {} holds {} cells for {} rows",
                    col.cid,
                    col.cells.len(),
                    ts.len()
                )));
            }
        }
        Ok((Self { ts, versions, cols }, off))
    }
}

impl Encode for Block {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.min_version.encode_to(buf)?;
        self.max_version.encode_to(buf)?;
        self.n_row.encode_to(buf)?;
        self.last.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.sma_offset.encode_to(buf)?;
        self.sma_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Block {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (min_key, n) = RowKey::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = RowKey::decode_from(&buf[off..])?;
        off += n;
        let (min_version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (max_version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (n_row, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (last, n) = bool::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (sma_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (sma_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                min_key,
                max_key,
                min_version,
                max_version,
                n_row,
                last,
                offset,
                size,
                sma_offset,
                sma_size,
            },
            off,
        ))
    }
}

impl Encode for BlockIdx {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.table.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockIdx {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (table, n) = TableId::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                table,
                offset,
                size,
            },
            off,
        ))
    }
}

impl Encode for DelData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.version.encode_to(buf)?;
        self.s_key.encode_to(buf)?;
        self.e_key.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DelData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (s_key, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (e_key, n) = i64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                version,
                s_key,
                e_key,
            },
            off,
        ))
    }
}

impl Encode for DelIdx {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.table.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DelIdx {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (table, n) = TableId::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                table,
                offset,
                size,
            },
            off,
        ))
    }
}

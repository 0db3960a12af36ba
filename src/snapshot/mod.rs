//! Snapshot transport: replica synchronization via framed byte streams.
//!
//! A leader produces a snapshot of its on-disk state within a version range
//! `(sver, ever]` as an ordered sequence of length-prefixed frames; a
//! follower ingests those frames and merges them with whatever it already
//! holds, committing the result atomically or discarding it on rollback.
//!
//! ## Wire format
//!
//! ```text
//! frame   := [type u8][size u32][suid i64][uid i64][body]
//! type 1  := data frame    — body is an encoded BlockData
//! type 2  := tombstone frame — body is a run of encoded DelData entries
//! ```
//!
//! `size` counts everything after the 5-byte header (table id + body).
//! All `type = 1` frames precede all `type = 2` frames; data frames are
//! ordered by `(fid, suid, uid, block)`, tombstone frames by `(suid, uid)`.
//!
//! ## Components
//!
//! - [`SnapReader`] — walks the committed file sets and tombstone file,
//!   filtering rows and deletes by the version range, and yields one owned
//!   frame per [`next`](SnapReader::next) call.
//! - [`SnapWriter`] — an explicit `Idle → DataOpen → DelOpen` state machine
//!   that merges inbound frames with the vnode's `next` file-set state and
//!   promotes it on [`close(false)`](SnapWriter::close).
//!
//! Both endpoints are single-threaded values; neither spawns workers.

pub mod reader;
pub mod writer;

mod merge;

#[cfg(test)]
mod tests;

pub use reader::SnapReader;
pub use writer::SnapWriter;

use std::io;

use thiserror::Error;

use crate::block::{BlockError, TableId};
use crate::datafile::DataFileError;
use crate::delfile::DelFileError;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::registry::RegistryError;

/// Frame header bytes: `type` plus `size`.
const FRAME_HDR_SIZE: usize = 5;

/// Table-id bytes inside the payload.
const FRAME_TABLE_SIZE: usize = 16;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by snapshot operations.
///
/// Nothing is recovered locally: every error propagates to the driver,
/// which is expected to discard the reader or `close(rollback = true)` the
/// writer.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Block-data invariant failure (unsorted or duplicate row keys,
    /// column type mismatch).
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Data-file layer failure.
    #[error("Data file error: {0}")]
    DataFile(#[from] DataFileError),

    /// Tombstone-file layer failure.
    #[error("Tombstone file error: {0}")]
    DelFile(#[from] DelFileError),

    /// Registry failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Frame header malformed or payload length mismatched.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A data frame's rows span more than one time partition.
    #[error("block data spans partitions (fid {first} vs {last})")]
    FidSpan {
        /// Partition of the frame's first row.
        first: i32,
        /// Partition of the frame's last row.
        last: i32,
    },

    /// Frames for one type arrived out of `(suid, uid)` order.
    #[error("frame for table (suid={suid}, uid={uid}) arrived out of order")]
    TableOutOfOrder {
        /// Super-table id of the offending frame.
        suid: i64,
        /// Table id of the offending frame.
        uid: i64,
    },

    /// A data frame arrived after the stream entered the tombstone phase.
    #[error("data frame after tombstone frame")]
    DataAfterDel,

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Frame codec
// ------------------------------------------------------------------------------------------------

/// Kind of a snapshot frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Row data for one table within one time partition.
    Data,

    /// Deletion records for one table.
    Del,
}

impl FrameType {
    fn tag(self) -> u8 {
        match self {
            FrameType::Data => 1,
            FrameType::Del => 2,
        }
    }
}

/// One decoded snapshot frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapFrame {
    /// Frame kind.
    pub ftype: FrameType,

    /// Table the payload belongs to.
    pub table: TableId,

    /// Encoded payload: a `BlockData` for data frames, a run of `DelData`
    /// entries for tombstone frames.
    pub body: Vec<u8>,
}

impl SnapFrame {
    /// Serializes the frame into owned wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let size = u32::try_from(FRAME_TABLE_SIZE + self.body.len())
            .map_err(|_| SnapshotError::Internal("frame payload exceeds 4 GiB".into()))?;
        let mut buf = Vec::with_capacity(FRAME_HDR_SIZE + size as usize);
        self.ftype.tag().encode_to(&mut buf)?;
        size.encode_to(&mut buf)?;
        self.table.encode_to(&mut buf)?;
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Parses one frame from wire bytes.
    ///
    /// The buffer must contain exactly one frame; a length mismatch in
    /// either direction is a [`SnapshotError::MalformedFrame`].
    pub fn decode(buf: &[u8]) -> Result<Self, SnapshotError> {
        if buf.len() < FRAME_HDR_SIZE + FRAME_TABLE_SIZE {
            return Err(SnapshotError::MalformedFrame(format!(
                "frame too short ({} bytes)",
                buf.len()
            )));
        }

        let ftype = match buf[0] {
            1 => FrameType::Data,
            2 => FrameType::Del,
            other => {
                return Err(SnapshotError::MalformedFrame(format!(
                    "unknown frame type {other}"
                )));
            }
        };

        let (size, _) = u32::decode_from(&buf[1..])?;
        if buf.len() != FRAME_HDR_SIZE + size as usize {
            return Err(SnapshotError::MalformedFrame(format!(
                "payload length mismatch: header says {}, buffer holds {}",
                size,
                buf.len() - FRAME_HDR_SIZE
            )));
        }

        let (table, n) = TableId::decode_from(&buf[FRAME_HDR_SIZE..])?;
        let body = buf[FRAME_HDR_SIZE + n..].to_vec();
        Ok(Self { ftype, table, body })
    }
}

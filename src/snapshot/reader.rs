//! Snapshot reader — produces the framed byte stream of one version range.
//!
//! The reader walks the vnode's **committed** state in two phases:
//!
//! 1. **Data phase.** File sets in ascending `fid` order; within each set,
//!    tables in `(suid, uid)` order; within each table, blocks in stored
//!    order.  Each block whose version bounds overlap `(sver, ever]` is
//!    decoded and the surviving rows are copied into a fresh staging
//!    buffer, preserving the source block's column schema.  Non-empty
//!    results become `type = 1` frames.
//! 2. **Tombstone phase.** The committed tombstone file's index entries in
//!    order, each entry's records filtered by the same version predicate;
//!    survivors become `type = 2` frames.
//!
//! The reader is single-use: any error poisons it, and the driver is
//! expected to drop it and start over.

use tracing::{error, info};

use crate::block::{Block, BlockData, BlockIdx, DelIdx};
use crate::datafile::DataFileReader;
use crate::delfile::DelFileReader;
use crate::encoding::{self, Encode};
use crate::registry::Cmp;
use crate::tsdb::Tsdb;

use super::{FrameType, SnapFrame, SnapshotError};

/// Lazy producer of the snapshot frame sequence for `(sver, ever]`.
///
/// Each call to [`next`](Self::next) allocates exactly one frame; the
/// caller owns it.
pub struct SnapReader<'a> {
    tsdb: &'a Tsdb,
    sver: i64,
    ever: i64,

    // data phase
    data_done: bool,
    fid: i32,
    data_reader: Option<DataFileReader>,
    block_idx: Vec<BlockIdx>,
    i_block_idx: usize,
    cur_idx: Option<BlockIdx>,
    blocks: Vec<Block>,
    i_block: usize,

    // tombstone phase
    del_done: bool,
    del_reader: Option<DelFileReader>,
    del_idx: Vec<DelIdx>,
    i_del_idx: usize,
}

impl<'a> SnapReader<'a> {
    /// Creates a reader over `tsdb`'s committed state for the version range
    /// `(sver, ever]`.  No I/O happens until the first [`next`](Self::next).
    pub fn new(tsdb: &'a Tsdb, sver: i64, ever: i64) -> Self {
        info!(vg_id = tsdb.vg_id(), sver, ever, "snapshot reader opened");
        Self {
            tsdb,
            sver,
            ever,
            data_done: false,
            fid: i32::MIN,
            data_reader: None,
            block_idx: Vec::new(),
            i_block_idx: 0,
            cur_idx: None,
            blocks: Vec::new(),
            i_block: 0,
            del_done: false,
            del_reader: None,
            del_idx: Vec::new(),
            i_del_idx: 0,
        }
    }

    /// Produces the next frame, or `None` at end-of-stream.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>, SnapshotError> {
        if !self.data_done {
            match self.next_data() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => self.data_done = true,
                Err(e) => {
                    error!(vg_id = self.tsdb.vg_id(), error = %e, "snapshot data read failed");
                    return Err(e);
                }
            }
        }

        if !self.del_done {
            match self.next_del() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => self.del_done = true,
                Err(e) => {
                    error!(vg_id = self.tsdb.vg_id(), error = %e, "snapshot tombstone read failed");
                    return Err(e);
                }
            }
        }

        Ok(None)
    }

    /// Keeps `version ∈ (sver, ever]`.
    fn version_in_range(&self, version: i64) -> bool {
        version > self.sver && version <= self.ever
    }

    fn next_data(&mut self) -> Result<Option<Vec<u8>>, SnapshotError> {
        loop {
            if self.data_reader.is_none() {
                let Some(fset) = self.tsdb.fs().current_file_set(self.fid, Cmp::Gt)? else {
                    return Ok(None);
                };

                self.fid = fset.fid;
                let reader = DataFileReader::open(self.tsdb.dir(), self.tsdb.vg_id(), &fset)?;
                self.block_idx = reader.read_block_idx()?;
                self.i_block_idx = 0;
                self.cur_idx = None;
                self.blocks.clear();
                self.i_block = 0;
                self.data_reader = Some(reader);

                info!(
                    vg_id = self.tsdb.vg_id(),
                    fid = self.fid,
                    "snapshot opened data file set to read"
                );
            }
            let Some(reader) = self.data_reader.as_ref() else {
                return Err(SnapshotError::Internal("data reader vanished".into()));
            };

            // Advance to the next block, pulling in block maps and file
            // sets as the current ones drain.
            if self.i_block >= self.blocks.len() {
                if self.i_block_idx >= self.block_idx.len() {
                    self.data_reader = None;
                    continue;
                }
                let idx = self.block_idx[self.i_block_idx];
                self.i_block_idx += 1;
                self.blocks = reader.read_block_map(&idx)?;
                self.cur_idx = Some(idx);
                self.i_block = 0;
                continue;
            }

            let block = self.blocks[self.i_block];
            self.i_block += 1;

            if block.min_version > self.ever || block.max_version <= self.sver {
                continue;
            }

            let bdata = reader.read_block_data(&block)?;
            let mut staging = BlockData::new();
            staging.clone_schema(&bdata);
            for i in 0..bdata.n_row() {
                if self.version_in_range(bdata.key(i).version) {
                    staging.append_row(&bdata.row(i))?;
                }
            }

            if staging.is_empty() {
                continue;
            }

            let Some(idx) = self.cur_idx else {
                return Err(SnapshotError::Internal("block without index entry".into()));
            };

            let frame = SnapFrame {
                ftype: FrameType::Data,
                table: idx.table,
                body: encoding::encode_to_vec(&staging)?,
            };
            let bytes = frame.encode()?;

            info!(
                vg_id = self.tsdb.vg_id(),
                fid = self.fid,
                suid = idx.table.suid,
                uid = idx.table.uid,
                n_row = staging.n_row(),
                of = block.n_row,
                size = bytes.len(),
                "snapshot read data block"
            );
            return Ok(Some(bytes));
        }
    }

    fn next_del(&mut self) -> Result<Option<Vec<u8>>, SnapshotError> {
        if self.del_reader.is_none() {
            let Some(del) = self.tsdb.fs().current_del_file()? else {
                return Ok(None);
            };
            let reader = DelFileReader::open(self.tsdb.dir(), self.tsdb.vg_id(), &del)?;
            self.del_idx = reader.read_del_idx()?;
            self.i_del_idx = 0;
            self.del_reader = Some(reader);
        }
        let Some(reader) = self.del_reader.as_ref() else {
            return Err(SnapshotError::Internal("tombstone reader vanished".into()));
        };

        while self.i_del_idx < self.del_idx.len() {
            let idx = self.del_idx[self.i_del_idx];
            self.i_del_idx += 1;

            let data = reader.read_del_data(&idx)?;
            let surviving: Vec<_> = data
                .into_iter()
                .filter(|d| self.version_in_range(d.version))
                .collect();
            if surviving.is_empty() {
                continue;
            }

            let mut body = Vec::new();
            for d in &surviving {
                d.encode_to(&mut body)?;
            }

            let frame = SnapFrame {
                ftype: FrameType::Del,
                table: idx.table,
                body,
            };
            let bytes = frame.encode()?;

            info!(
                vg_id = self.tsdb.vg_id(),
                suid = idx.table.suid,
                uid = idx.table.uid,
                entries = surviving.len(),
                size = bytes.len(),
                "snapshot read tombstone entry"
            );
            return Ok(Some(bytes));
        }

        self.del_reader = None;
        Ok(None)
    }
}

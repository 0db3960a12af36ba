//! Snapshot writer — ingests a framed stream and merges it with the
//! vnode's `next` file-set state.
//!
//! # State machine
//!
//! ```text
//! Idle ──write(type=1)──► DataOpen ──fid change──► DataOpen'
//!   │                         │
//!   │                         └──write(type=2)──► DelOpen
//!   └──write(type=2)──► DelOpen
//! DelOpen ──close(false)──► Committed
//! Any     ──close(true) ──► RolledBack
//! ```
//!
//! The states are explicit enum variants rather than a set of "is open"
//! flags, and every transition is a total function of `(state, frame
//! type)`.  A `type = 1` frame after the writer entered the tombstone
//! phase is a protocol error; `write` after `close` and double `close`
//! are unrepresentable because [`close`](SnapWriter::close) consumes the
//! writer.
//!
//! # Merge strategy
//!
//! Incoming rows for the open table accumulate across frames; the
//! three-way merge (see [`super::merge`]) runs when the table closes —
//! on table change, fid change, phase change, or commit.  Frames derived
//! from the source's last block can overlap any earlier frame of the same
//! table, so no output prefix is final before that point.
//!
//! # Failure handling
//!
//! Every error leaves the committed state untouched.  On a failed commit
//! the writer rolls itself back; a writer dropped without `close` does the
//! same.  In-flight files are recognizable by the stream's `commitID` and
//! are unlinked by the registry sweep.

use std::mem;

use tracing::{info, warn};

use crate::block::{Block, BlockData, BlockIdx, DelData, DelIdx, Row, TableId};
use crate::datafile::{DataFileReader, DataFileWriter};
use crate::delfile::{DelFileReader, DelFileWriter};
use crate::encoding::Decode;
use crate::fileset::{DiskId, FileSet, Precision, fid_for_ts};
use crate::tsdb::Tsdb;

use super::merge::{TableMergeInput, merge_table};
use super::{FrameType, SnapFrame, SnapshotError};

// ------------------------------------------------------------------------------------------------
// States
// ------------------------------------------------------------------------------------------------

enum WriterState {
    /// No file open yet.
    Idle,

    /// Data phase: one file set open for merge.
    DataOpen(Box<DataState>),

    /// Tombstone phase: the data phase is sealed.
    DelOpen(Box<DelState>),

    /// Terminal; reached only through `close` or `Drop`.
    Closed,
}

struct DataState {
    fid: i32,
    reader: Option<DataFileReader>,
    idx_r: Vec<BlockIdx>,
    i_idx: usize,
    writer: DataFileWriter,
    table: Option<TableState>,
}

struct TableState {
    id: TableId,
    exist_blocks: Vec<Block>,
    exist_last: Option<Block>,
    incoming: Vec<Row>,
}

struct DelState {
    reader: Option<DelFileReader>,
    idx_r: Vec<DelIdx>,
    i_idx: usize,
    writer: DelFileWriter,
    last_id: Option<TableId>,
}

// ------------------------------------------------------------------------------------------------
// SnapWriter
// ------------------------------------------------------------------------------------------------

/// Consumer of one snapshot stream.
///
/// Construction claims the vnode's `next` state exclusively; `close`
/// (or `Drop`) releases it.
pub struct SnapWriter<'a> {
    tsdb: &'a Tsdb,
    sver: i64,
    ever: i64,

    // Configuration snapshot, taken at open.
    minutes: i32,
    precision: Precision,
    min_row: usize,
    max_row: usize,
    cmpr_alg: u8,
    commit_id: i64,

    state: WriterState,
}

impl<'a> SnapWriter<'a> {
    /// Opens a writer for the version range `(sver, ever]`, claiming the
    /// vnode's in-progress state.
    pub fn new(tsdb: &'a Tsdb, sver: i64, ever: i64) -> Result<Self, SnapshotError> {
        tsdb.fs().begin()?;
        let cfg = tsdb.config();
        info!(
            vg_id = tsdb.vg_id(),
            sver,
            ever,
            commit_id = cfg.commit_id,
            "snapshot writer opened"
        );
        Ok(Self {
            tsdb,
            sver,
            ever,
            minutes: cfg.minutes,
            precision: cfg.precision,
            min_row: cfg.min_row,
            max_row: cfg.max_row,
            cmpr_alg: cfg.cmpr_alg,
            commit_id: cfg.commit_id,
            state: WriterState::Idle,
        })
    }

    /// Ingests one frame.
    pub fn write(&mut self, frame_bytes: &[u8]) -> Result<(), SnapshotError> {
        let frame = SnapFrame::decode(frame_bytes)?;
        match frame.ftype {
            FrameType::Data => self.write_data(frame),
            FrameType::Del => self.write_del(frame),
        }
    }

    /// Finalizes the stream.
    ///
    /// `rollback = false` seals the data and tombstone phases and promotes
    /// `next` to `current`; `rollback = true` discards every write and
    /// leaves `current` untouched.  Consuming `self` makes `write` after
    /// `close` and double `close` unrepresentable.
    pub fn close(mut self, rollback: bool) -> Result<(), SnapshotError> {
        if rollback {
            return self.do_rollback();
        }

        match self.do_commit() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    vg_id = self.tsdb.vg_id(),
                    error = %e,
                    "snapshot commit failed, rolling back"
                );
                if let Err(rb) = self.do_rollback() {
                    warn!(vg_id = self.tsdb.vg_id(), error = %rb, "snapshot rollback failed");
                }
                Err(e)
            }
        }
    }

    // --------------------------------------------------------------------
    // Data phase
    // --------------------------------------------------------------------

    fn write_data(&mut self, frame: SnapFrame) -> Result<(), SnapshotError> {
        let (bdata, n) = BlockData::decode_from(&frame.body)?;
        if n != frame.body.len() {
            return Err(SnapshotError::MalformedFrame(
                "trailing bytes after block data".into(),
            ));
        }
        bdata.check_strictly_ascending()?;
        let (Some(first), Some(last)) = (bdata.first_key(), bdata.last_key()) else {
            return Err(SnapshotError::MalformedFrame("empty block data".into()));
        };

        // The producer must keep a frame inside one partition; enforced,
        // not trusted.
        let fid = fid_for_ts(first.ts, self.minutes, self.precision);
        let fid_last = fid_for_ts(last.ts, self.minutes, self.precision);
        if fid != fid_last {
            return Err(SnapshotError::FidSpan {
                first: fid,
                last: fid_last,
            });
        }

        let need_open = match &self.state {
            WriterState::Closed => {
                return Err(SnapshotError::Internal("write on closed writer".into()));
            }
            WriterState::DelOpen(_) => return Err(SnapshotError::DataAfterDel),
            WriterState::DataOpen(ds) => ds.fid != fid,
            WriterState::Idle => true,
        };
        if need_open {
            self.end_data_state()?;
            let ds = self.open_data_state(fid)?;
            self.state = WriterState::DataOpen(Box::new(ds));
        }

        let WriterState::DataOpen(ds) = &mut self.state else {
            return Err(SnapshotError::Internal("data state vanished".into()));
        };

        let id = frame.table;
        let table_open = match &ds.table {
            Some(t) if t.id == id => true,
            Some(t) if id < t.id => {
                return Err(SnapshotError::TableOutOfOrder {
                    suid: id.suid,
                    uid: id.uid,
                });
            }
            _ => false,
        };
        if !table_open {
            Self::close_table(ds, self.min_row, self.max_row)?;
            Self::passthrough_tables(ds, Some(id))?;

            // Collect the destination's existing blocks for this table, if
            // any, splitting off the last block.
            let (exist_blocks, exist_last) =
                if ds.i_idx < ds.idx_r.len() && ds.idx_r[ds.i_idx].table == id {
                    let idx = ds.idx_r[ds.i_idx];
                    ds.i_idx += 1;
                    let Some(reader) = ds.reader.as_ref() else {
                        return Err(SnapshotError::Internal(
                            "index entries without an open reader".into(),
                        ));
                    };
                    let blocks = reader.read_block_map(&idx)?;
                    let mut regular = Vec::with_capacity(blocks.len());
                    let mut last_block = None;
                    for b in blocks {
                        if b.last {
                            last_block = Some(b);
                        } else {
                            regular.push(b);
                        }
                    }
                    (regular, last_block)
                } else {
                    (Vec::new(), None)
                };

            ds.table = Some(TableState {
                id,
                exist_blocks,
                exist_last,
                incoming: Vec::new(),
            });
        }

        let Some(table) = ds.table.as_mut() else {
            return Err(SnapshotError::Internal("table state vanished".into()));
        };
        table.incoming.extend(bdata.rows());

        info!(
            vg_id = self.tsdb.vg_id(),
            fid,
            suid = id.suid,
            uid = id.uid,
            n_row = bdata.n_row(),
            "snapshot write data"
        );
        Ok(())
    }

    /// Opens the data state for `fid`: a reader over the matching `next`
    /// file set when one exists, and a fresh writer whose sub-files carry
    /// this stream's commit id.
    fn open_data_state(&self, fid: i32) -> Result<DataState, SnapshotError> {
        let existing = self.tsdb.fs().next_file_set_eq(fid)?;

        let (reader, idx_r, disk_id) = match existing {
            Some(fset) => {
                let reader = DataFileReader::open(self.tsdb.dir(), self.tsdb.vg_id(), &fset)?;
                let idx = reader.read_block_idx()?;
                (Some(reader), idx, fset.disk_id)
            }
            None => (None, Vec::new(), DiskId::default()),
        };

        let wset = FileSet::new(fid, disk_id, self.commit_id);
        let writer = DataFileWriter::create(self.tsdb.dir(), self.tsdb.vg_id(), wset, self.cmpr_alg)?;

        info!(vg_id = self.tsdb.vg_id(), fid, "snapshot opened data file set to write");
        Ok(DataState {
            fid,
            reader,
            idx_r,
            i_idx: 0,
            writer,
            table: None,
        })
    }

    /// Runs the three-way merge for the open table, if any, and seals its
    /// block map.
    fn close_table(ds: &mut DataState, min_row: usize, max_row: usize) -> Result<(), SnapshotError> {
        let Some(t) = ds.table.take() else {
            return Ok(());
        };

        let out = merge_table(
            TableMergeInput {
                reader: ds.reader.as_ref(),
                exist_blocks: t.exist_blocks,
                exist_last: t.exist_last,
                incoming: t.incoming,
            },
            &mut ds.writer,
            min_row,
            max_row,
        )?;
        ds.writer.finish_table(t.id, &out)?;
        Ok(())
    }

    /// Copies existing tables below `bound` (all remaining tables when
    /// `bound` is `None`) through to the writer verbatim.
    fn passthrough_tables(ds: &mut DataState, bound: Option<TableId>) -> Result<(), SnapshotError> {
        while ds.i_idx < ds.idx_r.len() {
            let idx = ds.idx_r[ds.i_idx];
            if let Some(bound) = bound {
                if idx.table >= bound {
                    break;
                }
            }
            ds.i_idx += 1;

            let Some(reader) = ds.reader.as_ref() else {
                return Err(SnapshotError::Internal(
                    "index entries without an open reader".into(),
                ));
            };
            let blocks = reader.read_block_map(&idx)?;
            let mut rebased = Vec::with_capacity(blocks.len());
            for block in &blocks {
                let (payload, sma) = reader.read_block_raw(block)?;
                rebased.push(ds.writer.write_block_raw(&payload, sma.as_deref(), block)?);
            }
            ds.writer.finish_table(idx.table, &rebased)?;
        }
        Ok(())
    }

    /// Seals the data phase: merges the open table, drains the remaining
    /// existing tables, finalizes the file set, and registers it in `next`.
    fn end_data_state(&mut self) -> Result<(), SnapshotError> {
        let state = mem::replace(&mut self.state, WriterState::Idle);
        let WriterState::DataOpen(mut ds) = state else {
            self.state = state;
            return Ok(());
        };

        Self::close_table(&mut ds, self.min_row, self.max_row)?;
        Self::passthrough_tables(&mut ds, None)?;

        let fid = ds.fid;
        let fset = ds.writer.close()?;
        self.tsdb.fs().next_upsert_file_set(fset)?;

        info!(vg_id = self.tsdb.vg_id(), fid, "snapshot data file set sealed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Tombstone phase
    // --------------------------------------------------------------------

    fn write_del(&mut self, frame: SnapFrame) -> Result<(), SnapshotError> {
        // Decode the frame's deletion records up front so a malformed
        // payload cannot leave a half-transitioned state behind.
        let mut incoming: Vec<DelData> = Vec::new();
        let mut off = 0;
        while off < frame.body.len() {
            let (d, n) = DelData::decode_from(&frame.body[off..])?;
            off += n;
            incoming.push(d);
        }

        match &self.state {
            WriterState::Closed => {
                return Err(SnapshotError::Internal("write on closed writer".into()));
            }
            WriterState::DelOpen(_) => {}
            WriterState::Idle | WriterState::DataOpen(_) => {
                self.end_data_state()?;
                let ds = self.open_del_state()?;
                self.state = WriterState::DelOpen(Box::new(ds));
            }
        }
        let WriterState::DelOpen(ds) = &mut self.state else {
            return Err(SnapshotError::Internal("tombstone state vanished".into()));
        };

        let id = frame.table;
        if let Some(last_id) = ds.last_id {
            if id <= last_id {
                return Err(SnapshotError::TableOutOfOrder {
                    suid: id.suid,
                    uid: id.uid,
                });
            }
        }

        // Pass existing tables below the incoming id through unchanged.
        while ds.i_idx < ds.idx_r.len() && ds.idx_r[ds.i_idx].table < id {
            let idx = ds.idx_r[ds.i_idx];
            ds.i_idx += 1;
            let Some(reader) = ds.reader.as_ref() else {
                return Err(SnapshotError::Internal(
                    "tombstone index entries without an open reader".into(),
                ));
            };
            let data = reader.read_del_data(&idx)?;
            ds.writer.write_del_data(idx.table, &data)?;
        }

        // Union with the existing records at equality, else insert.
        let mut data = if ds.i_idx < ds.idx_r.len() && ds.idx_r[ds.i_idx].table == id {
            let idx = ds.idx_r[ds.i_idx];
            ds.i_idx += 1;
            let Some(reader) = ds.reader.as_ref() else {
                return Err(SnapshotError::Internal(
                    "tombstone index entries without an open reader".into(),
                ));
            };
            reader.read_del_data(&idx)?
        } else {
            Vec::new()
        };
        let n_incoming = incoming.len();
        data.extend(incoming);
        ds.writer.write_del_data(id, &data)?;
        ds.last_id = Some(id);

        info!(
            vg_id = self.tsdb.vg_id(),
            suid = id.suid,
            uid = id.uid,
            entries = n_incoming,
            "snapshot write tombstones"
        );
        Ok(())
    }

    /// Opens the tombstone state: a reader over the `next` state's del
    /// file when one exists, and a fresh writer stamped with this stream's
    /// commit id.
    fn open_del_state(&self) -> Result<DelState, SnapshotError> {
        let (reader, idx_r) = match self.tsdb.fs().next_del_file()? {
            Some(del) => {
                let reader = DelFileReader::open(self.tsdb.dir(), self.tsdb.vg_id(), &del)?;
                let idx = reader.read_del_idx()?;
                (Some(reader), idx)
            }
            None => (None, Vec::new()),
        };

        let writer = DelFileWriter::create(self.tsdb.dir(), self.tsdb.vg_id(), self.commit_id)?;

        info!(vg_id = self.tsdb.vg_id(), "snapshot opened tombstone file to write");
        Ok(DelState {
            reader,
            idx_r,
            i_idx: 0,
            writer,
            last_id: None,
        })
    }

    /// Seals the tombstone phase: drains remaining existing entries as
    /// passthrough, finalizes the file, and registers it in `next`.
    fn end_del_state(&mut self) -> Result<(), SnapshotError> {
        let state = mem::replace(&mut self.state, WriterState::Idle);
        let WriterState::DelOpen(mut ds) = state else {
            self.state = state;
            return Ok(());
        };

        while ds.i_idx < ds.idx_r.len() {
            let idx = ds.idx_r[ds.i_idx];
            ds.i_idx += 1;
            let Some(reader) = ds.reader.as_ref() else {
                return Err(SnapshotError::Internal(
                    "tombstone index entries without an open reader".into(),
                ));
            };
            let data = reader.read_del_data(&idx)?;
            ds.writer.write_del_data(idx.table, &data)?;
        }

        let del = ds.writer.close()?;
        self.tsdb.fs().next_upsert_del_file(del)?;

        info!(vg_id = self.tsdb.vg_id(), "snapshot tombstone file sealed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Commit / rollback
    // --------------------------------------------------------------------

    fn do_commit(&mut self) -> Result<(), SnapshotError> {
        self.end_data_state()?;
        self.end_del_state()?;
        self.tsdb.fs().commit()?;
        self.state = WriterState::Closed;

        info!(
            vg_id = self.tsdb.vg_id(),
            sver = self.sver,
            ever = self.ever,
            commit_id = self.commit_id,
            "snapshot writer committed"
        );
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<(), SnapshotError> {
        // Drop open readers and writers; partially-written files stay on
        // disk until the sweep below removes them by commit-id.
        self.state = WriterState::Closed;
        self.tsdb.fs().rollback()?;

        info!(
            vg_id = self.tsdb.vg_id(),
            commit_id = self.commit_id,
            "snapshot writer rolled back"
        );
        Ok(())
    }
}

impl Drop for SnapWriter<'_> {
    fn drop(&mut self) {
        if !matches!(self.state, WriterState::Closed) {
            warn!(
                vg_id = self.tsdb.vg_id(),
                "snapshot writer dropped without close, rolling back"
            );
            if let Err(e) = self.do_rollback() {
                warn!(vg_id = self.tsdb.vg_id(), error = %e, "rollback on drop failed");
            }
        }
    }
}

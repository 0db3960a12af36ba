//! Shared fixtures for the snapshot tests: frame builders, a canned vnode
//! configuration, and committed-state inspection helpers.

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::block::{BlockData, Cell, ColType, DelData, Row, RowCell, RowKey, TableId};
use crate::datafile::DataFileReader;
use crate::encoding::{self, Encode};
use crate::fileset::Precision;
use crate::snapshot::{FrameType, SnapFrame};
use crate::tsdb::{Tsdb, TsdbConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One-day partitions in milliseconds, small blocks so merges flush early.
pub fn test_config(commit_id: i64) -> TsdbConfig {
    TsdbConfig {
        minutes: 24 * 60,
        precision: Precision::Milli,
        min_row: 10,
        max_row: 100,
        cmpr_alg: 0,
        commit_id,
    }
}

pub fn open_tsdb(temp: &TempDir, commit_id: i64) -> Tsdb {
    Tsdb::open(temp.path(), 1, test_config(commit_id)).expect("tsdb open failed")
}

/// Reopens the same directory with a fresh commit stamp, as the driver
/// does for each new snapshot stream.
pub fn reopen_tsdb(temp: &TempDir, commit_id: i64) -> Tsdb {
    open_tsdb(temp, commit_id)
}

/// A row with a single integer column (cid 1).
pub fn int_row(ts: i64, version: i64, value: i64) -> Row {
    Row {
        key: RowKey { ts, version },
        cells: vec![RowCell {
            cid: 1,
            ctype: ColType::I64,
            sma_on: true,
            cell: Cell::I64(value),
        }],
    }
}

/// A row with a single byte-string column (cid 1).
pub fn bytes_row(ts: i64, version: i64, value: &[u8]) -> Row {
    Row {
        key: RowKey { ts, version },
        cells: vec![RowCell {
            cid: 1,
            ctype: ColType::Bytes,
            sma_on: false,
            cell: Cell::Bytes(value.to_vec()),
        }],
    }
}

/// Builds an encoded `type = 1` frame from rows (which must be strictly
/// ascending by key).
pub fn data_frame(suid: i64, uid: i64, rows: &[Row]) -> Vec<u8> {
    let mut bd = BlockData::new();
    for row in rows {
        bd.append_row(row).expect("fixture rows out of order");
    }
    SnapFrame {
        ftype: FrameType::Data,
        table: TableId { suid, uid },
        body: encoding::encode_to_vec(&bd).expect("encode block data"),
    }
    .encode()
    .expect("encode frame")
}

/// Builds an encoded `type = 2` frame from deletion records.
pub fn del_frame(suid: i64, uid: i64, dels: &[DelData]) -> Vec<u8> {
    let mut body = Vec::new();
    for d in dels {
        d.encode_to(&mut body).expect("encode del data");
    }
    SnapFrame {
        ftype: FrameType::Del,
        table: TableId { suid, uid },
        body,
    }
    .encode()
    .expect("encode frame")
}

/// Pulls every frame out of a reader.
pub fn drain(tsdb: &Tsdb, sver: i64, ever: i64) -> Vec<Vec<u8>> {
    let mut reader = tsdb.snap_reader(sver, ever);
    let mut frames = Vec::new();
    while let Some(frame) = reader.next().expect("reader failed") {
        frames.push(frame);
    }
    frames
}

/// Streams `frames` into a fresh writer and commits.
pub fn ingest(tsdb: &Tsdb, frames: &[Vec<u8>]) {
    let mut writer = tsdb.snap_writer(0, i64::MAX).expect("writer open failed");
    for frame in frames {
        writer.write(frame).expect("write failed");
    }
    writer.close(false).expect("commit failed");
}

/// Every committed table's rows, in catalog order, concatenated across
/// file sets.
pub fn committed_tables(tsdb: &Tsdb) -> Vec<(TableId, Vec<Row>)> {
    let mut out: Vec<(TableId, Vec<Row>)> = Vec::new();
    let state = tsdb.fs().current_state().expect("state");
    for fset in state.file_sets() {
        let reader = DataFileReader::open(tsdb.dir(), tsdb.vg_id(), &fset).expect("open fset");
        for idx in reader.read_block_idx().expect("block idx") {
            let mut rows = Vec::new();
            for block in reader.read_block_map(&idx).expect("block map") {
                rows.extend(reader.read_block_data(&block).expect("block data").rows());
            }
            match out.iter_mut().find(|(t, _)| *t == idx.table) {
                Some((_, existing)) => existing.extend(rows),
                None => out.push((idx.table, rows)),
            }
        }
    }
    out
}

/// Rows of one committed table.
pub fn committed_rows(tsdb: &Tsdb, suid: i64, uid: i64) -> Vec<Row> {
    let id = TableId { suid, uid };
    committed_tables(tsdb)
        .into_iter()
        .find(|(t, _)| *t == id)
        .map(|(_, rows)| rows)
        .unwrap_or_default()
}

//! Per-table three-way merge.
//!
//! Within one `(suid, uid)` the writer reconciles three row sources:
//!
//! 1. the table's existing **regular blocks** (non-overlapping, ordered by
//!    `min_key.ts`, decoded lazily),
//! 2. the table's existing **last block** (an under-sized tail whose keys
//!    may land anywhere),
//! 3. the **incoming rows** accumulated from the stream's frames.
//!
//! Rows are pulled in global `(ts asc, version asc)` order.  When an
//! incoming row and an existing row share a key, the incoming row wins —
//! it represents the authoritative newer state.  A regular block whose
//! whole key range lies strictly below every unmerged row from the other
//! two sources is copied **verbatim** (no decode) while the staging buffer
//! is empty; everything else is row-merged through the staging buffer,
//! which flushes a regular block whenever it reaches `max_row * 4 / 5`
//! rows.  The end-of-table tail becomes the new last block when it is
//! under `min_row`, a regular block otherwise.

use crate::block::{Block, BlockData, Row, RowKey};
use crate::datafile::{DataFileReader, DataFileWriter};

use super::SnapshotError;

/// Inputs of one table's merge.
pub(crate) struct TableMergeInput<'r> {
    /// Reader over the existing file set; required whenever existing
    /// blocks are present.
    pub reader: Option<&'r DataFileReader>,

    /// The table's existing regular blocks, in stored order.
    pub exist_blocks: Vec<Block>,

    /// The table's existing last block, if any.
    pub exist_last: Option<Block>,

    /// Incoming rows in frame-arrival order.  Each frame's rows are
    /// strictly ascending, but later frames may overlap earlier ones; on
    /// equal keys the later row wins.
    pub incoming: Vec<Row>,
}

/// Lazily-decoded row stream over a table's regular blocks.
struct BlockStream<'r> {
    reader: Option<&'r DataFileReader>,
    blocks: Vec<Block>,
    i_block: usize,
    cur: Option<(BlockData, usize)>,
}

impl<'r> BlockStream<'r> {
    fn new(reader: Option<&'r DataFileReader>, blocks: Vec<Block>) -> Self {
        Self {
            reader,
            blocks,
            i_block: 0,
            cur: None,
        }
    }

    /// `true` while no block is partially consumed.
    fn at_boundary(&self) -> bool {
        self.cur.is_none()
    }

    /// The next whole, undecoded block — only meaningful at a boundary.
    fn peek_block(&self) -> Option<&Block> {
        if self.cur.is_some() {
            None
        } else {
            self.blocks.get(self.i_block)
        }
    }

    /// Key of the next row.  Uses the block's recorded `min_key` when the
    /// block is not yet decoded, so peeking never costs I/O.
    fn peek_key(&self) -> Option<RowKey> {
        match &self.cur {
            Some((bdata, i)) => Some(bdata.key(*i)),
            None => self.blocks.get(self.i_block).map(|b| b.min_key),
        }
    }

    /// Pulls the next row, decoding the next block on demand.
    fn next_row(&mut self) -> Result<Option<Row>, SnapshotError> {
        if self.cur.is_none() {
            let Some(block) = self.blocks.get(self.i_block) else {
                return Ok(None);
            };
            let Some(reader) = self.reader else {
                return Err(SnapshotError::Internal(
                    "existing blocks without an open reader".into(),
                ));
            };
            self.cur = Some((reader.read_block_data(block)?, 0));
        }

        let Some((bdata, i)) = &mut self.cur else {
            return Ok(None);
        };
        let row = bdata.row(*i);
        *i += 1;
        if *i >= bdata.n_row() {
            self.cur = None;
            self.i_block += 1;
        }
        Ok(Some(row))
    }

    /// Skips a whole undecoded block after it was copied verbatim.
    fn skip_block(&mut self) {
        self.i_block += 1;
    }
}

/// Stable-sorts the accumulated incoming rows and collapses duplicate keys,
/// keeping the **latest** arrival for each `(ts, version)`.
fn normalize_incoming(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by_key(|r| r.key);
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.last_mut() {
            Some(prev) if prev.key == row.key => *prev = row,
            _ => out.push(row),
        }
    }
    out
}

/// Merges one table and writes its output blocks.
///
/// Returns the table's new block map, ordered by `min_key.ts` with the
/// optional last block trailing.
pub(crate) fn merge_table(
    input: TableMergeInput<'_>,
    writer: &mut DataFileWriter,
    min_row: usize,
    max_row: usize,
) -> Result<Vec<Block>, SnapshotError> {
    let incoming = normalize_incoming(input.incoming);
    let mut i_in = 0usize;

    // The last block's keys may overlap anywhere, so it is loaded up front
    // and merged as an ordinary sorted source.
    let last_rows: Vec<Row> = match &input.exist_last {
        Some(block) => {
            let Some(reader) = input.reader else {
                return Err(SnapshotError::Internal(
                    "existing last block without an open reader".into(),
                ));
            };
            reader.read_block_data(block)?.rows()
        }
        None => Vec::new(),
    };
    let mut i_last = 0usize;

    let mut exist = BlockStream::new(input.reader, input.exist_blocks);

    let mut stage = BlockData::new();
    let mut out: Vec<Block> = Vec::new();
    let flush_threshold = (max_row * 4 / 5).max(1);

    loop {
        // Block-level passthrough: the whole next block sits strictly below
        // every unmerged row of the other two sources.
        if stage.is_empty() && exist.at_boundary() {
            if let Some(block) = exist.peek_block() {
                let other_min_ts = match (
                    last_rows.get(i_last).map(|r| r.key.ts),
                    incoming.get(i_in).map(|r| r.key.ts),
                ) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if other_min_ts.is_none_or(|ts| block.max_key.ts < ts) {
                    let Some(reader) = input.reader else {
                        return Err(SnapshotError::Internal(
                            "existing blocks without an open reader".into(),
                        ));
                    };
                    let (payload, sma) = reader.read_block_raw(block)?;
                    let rebased = writer.write_block_raw(&payload, sma.as_deref(), block)?;
                    out.push(rebased);
                    exist.skip_block();
                    continue;
                }
            }
        }

        let ek = exist.peek_key();
        let lk = last_rows.get(i_last).map(|r| r.key);
        let ik = incoming.get(i_in).map(|r| r.key);

        let Some(min_key) = [ek, lk, ik].into_iter().flatten().min() else {
            break;
        };

        let row = if ik == Some(min_key) {
            // Incoming wins a tie against either existing source; the
            // superseded existing rows are consumed and dropped.
            if ek == Some(min_key) {
                exist.next_row()?;
            }
            if lk == Some(min_key) {
                i_last += 1;
            }
            let row = incoming[i_in].clone();
            i_in += 1;
            row
        } else if ek == Some(min_key) {
            match exist.next_row()? {
                Some(row) => row,
                None => return Err(SnapshotError::Internal("block stream underflow".into())),
            }
        } else {
            let row = last_rows[i_last].clone();
            i_last += 1;
            row
        };

        stage.append_row(&row)?;
        if stage.n_row() >= flush_threshold {
            out.push(writer.write_block_data(&stage, false)?);
            stage.clear();
        }
    }

    if !stage.is_empty() {
        let is_last = stage.n_row() < min_row;
        out.push(writer.write_block_data(&stage, is_last)?);
    }

    Ok(out)
}

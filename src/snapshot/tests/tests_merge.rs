//! Three-way merge tests: interleaving, passthrough, last-block
//! absorption, and block cutting.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::block::RowKey;
    use crate::datafile::DataFileReader;
    use crate::snapshot::tests::helpers::*;

    /// # Scenario
    /// Existing rows at versions 1 interleave with incoming rows at
    /// version 2 over an overlapping timestamp range.
    ///
    /// # Expected behavior
    /// Same timestamp with different versions keeps **both** rows; the
    /// committed table is strictly sorted by `(ts, version)` with no
    /// losses.
    #[test]
    fn interleaves_existing_and_incoming() {
        init_tracing();
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        let existing: Vec<_> = (100..120).map(|ts| int_row(ts, 1, ts)).collect();
        ingest(&tsdb, &[data_frame(1, 10, &existing)]);

        let tsdb = reopen_tsdb(&temp, 2);
        let incoming: Vec<_> = (110..130).map(|ts| int_row(ts, 2, -ts)).collect();
        ingest(&tsdb, &[data_frame(1, 10, &incoming)]);

        let rows = committed_rows(&tsdb, 1, 10);
        assert_eq!(rows.len(), 40);

        let keys: Vec<RowKey> = rows.iter().map(|r| r.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted, "committed rows must be strictly sorted");

        // Spot-check the overlap region: both versions survive.
        assert!(keys.contains(&RowKey { ts: 115, version: 1 }));
        assert!(keys.contains(&RowKey { ts: 115, version: 2 }));
    }

    /// # Scenario
    /// A full regular block strictly below the incoming range is copied
    /// verbatim; the existing last block is absorbed into the merge tail.
    ///
    /// # Starting environment
    /// 85 existing rows — with `max_row = 100` the writer cuts a regular
    /// block of 80 rows and a 5-row last block.
    ///
    /// # Actions
    /// Stream 5 rows far above the existing range.
    ///
    /// # Expected behavior
    /// - The 80-row block's payload bytes are unchanged (passthrough).
    /// - The old last block's rows and the incoming rows merge into one
    ///   10-row tail, re-emitted as a regular block (`10 >= min_row`).
    #[test]
    fn passthrough_and_last_absorption() {
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        let existing: Vec<_> = (0..85).map(|ts| int_row(ts, 1, ts)).collect();
        ingest(&tsdb, &[data_frame(1, 10, &existing)]);

        let (payload_before, blocks_before) = {
            let state = tsdb.fs().current_state().unwrap();
            let set = &state.file_sets()[0];
            let reader = DataFileReader::open(tsdb.dir(), tsdb.vg_id(), set).unwrap();
            let idx = reader.read_block_idx().unwrap();
            let blocks = reader.read_block_map(&idx[0]).unwrap();
            (reader.read_block_raw(&blocks[0]).unwrap().0, blocks)
        };
        assert_eq!(blocks_before.len(), 2);
        assert_eq!(blocks_before[0].n_row, 80);
        assert!(!blocks_before[0].last);
        assert_eq!(blocks_before[1].n_row, 5);
        assert!(blocks_before[1].last);

        let tsdb = reopen_tsdb(&temp, 2);
        let incoming: Vec<_> = (200..205).map(|ts| int_row(ts, 2, ts)).collect();
        ingest(&tsdb, &[data_frame(1, 10, &incoming)]);

        let state = tsdb.fs().current_state().unwrap();
        let set = &state.file_sets()[0];
        let reader = DataFileReader::open(tsdb.dir(), tsdb.vg_id(), set).unwrap();
        let idx = reader.read_block_idx().unwrap();
        let blocks = reader.read_block_map(&idx[0]).unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].n_row, 80);
        assert!(!blocks[0].last);
        assert_eq!(reader.read_block_raw(&blocks[0]).unwrap().0, payload_before);

        // 5 old last-block rows + 5 incoming rows, at or above min_row.
        assert_eq!(blocks[1].n_row, 10);
        assert!(!blocks[1].last);
        assert_eq!(blocks[1].min_key, RowKey { ts: 80, version: 1 });
        assert_eq!(blocks[1].max_key, RowKey { ts: 204, version: 2 });
    }

    /// # Scenario
    /// An undersized merge tail is re-emitted as the new last block.
    #[test]
    fn undersized_tail_stays_last() {
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        ingest(&tsdb, &[data_frame(1, 10, &[int_row(0, 1, 0)])]);

        let tsdb = reopen_tsdb(&temp, 2);
        ingest(&tsdb, &[data_frame(1, 10, &[int_row(1, 1, 1)])]);

        let state = tsdb.fs().current_state().unwrap();
        let reader =
            DataFileReader::open(tsdb.dir(), tsdb.vg_id(), &state.file_sets()[0]).unwrap();
        let idx = reader.read_block_idx().unwrap();
        let blocks = reader.read_block_map(&idx[0]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].n_row, 2);
        assert!(blocks[0].last);
    }

    /// # Scenario
    /// Incoming rows alone are cut into blocks at `max_row * 4 / 5`, with
    /// the remainder's size deciding regular vs. last.
    #[test]
    fn cuts_blocks_at_flush_threshold() {
        let temp = TempDir::new().unwrap();

        // 165 rows with max_row = 100: two 80-row blocks and a 5-row last.
        let tsdb = open_tsdb(&temp, 1);
        let rows: Vec<_> = (0..165).map(|ts| int_row(ts, 1, ts)).collect();
        ingest(
            &tsdb,
            &[
                data_frame(1, 10, &rows[..100]),
                data_frame(1, 10, &rows[100..]),
            ],
        );

        let state = tsdb.fs().current_state().unwrap();
        let reader =
            DataFileReader::open(tsdb.dir(), tsdb.vg_id(), &state.file_sets()[0]).unwrap();
        let idx = reader.read_block_idx().unwrap();
        let blocks = reader.read_block_map(&idx[0]).unwrap();

        let shape: Vec<(u32, bool)> = blocks.iter().map(|b| (b.n_row, b.last)).collect();
        assert_eq!(shape, vec![(80, false), (80, false), (5, true)]);
    }

    /// # Scenario
    /// Within one stream, a later frame's row supersedes an earlier
    /// frame's row at the same `(ts, version)`.
    #[test]
    fn later_frame_wins_within_stream() {
        let temp = TempDir::new().unwrap();
        let tsdb = open_tsdb(&temp, 1);

        ingest(
            &tsdb,
            &[
                data_frame(1, 10, &[bytes_row(100, 5, b"old")]),
                data_frame(1, 10, &[bytes_row(100, 5, b"new")]),
            ],
        );

        let rows = committed_rows(&tsdb, 1, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].cells[0].cell,
            crate::block::Cell::Bytes(b"new".to_vec())
        );
    }
}

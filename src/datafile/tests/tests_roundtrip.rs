//! Write/read round-trip tests over one file set.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::block::{BlockData, Cell, ColType, Row, RowCell, RowKey, TableId};
    use crate::datafile::{DataFileError, DataFileReader, DataFileWriter, compute_sma};
    use crate::fileset::{DiskId, FileSet};

    const VG: i32 = 1;

    fn block_data(ts0: i64, n: i64) -> BlockData {
        let mut bd = BlockData::new();
        for i in 0..n {
            bd.append_row(&Row {
                key: RowKey {
                    ts: ts0 + i,
                    version: 1,
                },
                cells: vec![
                    RowCell {
                        cid: 1,
                        ctype: ColType::I64,
                        sma_on: true,
                        cell: Cell::I64(i),
                    },
                    RowCell {
                        cid: 2,
                        ctype: ColType::Bytes,
                        sma_on: false,
                        cell: Cell::Bytes(vec![i as u8; 3]),
                    },
                ],
            })
            .unwrap();
        }
        bd
    }

    // ----------------------------------------------------------------
    // Full round-trip
    // ----------------------------------------------------------------

    /// # Scenario
    /// Two tables, one with a regular and a last block, written and read
    /// back through the block index.
    ///
    /// # Expected behavior
    /// Index entries, block maps, payloads, and statistics all match what
    /// was written.
    #[test]
    fn writes_and_reads_a_file_set() {
        let temp = TempDir::new().unwrap();
        let fset = FileSet::new(0, DiskId::default(), 5);
        let mut writer = DataFileWriter::create(temp.path(), VG, fset, 0).unwrap();

        let t1 = TableId { suid: 1, uid: 10 };
        let t2 = TableId { suid: 1, uid: 20 };

        let bd1 = block_data(100, 50);
        let bd1_tail = block_data(200, 3);
        let b1 = writer.write_block_data(&bd1, false).unwrap();
        let b1_tail = writer.write_block_data(&bd1_tail, true).unwrap();
        writer.finish_table(t1, &[b1, b1_tail]).unwrap();

        let bd2 = block_data(100, 10);
        let b2 = writer.write_block_data(&bd2, false).unwrap();
        writer.finish_table(t2, &[b2]).unwrap();

        let finalized = writer.close().unwrap();
        assert!(finalized.head.size > 0);
        assert!(finalized.head.offset > 0);

        let reader = DataFileReader::open(temp.path(), VG, &finalized).unwrap();
        let idx = reader.read_block_idx().unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0].table, t1);
        assert_eq!(idx[1].table, t2);

        let blocks1 = reader.read_block_map(&idx[0]).unwrap();
        assert_eq!(blocks1.len(), 2);
        assert!(!blocks1[0].last);
        assert!(blocks1[1].last);
        assert_eq!(blocks1[0].n_row, 50);
        assert_eq!(blocks1[0].min_key, RowKey { ts: 100, version: 1 });
        assert_eq!(blocks1[0].max_key, RowKey { ts: 149, version: 1 });

        assert_eq!(reader.read_block_data(&blocks1[0]).unwrap(), bd1);
        assert_eq!(reader.read_block_data(&blocks1[1]).unwrap(), bd1_tail);

        let blocks2 = reader.read_block_map(&idx[1]).unwrap();
        assert_eq!(reader.read_block_data(&blocks2[0]).unwrap(), bd2);
    }

    // ----------------------------------------------------------------
    // Column statistics
    // ----------------------------------------------------------------

    /// # Scenario
    /// Statistics are written for flagged numeric columns only and match
    /// a direct computation.
    #[test]
    fn statistics_round_trip() {
        let temp = TempDir::new().unwrap();
        let fset = FileSet::new(0, DiskId::default(), 5);
        let mut writer = DataFileWriter::create(temp.path(), VG, fset, 0).unwrap();

        let bd = block_data(100, 10);
        let block = writer.write_block_data(&bd, false).unwrap();
        assert!(block.sma_size > 0);
        writer
            .finish_table(TableId { suid: 1, uid: 10 }, &[block])
            .unwrap();
        let finalized = writer.close().unwrap();

        let reader = DataFileReader::open(temp.path(), VG, &finalized).unwrap();
        let sma = reader.read_block_sma(&block).unwrap();
        assert_eq!(sma, compute_sma(&bd));
        assert_eq!(sma.len(), 1); // the bytes column is never aggregated
        assert_eq!(sma[0].cid, 1);
        assert_eq!(sma[0].n, 10);
        assert_eq!(sma[0].sum, (0..10).sum::<i64>() as f64);
        assert_eq!(sma[0].min, 0.0);
        assert_eq!(sma[0].max, 9.0);
    }

    // ----------------------------------------------------------------
    // Verbatim copy
    // ----------------------------------------------------------------

    /// # Scenario
    /// A block copied raw into a second file set carries byte-identical
    /// payload and statistics sections.
    #[test]
    fn raw_copy_preserves_bytes() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let dst_dir = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();
        std::fs::create_dir_all(&dst_dir).unwrap();

        let table = TableId { suid: 1, uid: 10 };
        let bd = block_data(100, 20);

        let mut writer =
            DataFileWriter::create(&src_dir, VG, FileSet::new(0, DiskId::default(), 5), 0).unwrap();
        let block = writer.write_block_data(&bd, false).unwrap();
        writer.finish_table(table, &[block]).unwrap();
        let src_set = writer.close().unwrap();

        let src = DataFileReader::open(&src_dir, VG, &src_set).unwrap();
        let (payload, sma) = src.read_block_raw(&block).unwrap();

        let mut writer =
            DataFileWriter::create(&dst_dir, VG, FileSet::new(0, DiskId::default(), 6), 0).unwrap();
        let copied = writer
            .write_block_raw(&payload, sma.as_deref(), &block)
            .unwrap();
        writer.finish_table(table, &[copied]).unwrap();
        let dst_set = writer.close().unwrap();

        assert_eq!(copied.n_row, block.n_row);
        assert_eq!(copied.min_key, block.min_key);
        assert_eq!(copied.max_key, block.max_key);

        let dst = DataFileReader::open(&dst_dir, VG, &dst_set).unwrap();
        let (payload2, sma2) = dst.read_block_raw(&copied).unwrap();
        assert_eq!(payload2, payload);
        assert_eq!(sma2, sma);
        assert_eq!(dst.read_block_data(&copied).unwrap(), bd);
    }

    // ----------------------------------------------------------------
    // Misuse
    // ----------------------------------------------------------------

    /// # Scenario
    /// Sealing tables out of `(suid, uid)` order and writing an empty
    /// block are both refused.
    #[test]
    fn rejects_misuse() {
        let temp = TempDir::new().unwrap();
        let fset = FileSet::new(0, DiskId::default(), 5);
        let mut writer = DataFileWriter::create(temp.path(), VG, fset, 0).unwrap();

        let err = writer.write_block_data(&BlockData::new(), false).unwrap_err();
        assert!(matches!(err, DataFileError::Internal(_)));

        let bd = block_data(100, 5);
        let b = writer.write_block_data(&bd, false).unwrap();
        writer.finish_table(TableId { suid: 2, uid: 1 }, &[b]).unwrap();

        let b = writer.write_block_data(&bd, false).unwrap();
        let err = writer
            .finish_table(TableId { suid: 1, uid: 1 }, &[b])
            .unwrap_err();
        assert!(matches!(err, DataFileError::Internal(_)));
    }

    /// # Scenario
    /// An empty file set (no tables) still closes and reopens cleanly.
    #[test]
    fn empty_file_set_round_trips() {
        let temp = TempDir::new().unwrap();
        let fset = FileSet::new(3, DiskId::default(), 5);
        let writer = DataFileWriter::create(temp.path(), VG, fset, 0).unwrap();
        let finalized = writer.close().unwrap();

        let reader = DataFileReader::open(temp.path(), VG, &finalized).unwrap();
        assert!(reader.read_block_idx().unwrap().is_empty());
    }
}

//! Snapshot reader tests: version filtering, stream ordering, and the
//! data-then-tombstone phase contract.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::block::DelData;
    use crate::encoding::Decode;
    use crate::snapshot::SnapFrame;
    use crate::snapshot::tests::helpers::*;

    /// # Scenario
    /// An empty vnode yields an empty stream.
    #[test]
    fn empty_vnode_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let tsdb = open_tsdb(&temp, 1);
        assert!(drain(&tsdb, 0, i64::MAX).is_empty());
    }

    /// # Scenario
    /// Existing rows carry versions 1..=5; a reader with `sver = 2,
    /// ever = 4` emits exactly the rows with versions 3 and 4.
    #[test]
    fn filters_rows_by_version_range() {
        init_tracing();
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        let rows: Vec<_> = (1..=5).map(|v| int_row(100 * v, v, v)).collect();
        ingest(&tsdb, &[data_frame(1, 10, &rows)]);

        let frames = drain(&tsdb, 2, 4);
        assert_eq!(frames.len(), 1);

        let frame = SnapFrame::decode(&frames[0]).unwrap();
        let (bd, _) = crate::block::BlockData::decode_from(&frame.body).unwrap();
        let versions: Vec<i64> = (0..bd.n_row()).map(|i| bd.key(i).version).collect();
        assert_eq!(versions, vec![3, 4]);
    }

    /// # Scenario
    /// Tombstone entries obey the same `(sver, ever]` predicate; an entry
    /// whose records all fall outside the range is skipped entirely.
    #[test]
    fn filters_tombstones_by_version_range() {
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        let d = |v| DelData {
            version: v,
            s_key: 0,
            e_key: 10,
        };
        ingest(
            &tsdb,
            &[
                del_frame(1, 10, &[d(1), d(3), d(9)]),
                del_frame(1, 20, &[d(1)]),
            ],
        );

        let frames = drain(&tsdb, 2, 4);
        assert_eq!(frames.len(), 1);

        let frame = SnapFrame::decode(&frames[0]).unwrap();
        assert_eq!(frame.table.uid, 10);
        let (del, n) = DelData::decode_from(&frame.body).unwrap();
        assert_eq!(n, frame.body.len());
        assert_eq!(del.version, 3);
    }

    /// # Scenario
    /// With two partitions, two tables, and tombstones present, the
    /// stream is: data frames in `(fid, suid, uid)` order, then tombstone
    /// frames in `(suid, uid)` order.
    #[test]
    fn stream_is_ordered() {
        let temp = TempDir::new().unwrap();
        let day = 24 * 60 * 60 * 1000i64;

        let tsdb = open_tsdb(&temp, 1);
        ingest(
            &tsdb,
            &[
                // fid 0
                data_frame(1, 10, &[int_row(100, 1, 0)]),
                data_frame(2, 5, &[int_row(200, 1, 0)]),
                // fid 1
                data_frame(1, 10, &[int_row(day + 100, 1, 0)]),
                // tombstones
                del_frame(1, 10, &[DelData { version: 1, s_key: 0, e_key: 1 }]),
                del_frame(2, 5, &[DelData { version: 1, s_key: 0, e_key: 1 }]),
            ],
        );

        let frames = drain(&tsdb, 0, i64::MAX);
        let decoded: Vec<_> = frames
            .iter()
            .map(|f| SnapFrame::decode(f).unwrap())
            .collect();

        let kinds: Vec<u8> = decoded
            .iter()
            .map(|f| match f.ftype {
                crate::snapshot::FrameType::Data => 1,
                crate::snapshot::FrameType::Del => 2,
            })
            .collect();
        assert_eq!(kinds, vec![1, 1, 1, 2, 2]);

        // Data phase: (fid 0, (1,10)), (fid 0, (2,5)), (fid 1, (1,10)).
        assert_eq!(
            (decoded[0].table.suid, decoded[0].table.uid),
            (1, 10)
        );
        assert_eq!((decoded[1].table.suid, decoded[1].table.uid), (2, 5));
        assert_eq!((decoded[2].table.suid, decoded[2].table.uid), (1, 10));

        // Tombstone phase in (suid, uid) order.
        assert_eq!((decoded[3].table.suid, decoded[3].table.uid), (1, 10));
        assert_eq!((decoded[4].table.suid, decoded[4].table.uid), (2, 5));
    }

    /// # Scenario
    /// Blocks whose version bounds lie outside the range are skipped
    /// without emitting an empty frame.
    #[test]
    fn skips_out_of_range_blocks() {
        let temp = TempDir::new().unwrap();

        let tsdb = open_tsdb(&temp, 1);
        ingest(&tsdb, &[data_frame(1, 10, &[int_row(100, 5, 1)])]);

        assert!(drain(&tsdb, 5, i64::MAX).is_empty());
        assert!(drain(&tsdb, 0, 4).is_empty());
        assert_eq!(drain(&tsdb, 4, 5).len(), 1);
    }
}

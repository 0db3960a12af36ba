//! Partition mapping and file-naming tests.

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::fileset::{
        DelFile, DiskId, FileSet, ParsedName, Precision, SubFileKind, fid_for_ts, parse_file_name,
    };

    // ----------------------------------------------------------------
    // fid mapping
    // ----------------------------------------------------------------

    /// # Scenario
    /// Timestamps bucket into partitions of `minutes` width at the
    /// configured precision; boundaries are half-open.
    #[test]
    fn fid_buckets_by_partition_width() {
        // One-day partitions in milliseconds.
        let day_ms = 24 * 60 * 60 * 1000i64;
        assert_eq!(fid_for_ts(0, 24 * 60, Precision::Milli), 0);
        assert_eq!(fid_for_ts(day_ms - 1, 24 * 60, Precision::Milli), 0);
        assert_eq!(fid_for_ts(day_ms, 24 * 60, Precision::Milli), 1);
        assert_eq!(fid_for_ts(3 * day_ms + 5, 24 * 60, Precision::Milli), 3);
    }

    /// # Scenario
    /// Pre-epoch timestamps land in negative partitions instead of
    /// sharing partition 0.
    #[test]
    fn fid_floors_negative_timestamps() {
        let day_ms = 24 * 60 * 60 * 1000i64;
        assert_eq!(fid_for_ts(-1, 24 * 60, Precision::Milli), -1);
        assert_eq!(fid_for_ts(-day_ms, 24 * 60, Precision::Milli), -1);
        assert_eq!(fid_for_ts(-day_ms - 1, 24 * 60, Precision::Milli), -2);
    }

    /// # Scenario
    /// The same wall-clock width maps to the same fid across precisions.
    #[test]
    fn fid_scales_with_precision() {
        let minutes = 60; // one-hour partitions
        let hour_ms = 60 * 60 * 1000i64;
        assert_eq!(fid_for_ts(5 * hour_ms, minutes, Precision::Milli), 5);
        assert_eq!(fid_for_ts(5 * hour_ms * 1000, minutes, Precision::Micro), 5);
        assert_eq!(
            fid_for_ts(5 * hour_ms * 1_000_000, minutes, Precision::Nano),
            5
        );
    }

    // ----------------------------------------------------------------
    // File naming
    // ----------------------------------------------------------------

    /// # Scenario
    /// Sub-file paths carry vnode, fid, and commit stamp, and parse back
    /// to the same identity.
    #[test]
    fn sub_file_names_round_trip() {
        let fset = FileSet::new(-3, DiskId::default(), 42);
        let dir = Path::new("/data");

        let head = fset.sub_path(dir, 7, SubFileKind::Head);
        assert_eq!(head, Path::new("/data/v7f-3ver42.head"));

        for kind in SubFileKind::ALL {
            let path = fset.sub_path(dir, 7, kind);
            let name = path.file_name().unwrap().to_str().unwrap();
            assert_eq!(
                parse_file_name(name, 7),
                Some(ParsedName::Data {
                    fid: -3,
                    commit_id: 42,
                    kind
                })
            );
        }
    }

    /// # Scenario
    /// Tombstone file names round-trip the same way.
    #[test]
    fn del_file_names_round_trip() {
        let del = DelFile {
            commit_id: 9,
            size: 0,
            offset: 0,
        };
        let path = del.path(Path::new("/data"), 7);
        assert_eq!(path, Path::new("/data/v7ver9.del"));

        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_file_name(name, 7), Some(ParsedName::Del { commit_id: 9 }));
    }

    /// # Scenario
    /// Names of other vnodes and foreign files are not recognised, so the
    /// sweep can never touch them.
    #[test]
    fn foreign_names_are_ignored() {
        assert_eq!(parse_file_name("v7f1ver2.head", 8), None);
        assert_eq!(parse_file_name("v70f1ver2.head", 7), None);
        assert_eq!(parse_file_name("v7f1ver2.wal", 7), None);
        assert_eq!(parse_file_name("CURRENT", 7), None);
        assert_eq!(parse_file_name("v7f1ver.head", 7), None);
        assert_eq!(parse_file_name("v7fxver2.head", 7), None);
    }
}

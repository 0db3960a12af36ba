//! Vnode-context lifecycle tests.

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::fileset::Precision;
    use crate::tsdb::{Tsdb, TsdbConfig};

    fn config() -> TsdbConfig {
        TsdbConfig {
            minutes: 24 * 60,
            precision: Precision::Milli,
            min_row: 10,
            max_row: 100,
            cmpr_alg: 0,
            commit_id: 1,
        }
    }

    /// # Scenario
    /// Opening a vnode on a missing directory creates it with an empty
    /// catalog.
    #[test]
    fn open_initializes_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("vnode2");

        let tsdb = Tsdb::open(&dir, 2, config()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(tsdb.vg_id(), 2);
        assert!(tsdb.fs().current_state().unwrap().file_sets().is_empty());
    }

    /// # Scenario
    /// Open sweeps debris from a crashed stream: a commit-stamped file no
    /// catalog references disappears, foreign files stay.
    #[test]
    fn open_sweeps_crash_debris() {
        let temp = TempDir::new().unwrap();
        let debris = temp.path().join("v2f0ver99.head");
        let foreign = temp.path().join("README");
        fs::write(&debris, b"junk").unwrap();
        fs::write(&foreign, b"keep").unwrap();

        let _tsdb = Tsdb::open(temp.path(), 2, config()).unwrap();
        assert!(!debris.exists());
        assert!(foreign.exists());
    }
}

//! Vnode-level TSDB context.
//!
//! A [`Tsdb`] value owns everything one vnode's snapshot machinery needs:
//! the data directory, the configuration the stream endpoints draw from,
//! and the file-set [`registry`](crate::registry).  Snapshot readers and
//! writers borrow it; nothing here is ambient or global.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::fileset::Precision;
use crate::registry::{FsRegistry, RegistryError};
use crate::snapshot::{SnapReader, SnapWriter, SnapshotError};

/// Configuration of one vnode, as consumed by the snapshot core.
#[derive(Debug, Clone)]
pub struct TsdbConfig {
    /// Width of one time partition, in minutes.
    pub minutes: i32,

    /// Timestamp precision.
    pub precision: Precision,

    /// Row-count floor below which an end-of-table tail is kept as a last
    /// block.
    pub min_row: usize,

    /// Row-count ceiling per block; the merge flushes at `max_row * 4 / 5`.
    pub max_row: usize,

    /// Compression tag stamped into file headers.  Codecs are opaque to
    /// this crate; only the uncompressed representation is produced.
    pub cmpr_alg: u8,

    /// Generation stamp for files written by the next snapshot stream.
    /// Must differ from every live generation's stamp.
    pub commit_id: i64,
}

/// One vnode's TSDB: directory, configuration, and file-set catalog.
pub struct Tsdb {
    vg_id: i32,
    dir: PathBuf,
    cfg: TsdbConfig,
    fs: FsRegistry,
}

impl Tsdb {
    /// Opens (or initializes) a vnode directory: loads the file-set
    /// catalog and sweeps any debris left by crashed streams.
    pub fn open(
        dir: impl AsRef<Path>,
        vg_id: i32,
        cfg: TsdbConfig,
    ) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        let fs = FsRegistry::open(&dir, vg_id)?;
        fs.sweep()?;

        info!(vg_id, dir = %dir.display(), "tsdb opened");
        Ok(Self {
            vg_id,
            dir,
            cfg,
            fs,
        })
    }

    /// Vnode id.
    pub fn vg_id(&self) -> i32 {
        self.vg_id
    }

    /// Vnode data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the snapshot endpoints draw from.
    pub fn config(&self) -> &TsdbConfig {
        &self.cfg
    }

    /// The file-set registry.
    pub fn fs(&self) -> &FsRegistry {
        &self.fs
    }

    /// Creates a snapshot reader over the committed state for
    /// `(sver, ever]`.
    pub fn snap_reader(&self, sver: i64, ever: i64) -> SnapReader<'_> {
        SnapReader::new(self, sver, ever)
    }

    /// Creates a snapshot writer for `(sver, ever]`, claiming the `next`
    /// state exclusively.
    pub fn snap_writer(&self, sver: i64, ever: i64) -> Result<SnapWriter<'_>, SnapshotError> {
        SnapWriter::new(self, sver, ever)
    }
}

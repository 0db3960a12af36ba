//! File sets and time partitioning.
//!
//! A [`FileSet`] is one time partition of a vnode's data: four sub-files
//! (head, data, last, sma) identified by `fid`, the partition index.  A
//! partition covers the half-open timestamp interval
//! `[fid * minutes, (fid + 1) * minutes)` scaled by the vnode's
//! [`Precision`].
//!
//! Sub-files and tombstone files are named by `(vgId, fid, commitID)` /
//! `(vgId, commitID)`; the `commitID` stamp is what distinguishes a live
//! file generation from in-flight debris after a crash, so the naming
//! scheme is part of the durable format and both the composer and the
//! parser live here.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Precision and fid mapping
// ------------------------------------------------------------------------------------------------

/// Timestamp precision of a vnode.  All row timestamps and partition
/// boundaries are expressed in ticks of this unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Milliseconds.
    Milli,

    /// Microseconds.
    Micro,

    /// Nanoseconds.
    Nano,
}

impl Precision {
    /// Number of ticks in one minute at this precision.
    pub fn ticks_per_minute(self) -> i64 {
        match self {
            Precision::Milli => 60 * 1_000,
            Precision::Micro => 60 * 1_000_000,
            Precision::Nano => 60 * 1_000_000_000,
        }
    }
}

/// Maps a timestamp to its partition index.
///
/// Euclidean floor division, so timestamps before the epoch bucket into
/// negative fids instead of sharing fid 0 with early positive timestamps.
pub fn fid_for_ts(ts: i64, minutes: i32, precision: Precision) -> i32 {
    let width = i64::from(minutes) * precision.ticks_per_minute();
    ts.div_euclid(width) as i32
}

// ------------------------------------------------------------------------------------------------
// File-set structures
// ------------------------------------------------------------------------------------------------

/// Placement of a file set on multi-tier storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskId {
    /// Storage tier.
    pub level: u8,

    /// Disk index within the tier.
    pub id: u16,
}

/// One of the four sub-files of a [`FileSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubFile {
    /// Commit stamp of the generation that produced this file.
    pub commit_id: i64,

    /// File size in bytes, recorded at finalize time.
    pub size: u64,

    /// Offset of the trailing index/footer section, where applicable.
    pub offset: u64,
}

/// Kind of sub-file within a data file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFileKind {
    /// Block maps and the block index.
    Head,

    /// Regular block payloads.
    Data,

    /// Trailing under-sized block payloads.
    Last,

    /// Per-block column statistics.
    Sma,
}

impl SubFileKind {
    /// File-name extension for this kind.
    pub fn ext(self) -> &'static str {
        match self {
            SubFileKind::Head => "head",
            SubFileKind::Data => "data",
            SubFileKind::Last => "last",
            SubFileKind::Sma => "sma",
        }
    }

    /// All four kinds, in canonical order.
    pub const ALL: [SubFileKind; 4] = [
        SubFileKind::Head,
        SubFileKind::Data,
        SubFileKind::Last,
        SubFileKind::Sma,
    ];
}

/// One time partition of a vnode's data: fid, placement, and the four
/// sub-files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSet {
    /// Partition index.
    pub fid: i32,

    /// Storage placement, inherited across rewrites of the same partition.
    pub disk_id: DiskId,

    /// Head sub-file (block maps + block index).
    pub head: SubFile,

    /// Data sub-file (regular blocks).
    pub data: SubFile,

    /// Last sub-file (under-sized trailing blocks).
    pub last: SubFile,

    /// Sma sub-file (column statistics).
    pub sma: SubFile,
}

impl FileSet {
    /// Creates an empty file set for `fid` with every sub-file stamped
    /// `commit_id`.
    pub fn new(fid: i32, disk_id: DiskId, commit_id: i64) -> Self {
        let sub = SubFile {
            commit_id,
            size: 0,
            offset: 0,
        };
        Self {
            fid,
            disk_id,
            head: sub,
            data: sub,
            last: sub,
            sma: sub,
        }
    }

    /// The sub-file of the given kind.
    pub fn sub(&self, kind: SubFileKind) -> &SubFile {
        match kind {
            SubFileKind::Head => &self.head,
            SubFileKind::Data => &self.data,
            SubFileKind::Last => &self.last,
            SubFileKind::Sma => &self.sma,
        }
    }

    /// On-disk path of one sub-file: `v{vg}f{fid}ver{commit_id}.{ext}`.
    pub fn sub_path(&self, dir: &Path, vg_id: i32, kind: SubFileKind) -> PathBuf {
        let sub = self.sub(kind);
        dir.join(format!(
            "v{vg_id}f{fid}ver{cid}.{ext}",
            fid = self.fid,
            cid = sub.commit_id,
            ext = kind.ext()
        ))
    }

    /// Paths of all four sub-files.
    pub fn sub_paths(&self, dir: &Path, vg_id: i32) -> [PathBuf; 4] {
        SubFileKind::ALL.map(|kind| self.sub_path(dir, vg_id, kind))
    }
}

/// The vnode's tombstone file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelFile {
    /// Commit stamp of the generation that produced this file.
    pub commit_id: i64,

    /// File size in bytes, recorded at finalize time.
    pub size: u64,

    /// Offset of the trailing `DelIdx` section.
    pub offset: u64,
}

impl DelFile {
    /// On-disk path: `v{vg}ver{commit_id}.del`.
    pub fn path(&self, dir: &Path, vg_id: i32) -> PathBuf {
        dir.join(format!("v{vg_id}ver{cid}.del", cid = self.commit_id))
    }
}

// ------------------------------------------------------------------------------------------------
// File-name parsing (crash-recovery sweep)
// ------------------------------------------------------------------------------------------------

/// A file name recognised as belonging to this vnode's durable format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedName {
    /// A data sub-file `v{vg}f{fid}ver{cid}.{ext}`.
    Data {
        /// Partition index encoded in the name.
        fid: i32,
        /// Commit stamp encoded in the name.
        commit_id: i64,
        /// Sub-file kind from the extension.
        kind: SubFileKind,
    },

    /// A tombstone file `v{vg}ver{cid}.del`.
    Del {
        /// Commit stamp encoded in the name.
        commit_id: i64,
    },
}

/// Parses a directory-entry name against the vnode's naming scheme.
///
/// Returns `None` for names of other vnodes or foreign files; the
/// crash-recovery sweep only ever touches names this function accepts.
pub fn parse_file_name(name: &str, vg_id: i32) -> Option<ParsedName> {
    let rest = name.strip_prefix(&format!("v{vg_id}"))?;
    let (stem, ext) = rest.rsplit_once('.')?;

    if ext == "del" {
        let cid = stem.strip_prefix("ver")?.parse::<i64>().ok()?;
        return Some(ParsedName::Del { commit_id: cid });
    }

    let kind = SubFileKind::ALL.into_iter().find(|k| k.ext() == ext)?;
    let stem = stem.strip_prefix('f')?;
    let (fid_str, cid_str) = stem.split_once("ver")?;
    let fid = fid_str.parse::<i32>().ok()?;
    let commit_id = cid_str.parse::<i64>().ok()?;
    Some(ParsedName::Data {
        fid,
        commit_id,
        kind,
    })
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for DiskId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.level.encode_to(buf)?;
        self.id.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DiskId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (level, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (id, n) = u16::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { level, id }, off))
    }
}

impl Encode for SubFile {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.commit_id.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SubFile {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (commit_id, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                commit_id,
                size,
                offset,
            },
            off,
        ))
    }
}

impl Encode for FileSet {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.fid.encode_to(buf)?;
        self.disk_id.encode_to(buf)?;
        self.head.encode_to(buf)?;
        self.data.encode_to(buf)?;
        self.last.encode_to(buf)?;
        self.sma.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for FileSet {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (fid, n) = i32::decode_from(&buf[off..])?;
        off += n;
        let (disk_id, n) = DiskId::decode_from(&buf[off..])?;
        off += n;
        let (head, n) = SubFile::decode_from(&buf[off..])?;
        off += n;
        let (data, n) = SubFile::decode_from(&buf[off..])?;
        off += n;
        let (last, n) = SubFile::decode_from(&buf[off..])?;
        off += n;
        let (sma, n) = SubFile::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                fid,
                disk_id,
                head,
                data,
                last,
                sma,
            },
            off,
        ))
    }
}

impl Encode for DelFile {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.commit_id.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for DelFile {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (commit_id, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                commit_id,
                size,
                offset,
            },
            off,
        ))
    }
}

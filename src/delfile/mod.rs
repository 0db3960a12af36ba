//! Tombstone-file reader/writer pair.
//!
//! The tombstone file holds every deletion record of a vnode: per-table
//! sections of [`DelData`] entries, followed by a [`DelIdx`] array sorted
//! by `(suid, uid)` and a footer locating it.  The file shares the
//! checksummed-section format and header/footer mechanics of the data
//! files — see [`crate::datafile`] — and is named `v{vg}ver{commitID}.del`.
//!
//! Like data files, a tombstone file is immutable once finalized; a merge
//! produces a new generation under a new `commitID` rather than editing in
//! place.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::block::{DelData, DelIdx, TableId};
use crate::datafile::{
    DataFileError, FILE_VERSION, FOOTER_SIZE, FileHdr, HDR_SIZE, IdxFooter, decode_footer,
    decode_header, encode_footer, encode_header, read_section, write_section,
};
use crate::encoding::{self, EncodingError};
use crate::fileset::DelFile;

const MAGIC_DEL: [u8; 4] = *b"TDL0";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by tombstone-file operations.
#[derive(Debug, Error)]
pub enum DelFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Header, footer, or section error from the shared file machinery.
    #[error("File error: {0}")]
    File(#[from] DataFileError),

    /// Internal invariant violation (bad magic, ordering misuse).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// DelFileWriter
// ------------------------------------------------------------------------------------------------

/// Builds one generation of the tombstone file.
pub struct DelFileWriter {
    vg_id: i32,
    del: DelFile,
    w: BufWriter<File>,
    pos: u64,
    del_idx: Vec<DelIdx>,
}

impl DelFileWriter {
    /// Creates a fresh tombstone file stamped `commit_id` and writes its
    /// header.
    pub fn create(dir: &Path, vg_id: i32, commit_id: i64) -> Result<Self, DelFileError> {
        let del = DelFile {
            commit_id,
            size: 0,
            offset: 0,
        };
        let path = del.path(dir, vg_id);
        let file = File::create_new(&path)?;
        let mut w = BufWriter::new(file);

        // The fid field is meaningless for the vnode-wide tombstone file;
        // it is written as zero and ignored on open.
        let hdr_bytes = encode_header(FileHdr {
            magic: MAGIC_DEL,
            version: FILE_VERSION,
            vg_id,
            fid: 0,
            commit_id,
            cmpr_alg: 0,
            crc: 0,
        })?;
        w.write_all(&hdr_bytes)?;

        debug!(vg_id, commit_id, "tombstone file created for write");
        Ok(Self {
            vg_id,
            del,
            w,
            pos: HDR_SIZE as u64,
            del_idx: Vec::new(),
        })
    }

    /// Writes one table's deletion records and records its index entry.
    /// Tables must be written in ascending `(suid, uid)` order.
    pub fn write_del_data(
        &mut self,
        table: TableId,
        data: &[DelData],
    ) -> Result<DelIdx, DelFileError> {
        if let Some(prev) = self.del_idx.last() {
            if table <= prev.table {
                return Err(DelFileError::Internal(format!(
                    "tombstone table (suid={}, uid={}) written out of order",
                    table.suid, table.uid
                )));
            }
        }

        let mut buf = Vec::new();
        encoding::encode_vec(data, &mut buf)?;
        let (offset, size) = write_section(&mut self.w, &mut self.pos, &buf)?;

        let idx = DelIdx {
            table,
            offset,
            size,
        };
        self.del_idx.push(idx);
        Ok(idx)
    }

    /// Writes the [`DelIdx`] array and footer, syncs the file, and returns
    /// the finalized [`DelFile`].
    pub fn close(mut self) -> Result<DelFile, DelFileError> {
        let mut buf = Vec::new();
        encoding::encode_vec(&self.del_idx, &mut buf)?;
        let (idx_offset, idx_size) = write_section(&mut self.w, &mut self.pos, &buf)?;

        let footer_bytes = encode_footer(IdxFooter {
            idx_offset,
            idx_size,
            crc: 0,
        })?;
        self.w.write_all(&footer_bytes)?;
        self.pos += FOOTER_SIZE as u64;

        self.w.flush()?;
        self.w.get_ref().sync_all()?;

        let mut del = self.del;
        del.offset = idx_offset;
        del.size = self.pos;

        debug!(
            vg_id = self.vg_id,
            tables = self.del_idx.len(),
            "tombstone file finalized"
        );
        Ok(del)
    }
}

// ------------------------------------------------------------------------------------------------
// DelFileReader
// ------------------------------------------------------------------------------------------------

/// Memory-mapped reader over one finalized tombstone file.
pub struct DelFileReader {
    mmap: Mmap,
}

impl DelFileReader {
    /// Opens and header-verifies the tombstone file `del`.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`; safe because finalized tombstone
    /// files are never written again and the map is read-only.
    pub fn open(dir: &Path, vg_id: i32, del: &DelFile) -> Result<Self, DelFileError> {
        let path = del.path(dir, vg_id);
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let hdr = decode_header(&mmap)?;
        if hdr.magic != MAGIC_DEL {
            return Err(DelFileError::Internal(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        if hdr.version != FILE_VERSION {
            return Err(DelFileError::Internal(format!(
                "unsupported version {} in {}",
                hdr.version,
                path.display()
            )));
        }
        if hdr.vg_id != vg_id || hdr.commit_id != del.commit_id {
            return Err(DelFileError::Internal(format!(
                "header identity mismatch in {}",
                path.display()
            )));
        }

        debug!(vg_id, commit_id = del.commit_id, "tombstone file opened for read");
        Ok(Self { mmap })
    }

    /// Reads the [`DelIdx`] array via the footer.
    pub fn read_del_idx(&self) -> Result<Vec<DelIdx>, DelFileError> {
        let footer = decode_footer(&self.mmap)?;
        let bytes = read_section(&self.mmap, footer.idx_offset, footer.idx_size)?;
        let (idx, _) = encoding::decode_vec::<DelIdx>(&bytes)?;
        Ok(idx)
    }

    /// Reads one table's deletion records.
    pub fn read_del_data(&self, idx: &DelIdx) -> Result<Vec<DelData>, DelFileError> {
        let bytes = read_section(&self.mmap, idx.offset, idx.size)?;
        let (data, _) = encoding::decode_vec::<DelData>(&bytes)?;
        Ok(data)
    }
}

//! Data-file reader/writer pair.
//!
//! One [`FileSet`] is four physical files:
//!
//! - **head** — per-table block maps followed by the [`BlockIdx`] array and
//!   a fixed-size footer locating it.
//! - **data** — checksummed, encoded [`BlockData`] payloads of regular
//!   blocks.
//! - **last** — the same, for each table's trailing under-sized block.
//! - **sma** — per-block column statistics ([`ColSma`]) for columns with
//!   the statistics flag set.
//!
//! # On-disk layout
//!
//! Every file begins with a CRC-protected header carrying a per-kind magic,
//! format version, `vgId`, `fid`, the generation's `commitID`, and the
//! configured compression tag.  All variable-length content is written as
//! checksummed sections:
//!
//! ```text
//! [SECTION_LEN_LE][SECTION_BYTES][SECTION_CRC32_LE]
//! ```
//!
//! The head file ends with a footer `{ idx_offset, idx_size, crc32 }` so a
//! reader can locate the block index without scanning.
//!
//! # Concurrency model
//!
//! Finalized files are immutable; [`DataFileReader`] memory-maps them and
//! is safe to use from the single thread that owns it.  [`DataFileWriter`]
//! buffers through `BufWriter` and makes content durable with `sync_all`
//! at close.  A writer's files are invisible to readers until the file set
//! is registered in the catalog.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::block::{Block, BlockData, BlockIdx, Cell, ColType, TableId};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::fileset::{FileSet, SubFileKind};

pub(crate) const FILE_VERSION: u32 = 1;
pub(crate) const HDR_SIZE: usize = 29;
pub(crate) const FOOTER_SIZE: usize = 16;
pub(crate) const SECTION_LEN_SIZE: usize = 4;
pub(crate) const SECTION_CRC_SIZE: usize = 4;

const MAGIC_HEAD: [u8; 4] = *b"THD0";
const MAGIC_DATA: [u8; 4] = *b"TDA0";
const MAGIC_LAST: [u8; 4] = *b"TLA0";
const MAGIC_SMA: [u8; 4] = *b"TSM0";

fn magic_for(kind: SubFileKind) -> [u8; 4] {
    match kind {
        SubFileKind::Head => MAGIC_HEAD,
        SubFileKind::Data => MAGIC_DATA,
        SubFileKind::Last => MAGIC_LAST,
        SubFileKind::Sma => MAGIC_SMA,
    }
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by data-file operations.
#[derive(Debug, Error)]
pub enum DataFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Checksum mismatch on a header, footer, or section.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Internal invariant violation (bad magic, truncation, misuse).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header and footer
// ------------------------------------------------------------------------------------------------

/// Per-file header, written at offset 0 of every sub-file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileHdr {
    /// Per-kind magic bytes.
    pub(crate) magic: [u8; 4],

    /// Format version.
    pub(crate) version: u32,

    /// Owning vnode.
    pub(crate) vg_id: i32,

    /// Partition index (mirrors the file name).
    pub(crate) fid: i32,

    /// Generation stamp (mirrors the file name).
    pub(crate) commit_id: i64,

    /// Configured compression tag.  Carried for format compatibility;
    /// only the uncompressed representation is produced or consumed.
    pub(crate) cmpr_alg: u8,

    /// CRC32 of the header with this field zeroed.
    pub(crate) crc: u32,
}

impl Encode for FileHdr {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.vg_id.encode_to(buf)?;
        self.fid.encode_to(buf)?;
        self.commit_id.encode_to(buf)?;
        self.cmpr_alg.encode_to(buf)?;
        self.crc.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for FileHdr {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (vg_id, n) = i32::decode_from(&buf[off..])?;
        off += n;
        let (fid, n) = i32::decode_from(&buf[off..])?;
        off += n;
        let (commit_id, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (cmpr_alg, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                vg_id,
                fid,
                commit_id,
                cmpr_alg,
                crc,
            },
            off,
        ))
    }
}

/// Trailing footer of index-bearing files (head, del): locates the index
/// section.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdxFooter {
    /// Offset of the index section.
    pub(crate) idx_offset: u64,

    /// Total size of the index section.
    pub(crate) idx_size: u32,

    /// CRC32 of the footer with this field zeroed.
    pub(crate) crc: u32,
}

impl Encode for IdxFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.idx_offset.encode_to(buf)?;
        self.idx_size.encode_to(buf)?;
        self.crc.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IdxFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (idx_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (idx_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                idx_offset,
                idx_size,
                crc,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Shared file helpers (also used by the tombstone file)
// ------------------------------------------------------------------------------------------------

/// Encodes `hdr` with an embedded CRC (computed over the zeroed form).
pub(crate) fn encode_header(mut hdr: FileHdr) -> Result<Vec<u8>, DataFileError> {
    hdr.crc = 0;
    let zeroed = encoding::encode_to_vec(&hdr)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed);
    hdr.crc = hasher.finalize();
    Ok(encoding::encode_to_vec(&hdr)?)
}

/// Decodes and CRC-verifies the header at the front of `bytes`.
pub(crate) fn decode_header(bytes: &[u8]) -> Result<FileHdr, DataFileError> {
    if bytes.len() < HDR_SIZE {
        return Err(DataFileError::Internal("file too small for header".into()));
    }
    let (mut hdr, _) = encoding::decode_from_slice::<FileHdr>(&bytes[..HDR_SIZE])?;
    let stored = hdr.crc;
    hdr.crc = 0;
    let zeroed = encoding::encode_to_vec(&hdr)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed);
    if stored != hasher.finalize() {
        return Err(DataFileError::ChecksumMismatch);
    }
    hdr.crc = stored;
    Ok(hdr)
}

/// Encodes `footer` with an embedded CRC.
pub(crate) fn encode_footer(mut footer: IdxFooter) -> Result<Vec<u8>, DataFileError> {
    footer.crc = 0;
    let zeroed = encoding::encode_to_vec(&footer)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed);
    footer.crc = hasher.finalize();
    Ok(encoding::encode_to_vec(&footer)?)
}

/// Decodes and CRC-verifies the footer at the tail of `bytes`.
pub(crate) fn decode_footer(bytes: &[u8]) -> Result<IdxFooter, DataFileError> {
    if bytes.len() < FOOTER_SIZE {
        return Err(DataFileError::Internal("file too small for footer".into()));
    }
    let tail = &bytes[bytes.len() - FOOTER_SIZE..];
    let (mut footer, _) = encoding::decode_from_slice::<IdxFooter>(tail)?;
    let stored = footer.crc;
    footer.crc = 0;
    let zeroed = encoding::encode_to_vec(&footer)?;
    let mut hasher = Crc32::new();
    hasher.update(&zeroed);
    if stored != hasher.finalize() {
        return Err(DataFileError::ChecksumMismatch);
    }
    footer.crc = stored;
    Ok(footer)
}

/// Writes a checksummed section `[len][bytes][crc32]`, advancing `pos`.
///
/// Returns `(section_offset, total_section_size)`.
pub(crate) fn write_section(
    w: &mut BufWriter<File>,
    pos: &mut u64,
    data: &[u8],
) -> Result<(u64, u32), DataFileError> {
    let offset = *pos;
    let len = u32::try_from(data.len())
        .map_err(|_| DataFileError::Internal("section exceeds 4 GiB".into()))?;

    let mut hasher = Crc32::new();
    hasher.update(data);
    let checksum = hasher.finalize();

    w.write_all(&len.to_le_bytes())?;
    w.write_all(data)?;
    w.write_all(&checksum.to_le_bytes())?;

    let total = (SECTION_LEN_SIZE + data.len() + SECTION_CRC_SIZE) as u32;
    *pos += u64::from(total);
    Ok((offset, total))
}

/// Re-writes a raw section captured by [`read_section_raw`] verbatim.
pub(crate) fn write_section_raw(
    w: &mut BufWriter<File>,
    pos: &mut u64,
    raw: &[u8],
) -> Result<(u64, u32), DataFileError> {
    let offset = *pos;
    let total = u32::try_from(raw.len())
        .map_err(|_| DataFileError::Internal("section exceeds 4 GiB".into()))?;
    w.write_all(raw)?;
    *pos += u64::from(total);
    Ok((offset, total))
}

/// Reads the payload of the checksummed section at `(offset, size)`,
/// verifying its CRC.
pub(crate) fn read_section(mmap: &[u8], offset: u64, size: u32) -> Result<Vec<u8>, DataFileError> {
    let raw = read_section_raw(mmap, offset, size)?;
    Ok(raw[SECTION_LEN_SIZE..raw.len() - SECTION_CRC_SIZE].to_vec())
}

/// Reads a full checksummed section (length prefix and CRC included),
/// verifying the CRC first so a verbatim copy can never propagate
/// corruption.
pub(crate) fn read_section_raw(
    mmap: &[u8],
    offset: u64,
    size: u32,
) -> Result<Vec<u8>, DataFileError> {
    let start = usize::try_from(offset)
        .map_err(|_| DataFileError::Internal("section offset exceeds addressable range".into()))?;
    let size = size as usize;
    if size < SECTION_LEN_SIZE + SECTION_CRC_SIZE || start + size > mmap.len() {
        return Err(DataFileError::Internal("section out of range".into()));
    }

    let raw = &mmap[start..start + size];
    let len_bytes: [u8; SECTION_LEN_SIZE] = raw[..SECTION_LEN_SIZE]
        .try_into()
        .map_err(|_| DataFileError::Internal("short section length".into()))?;
    let content_len = u32::from_le_bytes(len_bytes) as usize;
    if SECTION_LEN_SIZE + content_len + SECTION_CRC_SIZE != size {
        return Err(DataFileError::Internal("section length mismatch".into()));
    }

    let content = &raw[SECTION_LEN_SIZE..SECTION_LEN_SIZE + content_len];
    let crc_bytes: [u8; SECTION_CRC_SIZE] = raw[SECTION_LEN_SIZE + content_len..]
        .try_into()
        .map_err(|_| DataFileError::Internal("short section checksum".into()))?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Crc32::new();
    hasher.update(content);
    if stored != hasher.finalize() {
        return Err(DataFileError::ChecksumMismatch);
    }

    Ok(raw.to_vec())
}

// ------------------------------------------------------------------------------------------------
// Column statistics
// ------------------------------------------------------------------------------------------------

/// Per-block statistics of one column, maintained for columns with the
/// statistics flag set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColSma {
    /// Column id.
    pub cid: i16,

    /// Number of non-null cells aggregated.
    pub n: u32,

    /// Sum of the column's values.
    pub sum: f64,

    /// Minimum value.
    pub min: f64,

    /// Maximum value.
    pub max: f64,
}

impl Encode for ColSma {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.cid.encode_to(buf)?;
        self.n.encode_to(buf)?;
        self.sum.encode_to(buf)?;
        self.min.encode_to(buf)?;
        self.max.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ColSma {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (cid, n) = i16::decode_from(&buf[off..])?;
        off += n;
        let (count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (sum, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (min, n) = f64::decode_from(&buf[off..])?;
        off += n;
        let (max, n) = f64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                cid,
                n: count,
                sum,
                min,
                max,
            },
            off,
        ))
    }
}

/// Computes statistics for every statistics-flagged numeric column of a
/// block.  Byte columns are skipped even when flagged.
pub fn compute_sma(bdata: &BlockData) -> Vec<ColSma> {
    let mut out = Vec::new();
    for col in bdata.cols() {
        if !col.sma_on || col.ctype == ColType::Bytes {
            continue;
        }
        let mut sma = ColSma {
            cid: col.cid,
            n: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        };
        for cell in &col.cells {
            let v = match cell {
                Cell::I64(v) => *v as f64,
                Cell::F64(v) => *v,
                _ => continue,
            };
            sma.n += 1;
            sma.sum += v;
            sma.min = sma.min.min(v);
            sma.max = sma.max.max(v);
        }
        if sma.n > 0 {
            out.push(sma);
        }
    }
    out
}

// ------------------------------------------------------------------------------------------------
// DataFileWriter
// ------------------------------------------------------------------------------------------------

/// Builds the four sub-files of one [`FileSet`].
///
/// Usage: [`write_block_data`](Self::write_block_data) /
/// [`write_block_raw`](Self::write_block_raw) append block payloads;
/// [`finish_table`](Self::finish_table) seals a table's block map into the
/// head file; [`close`](Self::close) writes the block index and footer,
/// syncs everything, and returns the finalized [`FileSet`] with recorded
/// sizes.
pub struct DataFileWriter {
    vg_id: i32,
    fset: FileSet,
    head: BufWriter<File>,
    data: BufWriter<File>,
    last: BufWriter<File>,
    sma: BufWriter<File>,
    head_pos: u64,
    data_pos: u64,
    last_pos: u64,
    sma_pos: u64,
    block_idx: Vec<BlockIdx>,
}

impl DataFileWriter {
    /// Creates the four sub-files for `fset` and writes their headers.
    ///
    /// Every sub-file must be new; a name collision means a commit-id was
    /// reused and is reported as an error rather than silently truncated.
    pub fn create(
        dir: &Path,
        vg_id: i32,
        fset: FileSet,
        cmpr_alg: u8,
    ) -> Result<Self, DataFileError> {
        let mut writers = Vec::with_capacity(4);
        for kind in SubFileKind::ALL {
            let path = fset.sub_path(dir, vg_id, kind);
            let file = File::create_new(&path)?;
            let mut w = BufWriter::new(file);
            let hdr_bytes = encode_header(FileHdr {
                magic: magic_for(kind),
                version: FILE_VERSION,
                vg_id,
                fid: fset.fid,
                commit_id: fset.sub(kind).commit_id,
                cmpr_alg,
                crc: 0,
            })?;
            w.write_all(&hdr_bytes)?;
            writers.push(w);
        }
        let mut it = writers.into_iter();
        let (head, data, last, sma) = match (it.next(), it.next(), it.next(), it.next()) {
            (Some(h), Some(d), Some(l), Some(s)) => (h, d, l, s),
            _ => return Err(DataFileError::Internal("sub-file writer missing".into())),
        };

        debug!(vg_id, fid = fset.fid, "data file set created for write");
        Ok(Self {
            vg_id,
            fset,
            head,
            data,
            last,
            sma,
            head_pos: HDR_SIZE as u64,
            data_pos: HDR_SIZE as u64,
            last_pos: HDR_SIZE as u64,
            sma_pos: HDR_SIZE as u64,
            block_idx: Vec::new(),
        })
    }

    /// The file set being built.
    pub fn file_set(&self) -> &FileSet {
        &self.fset
    }

    /// Encodes and appends one block payload, routing it to the data or
    /// last file, and writes its column statistics to the sma file.
    ///
    /// Returns the block descriptor to record in the table's block map.
    pub fn write_block_data(
        &mut self,
        bdata: &BlockData,
        is_last: bool,
    ) -> Result<Block, DataFileError> {
        let (Some(min_key), Some(max_key), Some(min_version), Some(max_version)) = (
            bdata.first_key(),
            bdata.last_key(),
            bdata.min_version(),
            bdata.max_version(),
        ) else {
            return Err(DataFileError::Internal("refusing to write empty block".into()));
        };

        let payload = encoding::encode_to_vec(bdata)?;
        let (offset, size) = if is_last {
            write_section(&mut self.last, &mut self.last_pos, &payload)?
        } else {
            write_section(&mut self.data, &mut self.data_pos, &payload)?
        };

        let sma = compute_sma(bdata);
        let (sma_offset, sma_size) = if sma.is_empty() {
            (0, 0)
        } else {
            let mut buf = Vec::new();
            encoding::encode_vec(&sma, &mut buf)?;
            write_section(&mut self.sma, &mut self.sma_pos, &buf)?
        };

        Ok(Block {
            min_key,
            max_key,
            min_version,
            max_version,
            n_row: bdata.n_row() as u32,
            last: is_last,
            offset,
            size,
            sma_offset,
            sma_size,
        })
    }

    /// Appends a block captured verbatim from another file set (merge
    /// passthrough).  Payload bytes are unchanged; only offsets rebase.
    pub fn write_block_raw(
        &mut self,
        payload: &[u8],
        sma: Option<&[u8]>,
        proto: &Block,
    ) -> Result<Block, DataFileError> {
        let (offset, size) = if proto.last {
            write_section_raw(&mut self.last, &mut self.last_pos, payload)?
        } else {
            write_section_raw(&mut self.data, &mut self.data_pos, payload)?
        };

        let (sma_offset, sma_size) = match sma {
            Some(raw) => write_section_raw(&mut self.sma, &mut self.sma_pos, raw)?,
            None => (0, 0),
        };

        Ok(Block {
            offset,
            size,
            sma_offset,
            sma_size,
            ..*proto
        })
    }

    /// Seals one table's block map into the head file and records its
    /// index entry.  Tables must be sealed in ascending `(suid, uid)`
    /// order.
    pub fn finish_table(
        &mut self,
        table: TableId,
        blocks: &[Block],
    ) -> Result<BlockIdx, DataFileError> {
        if let Some(prev) = self.block_idx.last() {
            if table <= prev.table {
                return Err(DataFileError::Internal(format!(
                    "table (suid={}, uid={}) sealed out of order",
                    table.suid, table.uid
                )));
            }
        }

        let mut buf = Vec::new();
        encoding::encode_vec(blocks, &mut buf)?;
        let (offset, size) = write_section(&mut self.head, &mut self.head_pos, &buf)?;

        let idx = BlockIdx {
            table,
            offset,
            size,
        };
        self.block_idx.push(idx);
        Ok(idx)
    }

    /// Writes the block index and head footer, flushes and syncs all four
    /// files, and returns the finalized [`FileSet`].
    pub fn close(mut self) -> Result<FileSet, DataFileError> {
        let mut buf = Vec::new();
        encoding::encode_vec(&self.block_idx, &mut buf)?;
        let (idx_offset, idx_size) = write_section(&mut self.head, &mut self.head_pos, &buf)?;

        let footer_bytes = encode_footer(IdxFooter {
            idx_offset,
            idx_size,
            crc: 0,
        })?;
        self.head.write_all(&footer_bytes)?;
        self.head_pos += FOOTER_SIZE as u64;

        for w in [&mut self.head, &mut self.data, &mut self.last, &mut self.sma] {
            w.flush()?;
            w.get_ref().sync_all()?;
        }

        let mut fset = self.fset;
        fset.head.offset = idx_offset;
        fset.head.size = self.head_pos;
        fset.data.size = self.data_pos;
        fset.last.size = self.last_pos;
        fset.sma.size = self.sma_pos;

        debug!(
            vg_id = self.vg_id,
            fid = fset.fid,
            tables = self.block_idx.len(),
            "data file set finalized"
        );
        Ok(fset)
    }
}

// ------------------------------------------------------------------------------------------------
// DataFileReader
// ------------------------------------------------------------------------------------------------

/// Memory-mapped reader over one finalized [`FileSet`].
#[derive(Debug)]
pub struct DataFileReader {
    fset: FileSet,
    head: Mmap,
    data: Mmap,
    last: Mmap,
    sma: Mmap,
}

impl DataFileReader {
    /// Opens and header-verifies all four sub-files of `fset`.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because
    /// finalized sub-files are never written again, the maps are read-only,
    /// and every section boundary is verified before slicing.
    pub fn open(dir: &Path, vg_id: i32, fset: &FileSet) -> Result<Self, DataFileError> {
        let mut maps = Vec::with_capacity(4);
        for kind in SubFileKind::ALL {
            let path = fset.sub_path(dir, vg_id, kind);
            let mmap = Self::open_verified(&path, vg_id, fset, kind)?;
            maps.push(mmap);
        }
        let mut it = maps.into_iter();
        let (head, data, last, sma) = match (it.next(), it.next(), it.next(), it.next()) {
            (Some(h), Some(d), Some(l), Some(s)) => (h, d, l, s),
            _ => return Err(DataFileError::Internal("sub-file map missing".into())),
        };

        debug!(vg_id, fid = fset.fid, "data file set opened for read");
        Ok(Self {
            fset: *fset,
            head,
            data,
            last,
            sma,
        })
    }

    fn open_verified(
        path: &PathBuf,
        vg_id: i32,
        fset: &FileSet,
        kind: SubFileKind,
    ) -> Result<Mmap, DataFileError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let hdr = decode_header(&mmap)?;
        if hdr.magic != magic_for(kind) {
            return Err(DataFileError::Internal(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        if hdr.version != FILE_VERSION {
            return Err(DataFileError::Internal(format!(
                "unsupported version {} in {}",
                hdr.version,
                path.display()
            )));
        }
        if hdr.vg_id != vg_id || hdr.fid != fset.fid || hdr.commit_id != fset.sub(kind).commit_id {
            return Err(DataFileError::Internal(format!(
                "header identity mismatch in {}",
                path.display()
            )));
        }
        Ok(mmap)
    }

    /// The file set being read.
    pub fn file_set(&self) -> &FileSet {
        &self.fset
    }

    /// Reads the [`BlockIdx`] array via the head footer.
    pub fn read_block_idx(&self) -> Result<Vec<BlockIdx>, DataFileError> {
        let footer = decode_footer(&self.head)?;
        let bytes = read_section(&self.head, footer.idx_offset, footer.idx_size)?;
        let (idx, _) = encoding::decode_vec::<BlockIdx>(&bytes)?;
        Ok(idx)
    }

    /// Reads one table's block map.
    pub fn read_block_map(&self, idx: &BlockIdx) -> Result<Vec<Block>, DataFileError> {
        let bytes = read_section(&self.head, idx.offset, idx.size)?;
        let (blocks, _) = encoding::decode_vec::<Block>(&bytes)?;
        Ok(blocks)
    }

    /// Decodes one block's payload into a [`BlockData`].
    pub fn read_block_data(&self, block: &Block) -> Result<BlockData, DataFileError> {
        let file: &[u8] = if block.last { &self.last } else { &self.data };
        let bytes = read_section(file, block.offset, block.size)?;
        let (bdata, _) = encoding::decode_from_slice::<BlockData>(&bytes)?;
        Ok(bdata)
    }

    /// Captures one block's raw payload section (and its statistics
    /// section, if present) for verbatim rewrite.  CRCs are verified.
    pub fn read_block_raw(
        &self,
        block: &Block,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), DataFileError> {
        let file: &[u8] = if block.last { &self.last } else { &self.data };
        let payload = read_section_raw(file, block.offset, block.size)?;
        let sma = if block.sma_size > 0 {
            Some(read_section_raw(&self.sma, block.sma_offset, block.sma_size)?)
        } else {
            None
        };
        Ok((payload, sma))
    }

    /// Decodes one block's column statistics, if it has any.
    pub fn read_block_sma(&self, block: &Block) -> Result<Vec<ColSma>, DataFileError> {
        if block.sma_size == 0 {
            return Ok(Vec::new());
        }
        let bytes = read_section(&self.sma, block.sma_offset, block.sma_size)?;
        let (sma, _) = encoding::decode_vec::<ColSma>(&bytes)?;
        Ok(sma)
    }
}

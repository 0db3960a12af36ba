//! # File-set registry
//!
//! The registry is the vnode's catalog of durable files: every data
//! [`FileSet`] keyed by `fid`, plus the single tombstone [`DelFile`].  It
//! holds **two** snapshots of that catalog:
//!
//! - `current` — the committed view.  Readers only ever see `current`.
//! - `next` — the in-progress view a snapshot writer mutates.  Promotion of
//!   `next` to `current` is the commit, and the only mutation `current`
//!   ever undergoes.
//!
//! ## Durability
//!
//! `commit()` serializes the new catalog into the `CURRENT` file —
//! CRC32-protected, written to a temporary path, atomically renamed, parent
//! directory fsync'ed — **before** swapping the in-memory states.  A crash
//! at any point therefore leaves either the old or the new catalog fully
//! intact, never a mixture.
//!
//! ## Crash-recovery sweep
//!
//! Data and tombstone files are named by their `commitID` stamp.  Any file
//! on disk whose name the catalog does not reference is debris from a
//! crashed or rolled-back stream; [`FsRegistry::sweep`] unlinks it.  The
//! sweep runs at vnode open, after commit (dropping the superseded
//! generation), and after rollback (dropping the in-flight generation).
//!
//! ## Thread safety
//!
//! Both catalog snapshots live behind one mutex owned by the registry
//! value; the vnode context owns the registry.  At most one snapshot
//! writer may hold the `next` state at a time, enforced by [`FsRegistry::begin`].


use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::fileset::{DelFile, FileSet, parse_file_name};

const CATALOG_FILENAME: &str = "CURRENT";
const CATALOG_TMP_SUFFIX: &str = ".tmp";
const CATALOG_MAGIC: [u8; 4] = *b"TFS0";
const CATALOG_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Catalog file is corrupted or its checksum mismatched.
    #[error("Catalog checksum mismatch")]
    ChecksumMismatch,

    /// A second snapshot writer tried to acquire the `next` state.
    #[error("a snapshot writer is already active on this vnode")]
    WriterActive,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Lookup comparator
// ------------------------------------------------------------------------------------------------

/// Comparator for ordered file-set lookups by `fid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    /// Smallest entry with `fid` strictly greater than the probe.
    Gt,

    /// Smallest entry with `fid` greater than or equal to the probe.
    Ge,

    /// The entry with exactly the probe's `fid`.
    Eq,
}

// ------------------------------------------------------------------------------------------------
// Catalog state
// ------------------------------------------------------------------------------------------------

/// One snapshot of the catalog: file sets by fid, plus the tombstone file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FsState {
    /// Data file sets, keyed and iterated by `fid`.
    file_sets: BTreeMap<i32, FileSet>,

    /// The tombstone file, if the vnode has one.
    del_file: Option<DelFile>,
}

impl FsState {
    /// Ordered lookup by `fid`.
    pub fn get_file_set(&self, fid: i32, cmp: Cmp) -> Option<FileSet> {
        match cmp {
            Cmp::Eq => self.file_sets.get(&fid).copied(),
            Cmp::Ge => self.file_sets.range(fid..).next().map(|(_, s)| *s),
            Cmp::Gt => self
                .file_sets
                .range((Bound::Excluded(fid), Bound::Unbounded))
                .next()
                .map(|(_, s)| *s),
        }
    }

    /// Inserts or replaces the file set for its `fid`.
    pub fn upsert_file_set(&mut self, fset: FileSet) {
        self.file_sets.insert(fset.fid, fset);
    }

    /// The tombstone file, if any.
    pub fn del_file(&self) -> Option<DelFile> {
        self.del_file
    }

    /// Replaces the tombstone file pointer.
    pub fn set_del_file(&mut self, del: DelFile) {
        self.del_file = Some(del);
    }

    /// All file sets in `fid` order.
    pub fn file_sets(&self) -> Vec<FileSet> {
        self.file_sets.values().copied().collect()
    }

    /// File names (not paths) this state references, for the sweep.
    fn referenced_names(&self, dir: &Path, vg_id: i32) -> Vec<std::ffi::OsString> {
        let mut names = Vec::new();
        for fset in self.file_sets.values() {
            for path in fset.sub_paths(dir, vg_id) {
                if let Some(name) = path.file_name() {
                    names.push(name.to_os_string());
                }
            }
        }
        if let Some(del) = &self.del_file {
            if let Some(name) = del.path(dir, vg_id).file_name() {
                names.push(name.to_os_string());
            }
        }
        names
    }
}

impl Encode for FsState {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let sets: Vec<FileSet> = self.file_sets.values().copied().collect();
        encoding::encode_vec(&sets, buf)?;
        self.del_file.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for FsState {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (sets, n) = encoding::decode_vec::<FileSet>(&buf[off..])?;
        off += n;
        let (del_file, n) = Option::<DelFile>::decode_from(&buf[off..])?;
        off += n;
        let mut file_sets = BTreeMap::new();
        for fset in sets {
            if file_sets.insert(fset.fid, fset).is_some() {
                return Err(EncodingError::Custom(format!(
                    "duplicate fid {} in catalog",
                    fset.fid
                )));
            }
        }
        Ok((Self {
            file_sets,
            del_file,
        }, off))
    }
}

/// Serialized form of the `CURRENT` file.
#[derive(Debug)]
struct Catalog {
    magic: [u8; 4],
    version: u32,
    vg_id: i32,
    state: FsState,
    checksum: u32,
}

impl Encode for Catalog {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.vg_id.encode_to(buf)?;
        self.state.encode_to(buf)?;
        self.checksum.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Catalog {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (vg_id, n) = i32::decode_from(&buf[off..])?;
        off += n;
        let (state, n) = FsState::decode_from(&buf[off..])?;
        off += n;
        let (checksum, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                vg_id,
                state,
                checksum,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Registry core
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    current: FsState,
    next: FsState,
    writer_active: bool,
}

/// Two-snapshot (`current` / `next`) file-set catalog with durable commit.
///
/// Owned by the vnode context; snapshot readers and writers borrow it.
#[derive(Debug)]
pub struct FsRegistry {
    /// Vnode data directory holding the catalog and every referenced file.
    dir: PathBuf,

    /// Vnode id, stamped into file names and log lines.
    vg_id: i32,

    /// Both catalog snapshots plus the single-writer flag.
    inner: Mutex<Inner>,
}

impl FsRegistry {
    /// Opens the registry, loading the `CURRENT` catalog if one exists.
    ///
    /// A fresh directory yields an empty catalog.  `next` starts as a copy
    /// of `current`.
    pub fn open(dir: impl AsRef<Path>, vg_id: i32) -> Result<Self, RegistryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let catalog_path = dir.join(CATALOG_FILENAME);
        let current = if catalog_path.exists() {
            let state = Self::read_catalog(&catalog_path, vg_id)?;
            info!(vg_id, path = ?catalog_path, "loaded file-set catalog");
            state
        } else {
            FsState::default()
        };

        Ok(Self {
            dir,
            vg_id,
            inner: Mutex::new(Inner {
                next: current.clone(),
                current,
                writer_active: false,
            }),
        })
    }

    /// Vnode id this registry serves.
    pub fn vg_id(&self) -> i32 {
        self.vg_id
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    /// Acquires the state lock, mapping a poisoned mutex to
    /// [`RegistryError::Internal`].
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RegistryError> {
        self.inner.lock().map_err(|_| {
            error!(vg_id = self.vg_id, "registry mutex poisoned");
            RegistryError::Internal("Mutex poisoned".into())
        })
    }

    fn read_catalog(path: &Path, vg_id: i32) -> Result<FsState, RegistryError> {
        let mut f = File::open(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;

        let (catalog, _) = encoding::decode_from_slice::<Catalog>(&buf)?;

        // Verify checksum: re-encode with checksum=0, CRC the result, compare.
        let verify = Catalog {
            checksum: 0,
            magic: catalog.magic,
            version: catalog.version,
            vg_id: catalog.vg_id,
            state: catalog.state.clone(),
        };
        let verify_bytes = encoding::encode_to_vec(&verify)?;
        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        if catalog.checksum != hasher.finalize() {
            return Err(RegistryError::ChecksumMismatch);
        }

        if catalog.magic != CATALOG_MAGIC {
            return Err(RegistryError::Internal("catalog magic mismatch".into()));
        }
        if catalog.version != CATALOG_VERSION {
            return Err(RegistryError::Internal("catalog version mismatch".into()));
        }
        if catalog.vg_id != vg_id {
            return Err(RegistryError::Internal(format!(
                "catalog belongs to vgId {} (expected {})",
                catalog.vg_id, vg_id
            )));
        }

        Ok(catalog.state)
    }

    /// Durably persists `state` as the `CURRENT` catalog: serialize with a
    /// zero checksum, patch the trailing CRC32, write to a temp file, sync,
    /// rename into place, fsync the directory.
    fn persist(&self, state: &FsState) -> Result<(), RegistryError> {
        let catalog = Catalog {
            magic: CATALOG_MAGIC,
            version: CATALOG_VERSION,
            vg_id: self.vg_id,
            state: state.clone(),
            checksum: 0,
        };
        let mut bytes = encoding::encode_to_vec(&catalog)?;

        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        let checksum = hasher.finalize();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        let tmp_path = self
            .dir
            .join(format!("{CATALOG_FILENAME}{CATALOG_TMP_SUFFIX}"));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }

        let final_path = self.dir.join(CATALOG_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(&self.dir)?;

        debug!(vg_id = self.vg_id, path = ?final_path, "file-set catalog persisted");
        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), RegistryError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }

    // --------------------------------------------------------------------
    // Read accessors
    // --------------------------------------------------------------------

    /// Ordered lookup in the committed state.
    pub fn current_file_set(&self, fid: i32, cmp: Cmp) -> Result<Option<FileSet>, RegistryError> {
        Ok(self.lock()?.current.get_file_set(fid, cmp))
    }

    /// Exact lookup in the in-progress state.
    pub fn next_file_set_eq(&self, fid: i32) -> Result<Option<FileSet>, RegistryError> {
        Ok(self.lock()?.next.get_file_set(fid, Cmp::Eq))
    }

    /// The committed tombstone file, if any.
    pub fn current_del_file(&self) -> Result<Option<DelFile>, RegistryError> {
        Ok(self.lock()?.current.del_file())
    }

    /// The in-progress tombstone file, if any.
    pub fn next_del_file(&self) -> Result<Option<DelFile>, RegistryError> {
        Ok(self.lock()?.next.del_file())
    }

    /// A clone of the committed state, for inspection.
    pub fn current_state(&self) -> Result<FsState, RegistryError> {
        Ok(self.lock()?.current.clone())
    }

    // --------------------------------------------------------------------
    // Mutations on `next`
    // --------------------------------------------------------------------

    /// Inserts or replaces a file set in the in-progress state.
    pub fn next_upsert_file_set(&self, fset: FileSet) -> Result<(), RegistryError> {
        self.lock()?.next.upsert_file_set(fset);
        Ok(())
    }

    /// Replaces the tombstone file in the in-progress state.
    pub fn next_upsert_del_file(&self, del: DelFile) -> Result<(), RegistryError> {
        self.lock()?.next.set_del_file(del);
        Ok(())
    }

    // --------------------------------------------------------------------
    // Transaction boundary
    // --------------------------------------------------------------------

    /// Claims exclusive write access to the `next` state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::WriterActive`] if another snapshot writer already
    /// holds it.
    pub fn begin(&self) -> Result<(), RegistryError> {
        let mut inner = self.lock()?;
        if inner.writer_active {
            return Err(RegistryError::WriterActive);
        }
        inner.writer_active = true;
        Ok(())
    }

    /// Promotes `next` to `current`.
    ///
    /// The new catalog is durably persisted **before** the in-memory swap;
    /// if persistence fails, `current` is untouched and the in-flight files
    /// remain sweepable debris.  After the swap, files referenced only by
    /// the superseded generation are unlinked.
    pub fn commit(&self) -> Result<(), RegistryError> {
        let next = {
            let inner = self.lock()?;
            inner.next.clone()
        };

        self.persist(&next)?;

        {
            let mut inner = self.lock()?;
            inner.current = next;
            inner.writer_active = false;
        }

        info!(vg_id = self.vg_id, "file-set catalog committed");
        self.sweep()
    }

    /// Discards the in-progress state, resetting `next` to a copy of
    /// `current`, and unlinks any files the discarded generation produced.
    pub fn rollback(&self) -> Result<(), RegistryError> {
        {
            let mut inner = self.lock()?;
            inner.next = inner.current.clone();
            inner.writer_active = false;
        }

        info!(vg_id = self.vg_id, "file-set catalog rolled back");
        self.sweep()
    }

    // --------------------------------------------------------------------
    // Crash-recovery sweep
    // --------------------------------------------------------------------

    /// Unlinks every file in the vnode directory that matches this vnode's
    /// naming scheme but is not referenced by the committed catalog.
    ///
    /// Must not run while a snapshot writer is active — its in-flight files
    /// are intentionally unreferenced until commit.
    pub fn sweep(&self) -> Result<(), RegistryError> {
        let referenced = {
            let inner = self.lock()?;
            if inner.writer_active {
                return Err(RegistryError::Internal(
                    "sweep attempted while a snapshot writer is active".into(),
                ));
            }
            inner.current.referenced_names(&self.dir, self.vg_id)
        };

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name_str) = name.to_str() else {
                continue;
            };
            if parse_file_name(name_str, self.vg_id).is_none() {
                continue;
            }
            if referenced.iter().any(|r| r == &name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(vg_id = self.vg_id, file = name_str, "swept debris file"),
                Err(e) => warn!(vg_id = self.vg_id, file = name_str, error = %e, "failed to sweep debris file"),
            }
        }
        Ok(())
    }
}

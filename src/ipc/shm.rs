//! Named shared memory segments backed by a mapped file.
//!
//! On Linux the file lives in `/dev/shm` so the mapping never touches disk;
//! elsewhere it falls back to the temp directory. Any process that opens the
//! same name maps the same pages.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::RingBufferError;

const SEGMENT_PREFIX: &str = "vrrc_";

/// Directory holding segment files
pub fn segment_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Path for a (sanitized) segment name
pub fn segment_path(name: &str) -> PathBuf {
    segment_dir().join(format!("{}{}", SEGMENT_PREFIX, name))
}

/// Remove a segment by name. Missing segments are not an error.
pub fn remove_segment(name: &str) -> Result<bool, RingBufferError> {
    match fs::remove_file(segment_path(name)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub struct SharedSegment {
    map: MmapMut,
    base: *mut u8,
    path: PathBuf,
    name: String,
    owner: bool,
}

// SAFETY: `base` points into `map`, which lives as long as the segment and is
// never remapped. All cross-thread access to the bytes goes through atomics
// or slot ownership enforced by the ring buffer.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a zero-filled segment of `len` bytes, replacing any stale one.
    /// The creating handle removes the file when dropped.
    pub fn create(name: &str, len: usize) -> Result<Self, RingBufferError> {
        let path = segment_path(name);
        if remove_segment(name)? {
            log::info!("[SHM] Removed stale segment {}", path.display());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => RingBufferError::AlreadyExists(name.to_string()),
                _ => RingBufferError::Io(e),
            })?;
        file.set_len(len as u64)?;

        let mut segment = Self::map(file, path, name, true)?;
        segment.base = segment.map.as_mut_ptr();
        log::info!(
            "[SHM] Created segment {} ({} bytes)",
            segment.path.display(),
            len
        );
        Ok(segment)
    }

    /// Attach to a segment someone else created
    pub fn open(name: &str) -> Result<Self, RingBufferError> {
        let path = segment_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => RingBufferError::NotFound(name.to_string()),
                _ => RingBufferError::Io(e),
            })?;
        let mut segment = Self::map(file, path, name, false)?;
        segment.base = segment.map.as_mut_ptr();
        log::info!("[SHM] Attached to segment {}", segment.path.display());
        Ok(segment)
    }

    fn map(file: File, path: PathBuf, name: &str, owner: bool) -> Result<Self, RingBufferError> {
        // SAFETY: the file is only resized by its creator before anyone maps
        // it; concurrent writers coordinate through the ring buffer protocol.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            map,
            base: std::ptr::null_mut(),
            path,
            name: name.to_string(),
            owner,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::info!("[SHM] Removed segment {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "[SHM] Failed to remove segment {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

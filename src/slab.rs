//! Shared counter store
//!
//! A fixed-length array of `u32` counters living in a file-backed shared
//! mapping. Every process that opens the same file sees the same counters.
//! The only operations on the mapped memory are atomic fetch-add, atomic
//! swap-with-zero and atomic load, so concurrent writers in different
//! processes never lose an increment.

use crate::error::{AppError, AppResult};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Size in bytes of one counter slot in the backing file
pub const SLOT_SIZE: usize = std::mem::size_of::<u32>();

/// Default number of slots when none is configured
pub const DEFAULT_SLOT_COUNT: usize = 8;

/// Fixed-length array of shared `u32` counters
///
/// The backing file holds `slot_count` contiguous native-endian `u32`
/// values. A new file starts zeroed; an existing one is mapped as-is, so
/// counts survive a process restart until they are drained.
pub struct CounterSlab {
    path: PathBuf,
    slot_count: usize,
    counters: NonNull<AtomicU32>,
    mmap: MmapMut,
    _file: File,
}

// SAFETY: `counters` points into `mmap`, which is owned by the slab and
// lives exactly as long as it. All access through the pointer is via
// `AtomicU32`, which is `Sync`.
unsafe impl Send for CounterSlab {}
unsafe impl Sync for CounterSlab {}

impl CounterSlab {
    /// Open (creating if needed) the counter store at `path`
    ///
    /// # Errors
    ///
    /// Fails if `slot_count` is zero or too large to map, if the file cannot
    /// be created, opened or grown, or if the mapping fails. All of these are
    /// fatal for the metrics subsystem.
    pub fn open<P: AsRef<Path>>(path: P, slot_count: usize) -> AppResult<Self> {
        if slot_count == 0 {
            return Err(AppError::InvalidSlotCount);
        }

        let required_bytes = slot_count
            .checked_mul(SLOT_SIZE)
            .filter(|bytes| isize::try_from(*bytes).is_ok())
            .ok_or(AppError::SlotCountTooLarge { slot_count })?;
        let required = required_bytes as u64;

        let path = path.as_ref();
        let path_display = path.display().to_string();
        let open_err = |source| AppError::CounterStoreOpen {
            path: path_display.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(open_err)?;

        let existing = file.metadata().map_err(open_err)?.len();

        // The store only ever grows: `allocate` zero-extends to at least
        // `required` bytes and never truncates.
        if existing < required {
            file.allocate(required).map_err(open_err)?;
        }

        if existing == 0 {
            tracing::info!(
                path = %path_display,
                slot_count,
                "Created zeroed counter store"
            );
        } else if existing < required {
            tracing::warn!(
                path = %path_display,
                existing_bytes = existing,
                required_bytes = required,
                "Counter store was shorter than slot count, extended with zeroed slots"
            );
        } else {
            if existing > required {
                tracing::warn!(
                    path = %path_display,
                    existing_bytes = existing,
                    required_bytes = required,
                    "Counter store is larger than slot count, trailing slots are ignored"
                );
            }
            tracing::debug!(path = %path_display, slot_count, "Mapped existing counter store");
        }

        let actual = file.metadata().map_err(open_err)?.len();
        if actual < required {
            return Err(open_err(std::io::Error::other(format!(
                "store is {} bytes after sizing, {} required",
                actual, required
            ))));
        }

        // SAFETY: the file is opened read-write, was checked above to hold at
        // least `required` bytes, and no opener ever shrinks it. Other
        // processes may write the same pages concurrently, so the region is
        // only ever accessed through atomics below.
        let mut mmap = unsafe { MmapOptions::new().len(required_bytes).map_mut(&file) }
            .map_err(|source| AppError::CounterStoreMap {
                path: path_display.clone(),
                source,
            })?;

        // Mappings are page-aligned, which satisfies AtomicU32's alignment.
        let counters = NonNull::new(mmap.as_mut_ptr().cast::<AtomicU32>()).ok_or_else(|| {
            AppError::CounterStoreMap {
                path: path_display.clone(),
                source: std::io::Error::other("mapping returned a null pointer"),
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            slot_count,
            counters,
            mmap,
            _file: file,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slots in the store
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn slots(&self) -> &[AtomicU32] {
        // SAFETY: `counters` points at `slot_count` u32-sized, aligned slots
        // inside `self.mmap`, which outlives the returned borrow. AtomicU32
        // has the same in-memory representation as u32.
        unsafe { std::slice::from_raw_parts(self.counters.as_ptr(), self.slot_count) }
    }

    /// Add one to the counter at `slot`
    ///
    /// Atomic with respect to every other increment and drain in every
    /// process that has this store open. Wraps on `u32` overflow.
    ///
    /// # Errors
    ///
    /// Returns `SlotOutOfRange` if `slot >= slot_count`; memory is not touched.
    pub fn increment(&self, slot: usize) -> AppResult<()> {
        let counter = self.slots().get(slot).ok_or(AppError::SlotOutOfRange {
            slot,
            slot_count: self.slot_count,
        })?;
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read and zero every counter, returning the values read
    ///
    /// Each slot is swapped with zero in one atomic step, so an increment
    /// racing with the drain is either in this snapshot or left for the
    /// next one.
    pub fn drain_and_reset(&self) -> Vec<u32> {
        self.slots()
            .iter()
            .map(|counter| counter.swap(0, Ordering::AcqRel))
            .collect()
    }

    /// Read every counter without resetting it
    pub fn peek(&self) -> Vec<u32> {
        self.slots()
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect()
    }

    /// Ask the kernel to write the mapped counters back to the file
    pub fn flush(&self) -> AppResult<()> {
        self.mmap
            .flush()
            .map_err(|source| AppError::CounterStoreMap {
                path: self.path.display().to_string(),
                source,
            })
    }
}

impl std::fmt::Debug for CounterSlab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterSlab")
            .field("path", &self.path)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

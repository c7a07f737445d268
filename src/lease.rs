//! Export lease
//!
//! Exactly one process at a time may drain a given counter store. The lease
//! is an exclusive, non-blocking advisory lock on the store file itself, so
//! every path that reaches the same file (symlinks, hard links, relative
//! spellings) contends for the same lease. The kernel drops the lock when
//! the holder exits or closes the file, so a surviving process picks the
//! lease up on its next attempt.
//!
//! Each lease opens its own handle on the store. Two leases in one process
//! therefore exclude each other just like leases in different processes.

use crate::error::{AppError, AppResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive right to drain one counter store
#[derive(Debug)]
pub struct ExportLease {
    path: PathBuf,
    file: File,
    held: bool,
}

impl ExportLease {
    /// Open a handle on the store at `store_path` without locking it
    ///
    /// The store must already exist; it is created by `CounterSlab::open`.
    pub fn for_store<P: AsRef<Path>>(store_path: P) -> AppResult<Self> {
        let path = store_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| AppError::LeaseFile {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            held: false,
        })
    }

    /// Path the lease was opened through
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lease
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Try to take the lease without blocking
    ///
    /// Returns `Ok(true)` if the lease is (now) held, `Ok(false)` if another
    /// holder has it.
    pub fn try_acquire(&mut self) -> AppResult<bool> {
        if self.held {
            return Ok(true);
        }

        match self.file.try_lock_exclusive() {
            Ok(()) => {
                self.held = true;
                tracing::info!(path = %self.path.display(), "Acquired export lease");
                Ok(true)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(false)
            }
            Err(source) => Err(AppError::LeaseFile {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }

    /// Give the lease up so another process can take it
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to release export lease; it is dropped when the file closes"
            );
        }
        self.held = false;
        tracing::info!(path = %self.path.display(), "Released export lease");
    }
}

impl Drop for ExportLease {
    fn drop(&mut self) {
        self.release();
    }
}

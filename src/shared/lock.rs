//! Cross-process mutual exclusion for data living in a shared region.
//!
//! Processes serialize on an exclusive `flock` over a lock file created along
//! with the mapping. `flock` excludes open file descriptions, not threads, so
//! threads of one process also go through a mutex around the descriptor.
//! A forked child inherits the parent's description and must call
//! [`ProcessLock::reopen`] before its first acquisition. The kernel drops the
//! lock of a holder that dies.

use std::fs::{File, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::core::errors::{ForkscopeError, Result};
use crate::shared::region::SharedRegion;

pub struct ProcessLock<T> {
    region: SharedRegion<T>,
    path: PathBuf,
    owner_pid: u32,
    file: Mutex<File>,
}

// SAFETY: access to the region is serialized by `file`.
unsafe impl<T: Send> Send for ProcessLock<T> {}
unsafe impl<T: Send> Sync for ProcessLock<T> {}

impl<T> ProcessLock<T> {
    /// Map `value` into shared memory and create the lock file guarding it.
    ///
    /// The creating process removes the lock file when the lock is dropped.
    pub fn create(value: T) -> Result<Self> {
        let region = SharedRegion::create(value)?;
        let (file, path) = tempfile::Builder::new()
            .prefix("forkscope-registry-")
            .suffix(".lock")
            .tempfile()
            .map_err(|e| ForkscopeError::io("create registry lock file", e))?
            .keep()
            .map_err(|e| ForkscopeError::io("keep registry lock file", e.error))?;
        debug!("Registry lock file at {}", path.display());

        Ok(Self {
            region,
            path,
            owner_pid: std::process::id(),
            file: Mutex::new(file),
        })
    }

    /// Block until this thread holds the lock.
    ///
    /// Released when the returned guard goes out of scope.
    pub fn acquire(&self) -> Result<ProcessLockGuard<'_, T>> {
        let file = self
            .file
            .lock()
            .map_err(|_| ForkscopeError::internal("registry lock mutex poisoned"))?;
        FileExt::lock_exclusive(&*file)
            .map_err(|e| ForkscopeError::io(format!("lock {}", self.path.display()), e))?;
        Ok(ProcessLockGuard { lock: self, file })
    }

    /// Give this process its own open file description of the lock file.
    ///
    /// Required in a forked child: the inherited description is shared with
    /// the parent, so a lock taken through it would not exclude the parent.
    pub fn reopen(&self) -> Result<()> {
        let fresh = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| ForkscopeError::io(format!("reopen {}", self.path.display()), e))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| ForkscopeError::internal("registry lock mutex poisoned"))?;
        *file = fresh;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Drop for ProcessLock<T> {
    fn drop(&mut self) {
        if std::process::id() != self.owner_pid {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Removing {} failed: {}", self.path.display(), e);
        }
    }
}

pub struct ProcessLockGuard<'a, T> {
    lock: &'a ProcessLock<T>,
    file: MutexGuard<'a, File>,
}

impl<T> Deref for ProcessLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &*self.lock.region.as_mut_ptr() }
    }
}

impl<T> DerefMut for ProcessLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.lock.region.as_mut_ptr() }
    }
}

impl<T> Drop for ProcessLockGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file) {
            warn!("Unlocking {} failed: {}", self.lock.path.display(), e);
        }
    }
}

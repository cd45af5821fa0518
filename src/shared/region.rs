//! Anonymous shared memory that survives `fork()`.
//!
//! A `SharedRegion<T>` maps one `T` into a `MAP_SHARED | MAP_ANONYMOUS`
//! page range. Every process forked after the mapping was created sees the
//! same physical memory, so atomics and plain fields inside `T` are visible
//! across process boundaries.

use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use tracing::debug;

use crate::core::errors::{ForkscopeError, Result};

pub struct SharedRegion<T> {
    ptr: NonNull<T>,
    len: NonZeroUsize,
}

// SAFETY: the mapping is plain memory; all synchronization is the job of `T`.
unsafe impl<T: Sync> Send for SharedRegion<T> {}
unsafe impl<T: Sync> Sync for SharedRegion<T> {}

impl<T> SharedRegion<T> {
    /// Map a fresh region and move `value` into it.
    ///
    /// `T` is never dropped in place: it must not own heap memory or other
    /// process-local resources.
    pub fn create(value: T) -> Result<Self> {
        let len = NonZeroUsize::new(std::mem::size_of::<T>().max(1))
            .ok_or_else(|| ForkscopeError::internal("shared region has zero size"))?;

        // SAFETY: we request a new anonymous mapping with no fixed address, so
        // no existing memory is affected.
        let raw = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(|e| ForkscopeError::os("mmap shared registry", e))?;

        let ptr = raw.cast::<T>();
        // SAFETY: the mapping is page aligned, at least size_of::<T>() bytes
        // long and not yet shared with any other process.
        unsafe { ptr.as_ptr().write(value) };

        debug!("Mapped {} byte shared region at {:p}", len, ptr.as_ptr());
        Ok(Self { ptr, len })
    }

    /// Raw pointer to the shared value; callers serialize access themselves
    pub(crate) fn as_mut_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> std::ops::Deref for SharedRegion<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: initialized in `create`, unmapped only in `drop`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: this process owns its view of the mapping; other processes
        // keep theirs.
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.len.get()) } {
            debug!("munmap of shared region failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_region_holds_initial_value() {
        let region = SharedRegion::create(AtomicU64::new(7)).unwrap();
        assert_eq!(region.load(Ordering::SeqCst), 7);
        region.fetch_add(3, Ordering::SeqCst);
        assert_eq!(region.load(Ordering::SeqCst), 10);
    }
}

use std::cell::Cell;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use bytemuck::Pod;

#[repr(align(64))]
#[derive(Clone, Copy)]
struct CacheLine([u8; 64]);

/// Bump allocator over a fixed, 64-byte aligned buffer.
///
/// Blocks are handed out from `&self`, so several can be alive at once.
/// There is no per-block free: `free_all` rewinds the cursor, and since it
/// takes `&mut self` no block can outlive it.
pub struct Arena {
    data: NonNull<CacheLine>,
    lines: usize,
    total_bytes: usize,
    idx: Cell<usize>,
}

// SAFETY: the arena exclusively owns its buffer. It stays `!Sync` through
// the `Cell` cursor, so only one thread at a time can allocate from it.
unsafe impl Send for Arena {}

impl Arena {
    /// Create an arena with exactly `bytes` allocatable bytes, zeroed.
    pub fn new(bytes: usize) -> Self {
        let lines = bytes.div_ceil(size_of::<CacheLine>());
        let buf = vec![CacheLine([0; 64]); lines].into_boxed_slice();
        Arena {
            data: NonNull::from(Box::leak(buf)).cast::<CacheLine>(),
            lines,
            total_bytes: bytes,
            idx: Cell::new(0),
        }
    }

    /// Allocate space for `count` values of `T`.
    ///
    /// The contents are whatever the previous user left behind. Returns
    /// `None` when the remaining capacity is too small.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T: Pod>(&self, count: usize) -> Option<&mut [T]> {
        assert!(align_of::<T>() <= align_of::<CacheLine>());
        let start = self.idx.get().next_multiple_of(align_of::<T>());
        let end = count.checked_mul(size_of::<T>())?.checked_add(start)?;
        if end > self.total_bytes {
            return None;
        }
        self.idx.set(end);
        // SAFETY: `start..end` is in bounds and aligned for `T` because the
        // buffer itself is 64-byte aligned. No block handed out since the
        // last reset overlaps it, and every bit pattern is a valid `T`.
        unsafe {
            let ptr = self.data.as_ptr().cast::<u8>().add(start).cast::<T>();
            Some(std::slice::from_raw_parts_mut(ptr, count))
        }
    }

    /// Release every allocation at once. Contents are left untouched.
    pub fn free_all(&mut self) {
        *self.idx.get_mut() = 0;
    }

    /// Zero the whole buffer, for deterministic test setup.
    pub fn zero_all(&mut self) {
        // SAFETY: `data` points to `lines` owned cache lines, and `&mut self`
        // guarantees no outstanding blocks.
        unsafe { std::ptr::write_bytes(self.data.as_ptr(), 0, self.lines) };
    }

    /// The number of bytes the arena can hand out in total.
    pub fn max_bytes(&self) -> usize {
        self.total_bytes
    }

    /// The number of bytes still available; equals `max_bytes` after a reset.
    pub fn free_bytes(&self) -> usize {
        self.total_bytes - self.idx.get()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `data` and `lines` come from the boxed slice leaked in `new`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.data.as_ptr(),
                self.lines,
            )));
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("max_bytes", &self.max_bytes())
            .field("free_bytes", &self.free_bytes())
            .finish()
    }
}

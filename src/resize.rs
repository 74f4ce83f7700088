//! Resizing live allocations.
//!
//! ```text
//!   resize(p, n)
//!     │
//!     ├─ mapped block ── capacity >= n ──────────────────────▶ p
//!     │                └─ otherwise ──────────────────────────▶ move
//!     │
//!     └─ region chunk ── n >= mmap threshold ────────────────▶ move
//!                      ├─ n <= chunk size ── shrink, free tail ─▶ p
//!                      ├─ free successor big enough ── absorb ──▶ p
//!                      ├─ ends at, or next to, wilderness ─ grow ▶ p
//!                      └─ otherwise ──────────────────────────▶ move
//! ```
//!
//! A move allocates through the normal path, copies the bytes the caller
//! had, and releases the old block.

use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::align;
use crate::arena::{Allocation, Arena};
use crate::error::{HeapError, Result};

impl Arena {
  /// Resizes the allocation at `ptr` to `size` bytes, in place when
  /// possible. A null `ptr` is the same as [`Arena::allocate`].
  ///
  /// The first `min(old size, size)` bytes are preserved; anything past
  /// the old size is unspecified. When the block has to move, the returned
  /// pointer differs from `ptr` and `ptr` is released.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation of this arena. After a move the
  /// old pointer must not be used.
  ///
  /// # Errors
  ///
  /// - `HeapError::UnknownPointer` if `ptr` is not live in this arena.
  /// - Any allocation error when the block has to move; `ptr` is then left
  ///   untouched and still valid.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let Some(ptr) = NonNull::new(ptr) else {
      return self.allocate(size);
    };

    let address = ptr.as_ptr().addr();
    let Some(old_size) = self.auditor.size_of(address) else {
      warn!("resize of unknown pointer {ptr:p}");
      return Err(HeapError::UnknownPointer { address });
    };

    let in_place = match self.allocations.get(&address) {
      Some(Allocation::Mapped(block)) => size <= block.capacity(),
      Some(Allocation::Region { offset }) => {
        let offset = *offset;
        size < self.mmap_threshold() && self.resize_in_region(offset, size)
      }
      None => return Err(HeapError::UnknownPointer { address }),
    };

    if in_place {
      self.auditor.register(address, size);
      trace!("resize({ptr:p}, {size}) in place");
      return Ok(ptr);
    }

    unsafe { self.relocate(ptr, old_size, size) }
  }

  /// Shrinks or grows the used chunk at `offset` without moving it.
  /// Returns `false` when the chunk cannot reach `size` where it is.
  fn resize_in_region(
    &mut self,
    offset: usize,
    size: usize,
  ) -> bool {
    let target = align!(size.max(1));
    let current = self.chunks.size_of(offset);

    if target <= current {
      self.chunks.shrink_in_place(offset, target);
      return true;
    }

    if self.chunks.grow_in_place(offset, target) {
      return true;
    }

    let Some(deficit) = self.chunks.growth_deficit(offset, target) else {
      return false;
    };

    match self.region.commit(deficit) {
      Ok(granted) => {
        self.chunks.extend(granted);
        self.chunks.grow_in_place(offset, target)
      }
      Err(err) => {
        debug!("cannot grow chunk at offset {offset:#x} in place: {err}");
        false
      }
    }
  }

  /// Moves the allocation at `old` into a fresh `new_size` byte block.
  ///
  /// # Safety
  ///
  /// `old` must be a live allocation of this arena holding at least
  /// `old_size` bytes.
  unsafe fn relocate(
    &mut self,
    old: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    let new = self.place(new_size)?;

    // Distinct live allocations never overlap.
    unsafe { ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(new_size)) };

    let old_address = old.as_ptr().addr();
    self.auditor.deregister(old_address);
    unsafe { self.discard(old_address) };

    self.auditor.register(new.as_ptr().addr(), new_size);
    debug!("moved {old_size} byte block {old:p} to {new:p} ({new_size} bytes)");

    Ok(new)
  }
}

//! Large blocks that bypass the growable region, one OS mapping each.

use std::io;
use std::ptr::NonNull;

use log::debug;

use crate::align::checked_align_to;
use crate::error::{HeapError, Result};
use crate::os;

/// A block backed by its own mapping. It is never split or merged; it lives
/// until it is unmapped as a whole.
#[derive(Debug)]
pub(crate) struct MappedBlock {
  ptr: NonNull<u8>,
  capacity: usize,
}

impl MappedBlock {
  /// Maps a page aligned block of at least `size` bytes.
  pub fn map(
    size: usize,
    page_size: usize,
  ) -> Result<Self> {
    let capacity =
      checked_align_to(size.max(1), page_size).ok_or(HeapError::SizeOverflow { size })?;

    let ptr = os::map(capacity).map_err(|source| HeapError::Map {
      size: capacity,
      source,
    })?;

    debug!("mapped {capacity} byte block at {ptr:p} for a {size} byte request");

    Ok(Self { ptr, capacity })
  }

  /// Wraps a block that did not come from [`MappedBlock::map`].
  #[cfg(test)]
  pub fn from_raw_parts(
    ptr: NonNull<u8>,
    capacity: usize,
  ) -> Self {
    Self { ptr, capacity }
  }

  pub fn as_ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  /// Usable bytes: the request rounded up to whole pages.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// # Safety
  ///
  /// No pointer into the block may be used afterwards.
  pub unsafe fn unmap(self) -> io::Result<()> {
    debug!("unmapping {} byte block at {:p}", self.capacity, self.ptr);
    unsafe { os::unmap(self.ptr, self.capacity) }
  }
}

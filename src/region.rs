//! The growable region: one reservation of address space, committed a page
//! at a time from its start.
//!
//! ```text
//!   base                     base + committed              base + reserved
//!   ┌──────────────────────────┬──────────────────────────────────┐
//!   │   committed (read/write) │       reserved (no access)       │
//!   └──────────────────────────┴──────────────────────────────────┘
//!                              ──▶ grows by whole pages
//! ```
//!
//! Growth never moves the base, so chunk offsets and the pointers handed
//! out for them stay valid for the life of the region.

use std::io;
use std::ptr::NonNull;

use log::debug;

use crate::align::checked_align_to;
use crate::error::{HeapError, Result};
use crate::os;

#[derive(Debug)]
pub(crate) struct Region {
  base: NonNull<u8>,
  reserved: usize,
  committed: usize,
  page_size: usize,
}

impl Region {
  /// Reserves `reserved` bytes and commits the first `initial` of them.
  pub fn reserve(
    reserved: usize,
    initial: usize,
    page_size: usize,
  ) -> Result<Self> {
    let base = os::reserve(reserved).map_err(|source| HeapError::Reserve {
      size: reserved,
      source,
    })?;

    let mut region = Self {
      base,
      reserved,
      committed: 0,
      page_size,
    };

    if let Err(err) = region.commit(initial) {
      unsafe { region.unmap() }.ok();
      return Err(err);
    }

    debug!("reserved {reserved} bytes at {base:p}, {initial} committed");

    Ok(region)
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn committed(&self) -> usize {
    self.committed
  }

  pub fn reserved(&self) -> usize {
    self.reserved
  }

  pub fn is_mapped(&self) -> bool {
    self.reserved != 0
  }

  /// Commits at least `bytes` more, rounded up to whole pages, directly
  /// after the committed end. Returns how many bytes were added.
  pub fn commit(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let bytes = checked_align_to(bytes, self.page_size)
      .ok_or(HeapError::SizeOverflow { size: bytes })?;
    let available = self.reserved - self.committed;

    if bytes > available {
      return Err(HeapError::RegionExhausted {
        requested: bytes,
        available,
      });
    }

    // The new pages sit inside our own reservation, past every live chunk.
    let start = unsafe { self.base.add(self.committed) };
    unsafe { os::commit(start, bytes) }.map_err(|source| HeapError::Commit {
      size: bytes,
      source,
    })?;

    self.committed += bytes;
    debug!(
      "region at {:p} grew by {bytes} bytes to {}",
      self.base, self.committed
    );

    Ok(bytes)
  }

  /// Whether `address` falls anywhere inside the reservation.
  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    let base = self.base.as_ptr().addr();
    address >= base && address - base < self.reserved
  }

  /// Translates a chunk offset into the pointer handed to callers.
  pub fn pointer(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset < self.committed);
    // In bounds of the committed range, which the region owns.
    unsafe { self.base.add(offset) }
  }

  /// Inverse of [`Region::pointer`].
  pub fn offset(
    &self,
    address: usize,
  ) -> Option<usize> {
    let offset = address.checked_sub(self.base.as_ptr().addr())?;
    (offset < self.committed).then_some(offset)
  }

  /// Unmaps the whole reservation. Calling it again is a no-op.
  ///
  /// # Safety
  ///
  /// No pointer into the region may be used afterwards.
  pub unsafe fn unmap(&mut self) -> io::Result<()> {
    if !self.is_mapped() {
      return Ok(());
    }

    let len = self.reserved;
    self.reserved = 0;
    self.committed = 0;

    debug!("unmapping region at {:p} ({len} bytes)", self.base);
    unsafe { os::unmap(self.base, len) }
  }
}

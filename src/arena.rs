use std::collections::BTreeMap;
use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::chunk::{ChunkMap, chunk_size};
use crate::config::ArenaConfig;
use crate::error::{HeapError, Result};
use crate::leak::{Leak, LeakAuditor};
use crate::mapped::MappedBlock;
use crate::region::Region;
use crate::stats::ArenaStats;

/// Where a live allocation's memory comes from.
#[derive(Debug)]
pub(crate) enum Allocation {
  /// A used chunk of the growable region.
  Region { offset: usize },
  /// A dedicated mapping, outside the region.
  Mapped(MappedBlock),
}

/// An independent allocator instance: one growable region plus any number
/// of dedicated mappings for large requests.
///
/// Not `Sync`. Callers that share one arena across threads must serialize
/// access themselves; separate arenas share nothing.
pub struct Arena {
  pub(crate) config: ArenaConfig,
  pub(crate) region: Region,
  pub(crate) chunks: ChunkMap,
  pub(crate) allocations: BTreeMap<usize, Allocation>,
  pub(crate) auditor: LeakAuditor,
}

// SAFETY: every mapping is owned by exactly one arena and only reached
// through `&mut self`.
unsafe impl Send for Arena {}

impl Arena {
  /// Creates an arena with the default configuration.
  ///
  /// # Errors
  ///
  /// - `HeapError::Reserve` / `HeapError::Commit` if the OS refuses the
  ///   initial region.
  pub fn create() -> Result<Self> {
    Self::with_config(ArenaConfig::default())
  }

  /// Creates an arena with `config`, after validating it.
  pub fn with_config(config: ArenaConfig) -> Result<Self> {
    config.validate()?;

    let region = Region::reserve(
      config.reserve_bytes,
      config.initial_bytes(),
      config.page_size,
    )?;

    let mut chunks = ChunkMap::new();
    chunks.extend(region.committed());

    Ok(Self {
      config,
      region,
      chunks,
      allocations: BTreeMap::new(),
      auditor: LeakAuditor::new(),
    })
  }

  pub fn config(&self) -> &ArenaConfig {
    &self.config
  }

  pub fn page_size(&self) -> usize {
    self.config.page_size
  }

  /// Smallest request, in bytes, that bypasses the growable region.
  pub fn mmap_threshold(&self) -> usize {
    self.config.mmap_threshold()
  }

  /// Allocates at least `size` bytes, word aligned.
  ///
  /// Requests below [`Arena::mmap_threshold`] come out of the growable
  /// region; larger ones get a dedicated mapping. A zero-size request still
  /// returns a distinct pointer.
  ///
  /// # Errors
  ///
  /// Fails when the OS refuses to map or commit more memory. A region
  /// request that no longer fits the reservation is mapped on its own
  /// instead. The arena is left unchanged on failure.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let ptr = self.place(size)?;
    self.auditor.register(ptr.as_ptr().addr(), size);

    trace!("allocate({size}) = {ptr:p}");

    Ok(ptr)
  }

  /// Like [`Arena::allocate`], with the first `size` bytes zeroed.
  pub fn allocate_zeroed(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let ptr = self.allocate(size)?;

    // Fresh pages are already zero, recycled chunks are not.
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };

    Ok(ptr)
  }

  /// Hands `ptr` back to the arena. A null pointer is ignored.
  ///
  /// Region chunks are coalesced with free neighbours right away; dedicated
  /// mappings are unmapped.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live allocation of this arena, and must not be
  /// used after this call.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };

    let address = ptr.as_ptr().addr();
    if self.auditor.deregister(address).is_none() {
      warn!("release of unknown pointer {ptr:p} ignored");
      return;
    }

    trace!("release({ptr:p})");
    unsafe { self.discard(address) };
  }

  /// Usable bytes behind a live allocation: the chunk size for region
  /// memory, the page rounded mapping size otherwise.
  pub fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    match self.allocations.get(&ptr.as_ptr().addr())? {
      Allocation::Region { offset } => Some(self.chunks.size_of(*offset)),
      Allocation::Mapped(block) => Some(block.capacity()),
    }
  }

  /// Whether `ptr` points into the growable region's reservation.
  pub fn region_contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.region.contains(ptr.addr())
  }

  /// Every allocation not yet released, lowest address first. Empty when
  /// nothing is outstanding.
  pub fn check_leaks(&self) -> Vec<Leak> {
    self.auditor.leaks()
  }

  /// Like [`Arena::check_leaks`], also passing each leak to `reporter`.
  pub fn report_leaks<F>(
    &self,
    reporter: F,
  ) -> Vec<Leak>
  where
    F: FnMut(&Leak),
  {
    self.auditor.report(reporter)
  }

  pub fn stats(&self) -> ArenaStats {
    let (mapped_blocks, mapped_bytes) = self
      .allocations
      .values()
      .filter_map(|allocation| match allocation {
        Allocation::Mapped(block) => Some(block.capacity()),
        Allocation::Region { .. } => None,
      })
      .fold((0, 0), |(count, bytes), capacity| (count + 1, bytes + capacity));

    ArenaStats {
      reserved_bytes: self.region.reserved(),
      committed_bytes: self.region.committed(),
      free_bytes: self.chunks.free_bytes(),
      free_chunks: self.chunks.free_chunks(),
      wilderness_bytes: self.chunks.wilderness().map_or(0, |(_, size)| size),
      live_allocations: self.auditor.len(),
      live_bytes: self.auditor.live_bytes(),
      mapped_blocks,
      mapped_bytes,
    }
  }

  /// Unmaps the growable region and every dedicated mapping, whether or not
  /// allocations are still outstanding.
  ///
  /// Every segment is attempted even after a failure.
  ///
  /// # Errors
  ///
  /// `HeapError::Teardown` with the number of segments that failed to unmap.
  pub fn destroy(mut self) -> Result<()> {
    let leaks = self.auditor.len();
    if leaks > 0 {
      warn!("destroying arena with {leaks} live allocations");
    }

    match self.teardown() {
      (0, _) => Ok(()),
      (failed, total) => Err(HeapError::Teardown { failed, total }),
    }
  }

  /// Finds memory for a `size` byte request without registering it with
  /// the auditor.
  pub(crate) fn place(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size >= self.mmap_threshold() {
      self.place_mapped(size)
    } else {
      self.place_in_region(size)
    }
  }

  fn place_mapped(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let block = MappedBlock::map(size, self.config.page_size)?;
    let ptr = block.as_ptr();

    self.allocations.insert(ptr.as_ptr().addr(), Allocation::Mapped(block));

    Ok(ptr)
  }

  fn place_in_region(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let request = size;
    let size = chunk_size(size).ok_or(HeapError::SizeOverflow { size })?;

    let offset = match self.chunks.allocate(size) {
      Some(offset) => offset,
      None => match self.grow_wilderness(size) {
        Ok(()) => self
          .chunks
          .allocate(size)
          .ok_or_else(|| HeapError::RegionExhausted {
            requested: size,
            available: self.region.reserved() - self.region.committed(),
          })?,
        Err(HeapError::RegionExhausted {
          requested,
          available,
        }) => return self.place_overflow(request, requested, available),
        Err(err) => return Err(err),
      },
    };

    let ptr = self.region.pointer(offset);
    self.allocations.insert(ptr.as_ptr().addr(), Allocation::Region { offset });

    Ok(ptr)
  }

  /// Serves a region sized request from its own mapping once the
  /// reservation is used up. Fails only when the OS refuses that too.
  fn place_overflow(
    &mut self,
    size: usize,
    requested: usize,
    available: usize,
  ) -> Result<NonNull<u8>> {
    debug!("region reservation used up ({available} bytes left), mapping {size} bytes");

    self.place_mapped(size).map_err(|err| {
      warn!("fallback mapping of {size} bytes failed: {err}");
      HeapError::RegionExhausted {
        requested,
        available,
      }
    })
  }

  /// Commits enough pages that the wilderness holds at least `size` bytes.
  fn grow_wilderness(
    &mut self,
    size: usize,
  ) -> Result<()> {
    let available = self.chunks.wilderness().map_or(0, |(_, size)| size);
    let granted = self.region.commit(size - available)?;

    self.chunks.extend(granted);
    debug_assert_eq!(self.chunks.end(), self.region.committed());

    Ok(())
  }

  /// Returns the memory behind `address` to the arena. The auditor entry
  /// must already be gone.
  ///
  /// # Safety
  ///
  /// Nothing may use the memory at `address` afterwards.
  pub(crate) unsafe fn discard(
    &mut self,
    address: usize,
  ) {
    match self.allocations.remove(&address) {
      Some(Allocation::Region { offset }) => {
        debug_assert_eq!(self.region.offset(address), Some(offset));
        self.chunks.release(offset);
      }
      Some(Allocation::Mapped(block)) => {
        if let Err(err) = unsafe { block.unmap() } {
          warn!("failed to unmap block at {address:#x}: {err}");
        }
      }
      None => warn!("no allocation recorded at {address:#x}"),
    }
  }

  /// Unmaps everything this arena owns. Returns `(failed, total)` segment
  /// counts. Running it again is a no-op.
  fn teardown(&mut self) -> (usize, usize) {
    let mut failed = 0;
    let mut total = 0;

    for (address, allocation) in std::mem::take(&mut self.allocations) {
      if let Allocation::Mapped(block) = allocation {
        total += 1;
        if let Err(err) = unsafe { block.unmap() } {
          warn!("failed to unmap block at {address:#x}: {err}");
          failed += 1;
        }
      }
    }

    if self.region.is_mapped() {
      total += 1;
      if let Err(err) = unsafe { self.region.unmap() } {
        warn!("failed to unmap region at {:p}: {err}", self.region.base());
        failed += 1;
      }
    }

    self.chunks = ChunkMap::new();
    self.auditor.clear();

    (failed, total)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    let (failed, total) = self.teardown();
    if failed > 0 {
      warn!("dropping arena: {failed} of {total} segments failed to unmap");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::slice;

  use super::*;

  fn fill(
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
  ) {
    let bytes = unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) };
    for (i, byte) in bytes.iter_mut().enumerate() {
      *byte = seed.wrapping_add(i as u8);
    }
  }

  fn holds(
    ptr: NonNull<u8>,
    len: usize,
    seed: u8,
  ) -> bool {
    let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), len) };
    bytes
      .iter()
      .enumerate()
      .all(|(i, byte)| *byte == seed.wrapping_add(i as u8))
  }

  #[test]
  fn test_create_commits_initial_pages() {
    let arena = Arena::create().unwrap();
    let stats = arena.stats();

    assert_eq!(stats.committed_bytes, arena.config().initial_bytes());
    assert_eq!(stats.wilderness_bytes, stats.committed_bytes);
    assert_eq!(stats.free_chunks, 1);
    assert_eq!(stats.live_allocations, 0);

    arena.destroy().unwrap();
  }

  #[test]
  fn test_with_invalid_config() {
    let config = ArenaConfig::default().with_initial_pages(0);
    assert!(matches!(Arena::with_config(config), Err(HeapError::InvalidConfig(_))));
  }

  #[test]
  fn test_allocations_do_not_overlap() {
    let mut arena = Arena::create().unwrap();

    let a = arena.allocate(100).unwrap();
    let b = arena.allocate(100).unwrap();
    fill(a, 100, 1);
    fill(b, 100, 2);

    assert!(holds(a, 100, 1));
    assert!(holds(b, 100, 2));
    assert_eq!(a.as_ptr().addr() % std::mem::size_of::<usize>(), 0);
    assert_eq!(b.as_ptr().addr() % std::mem::size_of::<usize>(), 0);

    unsafe {
      arena.release(a.as_ptr());
      arena.release(b.as_ptr());
    }
    arena.chunks.assert_consistent();
    arena.destroy().unwrap();
  }

  #[test]
  fn test_zero_size_allocations_are_distinct() {
    let mut arena = Arena::create().unwrap();

    let a = arena.allocate(0).unwrap();
    let b = arena.allocate(0).unwrap();

    assert_ne!(a, b);
    assert_eq!(arena.usable_size(a), Some(std::mem::size_of::<usize>()));
    assert_eq!(arena.check_leaks(), vec![
      Leak {
        address: a.as_ptr().addr(),
        size: 0
      },
      Leak {
        address: b.as_ptr().addr(),
        size: 0
      },
    ]);

    arena.destroy().unwrap();
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut arena = Arena::create().unwrap();
    let before = arena.stats();

    unsafe { arena.release(ptr::null_mut()) };

    assert_eq!(arena.stats(), before);
    arena.destroy().unwrap();
  }

  #[test]
  fn test_release_unknown_pointer_is_ignored() {
    let mut arena = Arena::create().unwrap();
    let a = arena.allocate(64).unwrap();

    unsafe {
      arena.release(a.as_ptr());
      arena.release(a.as_ptr());
    }

    assert!(arena.check_leaks().is_empty());
    arena.chunks.assert_consistent();
    arena.destroy().unwrap();
  }

  #[test]
  fn test_large_request_bypasses_region() {
    let mut arena = Arena::create().unwrap();
    let threshold = arena.mmap_threshold();

    let small = arena.allocate(threshold - 1).unwrap();
    let large = arena.allocate(threshold).unwrap();

    assert!(arena.region_contains(small.as_ptr()));
    assert!(!arena.region_contains(large.as_ptr()));
    assert_eq!(arena.usable_size(large), Some(threshold));

    let stats = arena.stats();
    assert_eq!(stats.mapped_blocks, 1);
    assert_eq!(stats.mapped_bytes, threshold);

    unsafe {
      arena.release(large.as_ptr());
      arena.release(small.as_ptr());
    }
    assert_eq!(arena.stats().mapped_blocks, 0);
    arena.destroy().unwrap();
  }

  #[test]
  fn test_region_grows_by_pages() {
    let mut arena = Arena::create().unwrap();
    let page = arena.page_size();
    let initial = arena.stats().committed_bytes;

    let a = arena.allocate(initial).unwrap();
    assert_eq!(arena.stats().wilderness_bytes, 0);

    let b = arena.allocate(page / 2).unwrap();
    let stats = arena.stats();

    assert_eq!(b.as_ptr().addr(), a.as_ptr().addr() + initial);
    assert_eq!(stats.committed_bytes, initial + page);
    assert_eq!(stats.committed_bytes % page, 0);
    assert_eq!(stats.wilderness_bytes, page / 2);

    arena.chunks.assert_consistent();
    arena.destroy().unwrap();
  }

  #[test]
  fn test_full_reservation_falls_back_to_mapping() {
    let page = crate::os::page_size();
    let config = ArenaConfig::default()
      .with_initial_pages(2)
      .with_reserve_bytes(2 * page)
      .with_mmap_threshold_pages(8);
    let mut arena = Arena::with_config(config).unwrap();

    let full = arena.allocate(2 * page).unwrap();
    assert_eq!(arena.stats().committed_bytes, arena.stats().reserved_bytes);
    assert_eq!(arena.stats().wilderness_bytes, 0);

    let small = arena.allocate(page).unwrap();
    assert!(!arena.region_contains(small.as_ptr()));
    assert_eq!(arena.usable_size(small), Some(page));
    assert_eq!(arena.stats().mapped_blocks, 1);

    fill(small, page, 3);
    assert!(holds(small, page, 3));

    unsafe {
      arena.release(small.as_ptr());
      arena.release(full.as_ptr());
    }
    assert_eq!(arena.stats().mapped_blocks, 0);
    assert!(arena.check_leaks().is_empty());
    arena.chunks.assert_consistent();
    arena.destroy().unwrap();
  }

  #[test]
  fn test_failed_fallback_leaves_arena_unchanged() {
    let page = crate::os::page_size();
    let config = ArenaConfig::default()
      .with_initial_pages(2)
      .with_reserve_bytes(2 * page)
      .with_mmap_threshold_pages(usize::MAX);
    let mut arena = Arena::with_config(config).unwrap();

    let before = arena.stats();
    let err = arena.allocate(usize::MAX / 2).unwrap_err();

    assert!(matches!(err, HeapError::RegionExhausted { .. }));
    assert_eq!(arena.stats(), before);

    let ptr = arena.allocate(page).unwrap();
    assert!(arena.region_contains(ptr.as_ptr()));
    fill(ptr, page, 3);
    assert!(holds(ptr, page, 3));

    arena.chunks.assert_consistent();
    arena.destroy().unwrap();
  }

  #[test]
  fn test_allocate_zeroed_clears_recycled_memory() {
    let mut arena = Arena::create().unwrap();

    let a = arena.allocate(256).unwrap();
    fill(a, 256, 0xFF);
    unsafe { arena.release(a.as_ptr()) };

    let b = arena.allocate_zeroed(256).unwrap();
    assert_eq!(a, b);

    let bytes = unsafe { slice::from_raw_parts(b.as_ptr(), 256) };
    assert!(bytes.iter().all(|byte| *byte == 0));

    arena.destroy().unwrap();
  }

  #[test]
  fn test_leaks_and_stats_track_live_allocations() {
    let mut arena = Arena::create().unwrap();
    let threshold = arena.mmap_threshold();

    let a = arena.allocate(24).unwrap();
    let b = arena.allocate(threshold + 1).unwrap();
    let c = arena.allocate(40).unwrap();

    let stats = arena.stats();
    assert_eq!(stats.live_allocations, 3);
    assert_eq!(stats.live_bytes, 24 + threshold + 1 + 40);

    unsafe { arena.release(a.as_ptr()) };

    let mut reported = Vec::new();
    let leaks = arena.report_leaks(|leak| reported.push(*leak));

    assert_eq!(leaks, reported);
    assert_eq!(leaks.len(), 2);
    assert!(leaks.contains(&Leak {
      address: b.as_ptr().addr(),
      size: threshold + 1
    }));
    assert!(leaks.contains(&Leak {
      address: c.as_ptr().addr(),
      size: 40
    }));

    unsafe {
      arena.release(b.as_ptr());
      arena.release(c.as_ptr());
    }
    assert!(arena.check_leaks().is_empty());
    arena.destroy().unwrap();
  }

  #[test]
  fn test_destroy_with_outstanding_allocations() {
    let mut arena = Arena::create().unwrap();
    let threshold = arena.mmap_threshold();

    arena.allocate(128).unwrap();
    arena.allocate(threshold * 2).unwrap();

    assert_eq!(arena.check_leaks().len(), 2);
    assert!(arena.destroy().is_ok());
  }

  #[test]
  fn test_teardown_is_idempotent() {
    let mut arena = Arena::create().unwrap();
    arena.allocate(arena.mmap_threshold()).unwrap();

    assert_eq!(arena.teardown(), (0, 2));
    assert_eq!(arena.teardown(), (0, 0));
    assert!(arena.check_leaks().is_empty());
  }

  #[test]
  fn test_teardown_continues_past_failed_unmap() {
    let mut arena = Arena::create().unwrap();
    let page = arena.page_size();
    arena.allocate(arena.mmap_threshold()).unwrap();

    // Misaligned, so munmap rejects it.
    let bogus = MappedBlock::from_raw_parts(NonNull::dangling(), page);
    arena
      .allocations
      .insert(bogus.as_ptr().as_ptr().addr(), Allocation::Mapped(bogus));

    assert_eq!(arena.teardown(), (1, 3));
    assert!(arena.allocations.is_empty());
    assert!(!arena.region.is_mapped());
    assert_eq!(arena.teardown(), (0, 0));
  }

  #[test]
  fn test_destroy_reports_failed_unmaps() {
    let mut arena = Arena::create().unwrap();
    let page = arena.page_size();

    let bogus = MappedBlock::from_raw_parts(NonNull::dangling(), page);
    arena
      .allocations
      .insert(bogus.as_ptr().as_ptr().addr(), Allocation::Mapped(bogus));

    assert!(matches!(
      arena.destroy(),
      Err(HeapError::Teardown {
        failed: 1,
        total: 2
      })
    ));
  }

  #[test]
  fn test_arenas_are_isolated() {
    let mut first = Arena::create().unwrap();
    let mut second = Arena::create().unwrap();

    let a = first.allocate(64).unwrap();
    let b = second.allocate(64).unwrap();

    assert!(first.region_contains(a.as_ptr()));
    assert!(!first.region_contains(b.as_ptr()));
    assert!(first.usable_size(b).is_none());

    unsafe { second.release(b.as_ptr()) };
    assert_eq!(first.check_leaks().len(), 1);

    first.destroy().unwrap();
    second.destroy().unwrap();
  }

  #[test]
  fn test_arena_moves_across_threads() {
    let mut arena = Arena::create().unwrap();
    let ptr = arena.allocate(32).unwrap().as_ptr() as usize;

    let arena = std::thread::spawn(move || {
      unsafe { arena.release(ptr as *mut u8) };
      arena
    })
    .join()
    .unwrap();

    assert!(arena.check_leaks().is_empty());
    arena.destroy().unwrap();
  }
}

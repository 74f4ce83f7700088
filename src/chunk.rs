//! Chunk bookkeeping for the growable region.
//!
//! Chunk records live here, owned by the arena and keyed by their byte
//! offset from the region base, instead of as headers written next to user
//! memory. Nothing in this module touches raw memory.
//!
//! ```text
//!   offset 0                                                        end
//!   ┌────────┬────────┬──────────────┬────────┬──────────────────────┐
//!   │  used  │  free  │     used     │  used  │   free (wilderness)  │
//!   └────────┴────────┴──────────────┴────────┴──────────────────────┘
//!                ▲                                       ▲
//!                └── address-ordered free index          └── direct reference
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

/// Smallest free remainder worth keeping as its own chunk. Anything smaller
/// stays attached to the used chunk as internal fragmentation.
pub(crate) const MIN_CHUNK_SIZE: usize = 4 * mem::size_of::<usize>();

/// Chunk size for a request: word aligned, never zero.
pub(crate) fn chunk_size(request: usize) -> Option<usize> {
  crate::align::checked_align_to(request.max(1), mem::size_of::<usize>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
  pub size: usize,
  pub is_free: bool,
}

impl Chunk {
  pub fn new(
    size: usize,
    is_free: bool,
  ) -> Self {
    Self { size, is_free }
  }
}

/// Every chunk of the growable region, tiling `[0, end)` without gaps.
///
/// Free chunks are indexed twice over: the one touching `end` is the
/// wilderness and is held directly; every other free chunk sits in an
/// address-ordered set. A free chunk is in exactly one of the two.
#[derive(Debug, Default)]
pub(crate) struct ChunkMap {
  chunks: BTreeMap<usize, Chunk>,
  end: usize,
  wilderness: Option<usize>,
  free: BTreeSet<usize>,
}

impl ChunkMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bytes currently tiled by chunks.
  pub fn end(&self) -> usize {
    self.end
  }

  #[cfg(test)]
  pub fn get(
    &self,
    offset: usize,
  ) -> Option<Chunk> {
    self.chunks.get(&offset).copied()
  }

  pub fn size_of(
    &self,
    offset: usize,
  ) -> usize {
    self.chunk(offset).size
  }

  /// Offset and size of the wilderness chunk, if the region ends free.
  pub fn wilderness(&self) -> Option<(usize, usize)> {
    self
      .wilderness
      .map(|offset| (offset, self.chunk(offset).size))
  }

  pub fn free_chunks(&self) -> usize {
    self.free.len() + usize::from(self.wilderness.is_some())
  }

  pub fn free_bytes(&self) -> usize {
    self
      .free
      .iter()
      .chain(self.wilderness.iter())
      .map(|offset| self.chunk(*offset).size)
      .sum()
  }

  /// Appends `bytes` of fresh space at the end of the region, growing the
  /// wilderness or creating it when the region currently ends in use.
  /// Returns the wilderness offset.
  pub fn extend(
    &mut self,
    bytes: usize,
  ) -> usize {
    let old_end = self.end;
    self.end += bytes;

    match self.wilderness {
      Some(offset) => {
        self.chunk_mut(offset).size += bytes;
        offset
      }
      None => {
        self.chunks.insert(old_end, Chunk::new(bytes, true));
        self.wilderness = Some(old_end);
        old_end
      }
    }
  }

  /// Finds room for a `size` byte chunk: the wilderness if it is big enough,
  /// otherwise the lowest addressed free chunk that fits.
  pub fn find_fit(
    &self,
    size: usize,
  ) -> Option<usize> {
    if let Some((offset, available)) = self.wilderness() {
      if available >= size {
        return Some(offset);
      }
    }

    self
      .free
      .iter()
      .copied()
      .find(|offset| self.chunk(*offset).size >= size)
  }

  /// Takes a `size` byte chunk out of existing free space. `None` means the
  /// region has to grow first.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<usize> {
    let offset = self.find_fit(size)?;

    self.unindex(offset);
    self.split(offset, size);

    Some(offset)
  }

  /// Marks the chunk at `offset` used with `size` bytes, and turns whatever
  /// is left behind it into a free chunk when that is at least
  /// [`MIN_CHUNK_SIZE`]. The remainder is coalesced forward and indexed.
  ///
  /// The chunk must already be out of the free index and hold at least
  /// `size` bytes.
  pub fn split(
    &mut self,
    offset: usize,
    size: usize,
  ) -> (usize, Option<usize>) {
    let chunk = self.chunk_mut(offset);
    debug_assert!(chunk.size >= size);
    chunk.is_free = false;

    let remainder = chunk.size - size;
    if remainder < MIN_CHUNK_SIZE {
      return (offset, None);
    }

    chunk.size = size;

    let tail = offset + size;
    self.chunks.insert(tail, Chunk::new(remainder, true));

    let merged = self.coalesce(tail);
    self.index(merged);

    (offset, Some(merged))
  }

  /// Merges the free, unindexed chunk at `offset` with a free physical
  /// successor and predecessor. Returns the offset of the merged chunk,
  /// still unindexed.
  pub fn coalesce(
    &mut self,
    offset: usize,
  ) -> usize {
    let mut offset = offset;

    if let Some((next_offset, next)) = self.next_of(offset) {
      if next.is_free {
        self.unindex(next_offset);
        self.chunks.remove(&next_offset);
        self.chunk_mut(offset).size += next.size;
      }
    }

    if let Some((prev_offset, prev)) = self.prev_of(offset) {
      if prev.is_free {
        self.unindex(prev_offset);
        let size = self.chunk(offset).size;
        self.chunks.remove(&offset);
        self.chunk_mut(prev_offset).size += size;
        offset = prev_offset;
      }
    }

    offset
  }

  /// Frees the used chunk at `offset`, coalesces it with its neighbours and
  /// indexes the result. Returns the merged offset.
  pub fn release(
    &mut self,
    offset: usize,
  ) -> usize {
    let chunk = self.chunk_mut(offset);
    debug_assert!(!chunk.is_free);
    chunk.is_free = true;

    let merged = self.coalesce(offset);
    self.index(merged);

    merged
  }

  /// Shrinks the used chunk at `offset` to `size` bytes. Returns the offset
  /// of the freed tail when one was split off.
  ///
  /// A tail too small to stand alone still goes back when the successor is
  /// free, by moving the start of that successor down.
  pub fn shrink_in_place(
    &mut self,
    offset: usize,
    size: usize,
  ) -> Option<usize> {
    let remainder = self.chunk(offset).size - size;

    if remainder > 0 && remainder < MIN_CHUNK_SIZE {
      if let Some((next_offset, next)) = self.next_of(offset) {
        if next.is_free {
          self.unindex(next_offset);
          self.chunks.remove(&next_offset);
          self.chunk_mut(offset).size = size;

          let tail = offset + size;
          self.chunks.insert(tail, Chunk::new(remainder + next.size, true));
          self.index(tail);

          return Some(tail);
        }
      }
    }

    self.split(offset, size).1
  }

  /// Grows the used chunk at `offset` to `size` bytes by absorbing a free
  /// physical successor. Returns `false` when the successor is missing, in
  /// use, or too small.
  pub fn grow_in_place(
    &mut self,
    offset: usize,
    size: usize,
  ) -> bool {
    let current = self.chunk(offset).size;
    if current >= size {
      return true;
    }

    let Some((next_offset, next)) = self.next_of(offset) else {
      return false;
    };

    if !next.is_free || current + next.size < size {
      return false;
    }

    self.unindex(next_offset);
    self.chunks.remove(&next_offset);
    self.chunk_mut(offset).size += next.size;
    self.split(offset, size);

    true
  }

  /// How many bytes the region has to grow by before the used chunk at
  /// `offset` can reach `size` in place. `None` when growing the region
  /// would not help because a used chunk sits in the way.
  pub fn growth_deficit(
    &self,
    offset: usize,
    size: usize,
  ) -> Option<usize> {
    let current = self.chunk(offset).size;
    let chunk_end = offset + current;

    if chunk_end == self.end {
      return Some(size.saturating_sub(current));
    }

    match self.wilderness() {
      Some((wilderness, available)) if wilderness == chunk_end => {
        Some(size.saturating_sub(current + available))
      }
      _ => None,
    }
  }

  fn next_of(
    &self,
    offset: usize,
  ) -> Option<(usize, Chunk)> {
    let next = offset + self.chunk(offset).size;
    self.chunks.get(&next).map(|chunk| (next, *chunk))
  }

  fn prev_of(
    &self,
    offset: usize,
  ) -> Option<(usize, Chunk)> {
    self
      .chunks
      .range(..offset)
      .next_back()
      .map(|(prev, chunk)| (*prev, *chunk))
  }

  fn index(
    &mut self,
    offset: usize,
  ) {
    let chunk = self.chunk(offset);
    debug_assert!(chunk.is_free);

    if offset + chunk.size == self.end {
      self.wilderness = Some(offset);
    } else {
      self.free.insert(offset);
    }
  }

  fn unindex(
    &mut self,
    offset: usize,
  ) {
    if self.wilderness == Some(offset) {
      self.wilderness = None;
    } else {
      self.free.remove(&offset);
    }
  }

  fn chunk(
    &self,
    offset: usize,
  ) -> Chunk {
    match self.chunks.get(&offset) {
      Some(chunk) => *chunk,
      None => unreachable!("no chunk at offset {offset:#x}"),
    }
  }

  fn chunk_mut(
    &mut self,
    offset: usize,
  ) -> &mut Chunk {
    match self.chunks.get_mut(&offset) {
      Some(chunk) => chunk,
      None => unreachable!("no chunk at offset {offset:#x}"),
    }
  }

  /// Panics if the chunk layout or the free index is inconsistent.
  #[cfg(test)]
  pub fn assert_consistent(&self) {
    let mut cursor = 0;
    let mut previous_free = false;

    for (offset, chunk) in &self.chunks {
      assert_eq!(*offset, cursor, "gap or overlap at {offset:#x}");
      assert_eq!(
        chunk.size,
        crate::align!(chunk.size),
        "unaligned chunk at {offset:#x}"
      );
      assert!(
        !(previous_free && chunk.is_free),
        "uncoalesced free chunks at {offset:#x}"
      );

      let indexed = self.free.contains(offset) || self.wilderness == Some(*offset);
      assert_eq!(chunk.is_free, indexed, "free index out of sync at {offset:#x}");

      previous_free = chunk.is_free;
      cursor += chunk.size;
    }

    assert_eq!(cursor, self.end);

    if let Some(offset) = self.wilderness {
      assert_eq!(offset + self.chunk(offset).size, self.end);
      assert!(!self.free.contains(&offset));
    }
  }
}

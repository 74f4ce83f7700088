/// A read-only snapshot of an arena's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
  /// Address space reserved for the growable region.
  pub reserved_bytes: usize,
  /// Bytes of the growable region backed by pages. Always whole pages.
  pub committed_bytes: usize,
  /// Free bytes inside the growable region, wilderness included.
  pub free_bytes: usize,
  /// Number of free chunks, wilderness included.
  pub free_chunks: usize,
  /// Size of the wilderness chunk, zero when the region ends in use.
  pub wilderness_bytes: usize,
  /// Outstanding allocations across both the region and mapped blocks.
  pub live_allocations: usize,
  /// Sum of the sizes requested by outstanding allocations.
  pub live_bytes: usize,
  /// Outstanding dedicated mappings.
  pub mapped_blocks: usize,
  /// Page rounded capacity of outstanding dedicated mappings.
  pub mapped_bytes: usize,
}

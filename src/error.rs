use std::io;

use thiserror::Error;

/// Errors returned by arena operations.
///
/// Every failure leaves the arena in the state it had before the call.
#[derive(Debug, Error)]
pub enum HeapError {
  /// The address space for the growable region could not be reserved.
  #[error("failed to reserve {size} bytes for the growable region: {source}")]
  Reserve { size: usize, source: io::Error },

  /// A dedicated mapping for a large block could not be created.
  #[error("failed to map a {size} byte block: {source}")]
  Map { size: usize, source: io::Error },

  /// Pages inside the growable region could not be committed.
  #[error("failed to commit {size} bytes of the growable region: {source}")]
  Commit { size: usize, source: io::Error },

  /// The growable region has used up its reservation.
  #[error("growable region exhausted: {requested} bytes requested, {available} bytes left")]
  RegionExhausted { requested: usize, available: usize },

  /// Rounding the requested size up would overflow.
  #[error("requested size {size} is too large")]
  SizeOverflow { size: usize },

  /// The pointer was not handed out by this arena, or was already released.
  #[error("pointer {address:#x} is not a live allocation of this arena")]
  UnknownPointer { address: usize },

  /// The configuration was rejected by `ArenaConfig::validate`.
  #[error("invalid arena configuration: {0}")]
  InvalidConfig(&'static str),

  /// Some segments could not be unmapped while destroying the arena.
  #[error("{failed} of {total} segments failed to unmap")]
  Teardown { failed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, HeapError>;

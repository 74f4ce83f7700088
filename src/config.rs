use crate::error::{HeapError, Result};
use crate::os;

const DEFAULT_INITIAL_PAGES: usize = 4;
const DEFAULT_MMAP_THRESHOLD_PAGES: usize = 8;
const DEFAULT_RESERVE_BYTES: usize = 256 << 20;

/// Sizing knobs for an [`Arena`](crate::Arena).
///
/// ```rust
/// use rheap::ArenaConfig;
///
/// let config = ArenaConfig::default()
///   .with_initial_pages(1)
///   .with_mmap_threshold_pages(16);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.mmap_threshold(), 16 * config.page_size);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
  /// Granularity of every mapping. Must be a multiple of the OS page size.
  pub page_size: usize,
  /// Pages committed to the growable region on creation.
  pub initial_pages: usize,
  /// Requests of at least this many pages get a dedicated mapping.
  pub mmap_threshold_pages: usize,
  /// Address space set aside for the growable region. It never grows past this.
  pub reserve_bytes: usize,
}

impl Default for ArenaConfig {
  fn default() -> Self {
    Self {
      page_size: os::page_size(),
      initial_pages: DEFAULT_INITIAL_PAGES,
      mmap_threshold_pages: DEFAULT_MMAP_THRESHOLD_PAGES,
      reserve_bytes: DEFAULT_RESERVE_BYTES,
    }
  }
}

impl ArenaConfig {
  pub fn with_page_size(
    mut self,
    page_size: usize,
  ) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn with_initial_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.initial_pages = pages;
    self
  }

  pub fn with_mmap_threshold_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.mmap_threshold_pages = pages;
    self
  }

  pub fn with_reserve_bytes(
    mut self,
    bytes: usize,
  ) -> Self {
    self.reserve_bytes = bytes;
    self
  }

  /// Bytes committed on creation.
  pub fn initial_bytes(&self) -> usize {
    self.initial_pages.saturating_mul(self.page_size)
  }

  /// Smallest request, in bytes, served by a dedicated mapping.
  pub fn mmap_threshold(&self) -> usize {
    self.mmap_threshold_pages.saturating_mul(self.page_size)
  }

  pub fn validate(&self) -> Result<()> {
    let os_page = os::page_size();

    if !self.page_size.is_power_of_two() || self.page_size % os_page != 0 {
      return Err(HeapError::InvalidConfig(
        "page size must be a power-of-two multiple of the OS page size",
      ));
    }

    if self.initial_pages == 0 {
      return Err(HeapError::InvalidConfig("at least one initial page is required"));
    }

    if self.mmap_threshold_pages == 0 {
      return Err(HeapError::InvalidConfig("mmap threshold must be at least one page"));
    }

    if self.reserve_bytes % self.page_size != 0 {
      return Err(HeapError::InvalidConfig("reservation must be a whole number of pages"));
    }

    match self.initial_pages.checked_mul(self.page_size) {
      Some(initial) if initial <= self.reserve_bytes => Ok(()),
      _ => Err(HeapError::InvalidConfig("initial pages exceed the reservation")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_is_valid() {
    let config = ArenaConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.page_size, os::page_size());
    assert_eq!(config.mmap_threshold(), 8 * os::page_size());
    assert_eq!(config.initial_bytes(), 4 * os::page_size());
  }

  #[test]
  fn test_rejects_bad_page_size() {
    let config = ArenaConfig::default().with_page_size(os::page_size() + 8);
    assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));

    let config = ArenaConfig::default().with_page_size(os::page_size() / 2);
    assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));
  }

  #[test]
  fn test_rejects_zero_counts() {
    assert!(ArenaConfig::default().with_initial_pages(0).validate().is_err());
    assert!(ArenaConfig::default().with_mmap_threshold_pages(0).validate().is_err());
  }

  #[test]
  fn test_rejects_small_reservation() {
    let page = os::page_size();

    assert!(ArenaConfig::default().with_reserve_bytes(page + 1).validate().is_err());
    assert!(
      ArenaConfig::default()
        .with_initial_pages(4)
        .with_reserve_bytes(2 * page)
        .validate()
        .is_err()
    );
    assert!(
      ArenaConfig::default()
        .with_initial_pages(2)
        .with_reserve_bytes(2 * page)
        .validate()
        .is_ok()
    );
  }

  #[test]
  fn test_rejects_overflowing_initial_pages() {
    let config = ArenaConfig::default().with_initial_pages(usize::MAX);
    assert!(config.validate().is_err());
  }
}

//! Live allocation registry behind the arena's leak checks.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;

/// An allocation that is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Leak {
  /// Address handed to the caller.
  pub address: usize,
  /// Size the caller asked for, not the usable size.
  pub size: usize,
}

impl fmt::Display for Leak {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{} bytes at {:#x}", self.size, self.address)
  }
}

#[derive(Debug, Default)]
pub(crate) struct LeakAuditor {
  live: BTreeMap<usize, usize>,
}

impl LeakAuditor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records `address` as live with `size` bytes, replacing any earlier
  /// size recorded for it.
  pub fn register(
    &mut self,
    address: usize,
    size: usize,
  ) {
    self.live.insert(address, size);
  }

  pub fn deregister(
    &mut self,
    address: usize,
  ) -> Option<usize> {
    self.live.remove(&address)
  }

  pub fn size_of(
    &self,
    address: usize,
  ) -> Option<usize> {
    self.live.get(&address).copied()
  }

  pub fn len(&self) -> usize {
    self.live.len()
  }

  pub fn live_bytes(&self) -> usize {
    self.live.values().sum()
  }

  /// Every live allocation, lowest address first.
  pub fn leaks(&self) -> Vec<Leak> {
    self
      .live
      .iter()
      .map(|(address, size)| Leak {
        address: *address,
        size: *size,
      })
      .collect()
  }

  /// Like [`LeakAuditor::leaks`], handing each entry to `reporter` as well.
  pub fn report<F>(
    &self,
    mut reporter: F,
  ) -> Vec<Leak>
  where
    F: FnMut(&Leak),
  {
    let leaks = self.leaks();
    for leak in &leaks {
      warn!("leaked {leak}");
      reporter(leak);
    }
    leaks
  }

  pub fn clear(&mut self) {
    self.live.clear();
  }
}

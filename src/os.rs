//! Anonymous memory mappings. Everything that calls into the kernel lives here.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED, MAP_NORESERVE, MAP_PRIVATE, PROT_NONE, PROT_READ,
  PROT_WRITE, _SC_PAGESIZE, c_void, sysconf,
};
use log::warn;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// The OS page size, read once per process.
pub(crate) fn page_size() -> usize {
  static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

  *PAGE_SIZE.get_or_init(|| {
    let size = unsafe { sysconf(_SC_PAGESIZE) };

    match usize::try_from(size) {
      Ok(size) if size.is_power_of_two() => size,
      _ => {
        warn!("sysconf(_SC_PAGESIZE) returned {size}, assuming {FALLBACK_PAGE_SIZE}");
        FALLBACK_PAGE_SIZE
      }
    }
  })
}

fn checked_mapping(address: *mut c_void) -> io::Result<NonNull<u8>> {
  if address == MAP_FAILED {
    return Err(io::Error::last_os_error());
  }

  NonNull::new(address.cast()).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Reserves `len` bytes of address space with no access rights and no swap
/// accounting. Pages become usable only once [`commit`]ted.
pub(crate) fn reserve(len: usize) -> io::Result<NonNull<u8>> {
  let address = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      PROT_NONE,
      MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
      -1,
      0,
    )
  };

  checked_mapping(address)
}

/// Maps `len` fresh zeroed read/write bytes at exactly `address`.
///
/// # Safety
///
/// `[address, address + len)` must lie inside a reservation owned by the
/// caller and must not hold any live data.
pub(crate) unsafe fn commit(
  address: NonNull<u8>,
  len: usize,
) -> io::Result<()> {
  let mapped = unsafe {
    libc::mmap(
      address.as_ptr().cast(),
      len,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED,
      -1,
      0,
    )
  };

  checked_mapping(mapped).map(|_| ())
}

/// Maps `len` fresh zeroed read/write bytes anywhere.
pub(crate) fn map(len: usize) -> io::Result<NonNull<u8>> {
  let address = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  checked_mapping(address)
}

/// # Safety
///
/// `[address, address + len)` must be a mapping owned by the caller, and
/// nothing may touch it afterwards.
pub(crate) unsafe fn unmap(
  address: NonNull<u8>,
  len: usize,
) -> io::Result<()> {
  if unsafe { libc::munmap(address.as_ptr().cast(), len) } != 0 {
    return Err(io::Error::last_os_error());
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_size() {
    let size = page_size();

    assert!(size.is_power_of_two());
    assert!(size >= 4096);
    assert_eq!(size, page_size());
  }

  #[test]
  fn test_map_is_zeroed_and_writable() {
    let len = page_size();
    let block = map(len).unwrap();

    unsafe {
      let bytes = std::slice::from_raw_parts_mut(block.as_ptr(), len);
      assert!(bytes.iter().all(|byte| *byte == 0));

      bytes.fill(0xAB);
      assert!(bytes.iter().all(|byte| *byte == 0xAB));

      unmap(block, len).unwrap();
    }
  }

  #[test]
  fn test_reserve_then_commit() {
    let page = page_size();
    let base = reserve(4 * page).unwrap();

    unsafe {
      commit(base, page).unwrap();
      base.as_ptr().write(7);
      assert_eq!(base.as_ptr().read(), 7);

      let second = base.add(page);
      commit(second, page).unwrap();
      second.as_ptr().write(9);
      assert_eq!(base.as_ptr().read(), 7);

      unmap(base, 4 * page).unwrap();
    }
  }
}

/// Rounds `value` up to the machine word size.
///
/// Every chunk handed out by an arena is sized and placed with this, so user
/// pointers are always word aligned.
///
/// # Examples
///
/// ```rust
/// use rheap::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, ::core::mem::size_of::<usize>())
  };
}

/// Rounds `value` up to a multiple of `to`, which must be a power of two.
///
/// ```rust
/// use rheap::align_to;
///
/// assert_eq!(align_to!(1, 4096), 4096);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}

/// Overflow-checked form of [`align_to!`], used on caller supplied sizes.
pub(crate) const fn checked_align_to(
  value: usize,
  to: usize,
) -> Option<usize> {
  match value.checked_add(to - 1) {
    Some(bumped) => Some(bumped & !(to - 1)),
    None => None,
  }
}

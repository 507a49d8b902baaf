/// Payload alignment guaranteed by the heap, in bytes.
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the next multiple of `boundary`.
///
/// `boundary` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rheap::align_to;
///
/// assert_eq!(align_to!(13, 16), 16);
/// assert_eq!(align_to!(32, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $boundary:expr) => {
    ($value + $boundary - 1) & !($boundary - 1)
  };
}

/// Rounds `value` up to the heap's payload alignment ([`ALIGNMENT`]).
///
/// # Examples
///
/// ```rust
/// use rheap::align;
///
/// assert_eq!(align!(100), 104);
/// assert_eq!(align!(8), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds a requested payload size up to [`ALIGNMENT`], or `None` when the
/// rounded value would not fit in a `usize`.
pub fn checked_align(size: usize) -> Option<usize> {
  size.checked_add(ALIGNMENT - 1).map(|padded| padded & !(ALIGNMENT - 1))
}

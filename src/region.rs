//! Sources of raw memory for the heap region.
//!
//! A [`RegionSource`] stands in for the operating system's region-growth
//! primitive: every grant must start exactly where the previous one ended, so
//! the heap only ever extends at its high end.
//!
//! ```text
//!   base                              end of region
//!   │                                       │
//!   ▼                                       ▼
//!   ┌──────────────┬───────────────┬────────┬──────────────────────────┐
//!   │   grant #0   │   grant #1    │ grant #2 (page_size * 2)          │
//!   │ (page_size)  │ (page_size*1) │                                   │
//!   └──────────────┴───────────────┴───────────────────────────────────┘
//! ```

use std::{alloc, ptr::NonNull};

use crate::{align_to, error::RegionError};

/// Alignment of the first byte a source hands out.
pub const REGION_ALIGN: usize = 16;

/// An OS-like primitive that hands out contiguous memory.
pub trait RegionSource {
  /// Grants `size` more bytes, returning the first new byte.
  ///
  /// The first grant must be aligned to [`REGION_ALIGN`]. Every later grant
  /// must begin where the previous one ended; a source that cannot keep that
  /// promise reports [`RegionError::Discontiguous`]. The memory is not
  /// assumed to be zeroed.
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, RegionError>;
}

/// Grows the program break with `sbrk(2)`.
///
/// The break is shared with anything else in the process that calls `brk`.
/// When another caller has moved it since the last grant, `grow` reports
/// [`RegionError::Discontiguous`] without touching the break; a grant that
/// still lands elsewhere (the break moved between the check and the call) is
/// handed back while it is on top.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct Sbrk {
  end: Option<usize>,
}

#[cfg(unix)]
impl Sbrk {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current program break.
  pub fn program_break() -> *mut u8 {
    unsafe { libc::sbrk(0) }.cast()
  }

  /// First byte past the last grant, once one has been made.
  pub fn end(&self) -> Option<usize> {
    self.end
  }

  /// Returns `size` bytes at `raw` when nothing has been granted above them.
  fn give_back(
    raw: *mut u8,
    size: libc::intptr_t,
  ) {
    if Self::program_break().addr() == raw.addr() + size as usize {
      unsafe { libc::sbrk(-size) };
    }
  }
}

#[cfg(unix)]
impl RegionSource for Sbrk {
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, RegionError> {
    let refused = RegionError::Refused { requested: size };

    let brk = Self::program_break().addr();
    if brk == usize::MAX {
      return Err(refused);
    }

    let pad = match self.end {
      Some(end) if end != brk => {
        return Err(RegionError::Discontiguous {
          expected: end,
          actual: brk,
        });
      }
      Some(_) => 0,
      None => align_to!(brk, REGION_ALIGN) - brk,
    };

    let requested = size.checked_add(pad).ok_or(refused)?;
    let increment = libc::intptr_t::try_from(requested).map_err(|_| refused)?;

    let raw = unsafe { libc::sbrk(increment) }.cast::<u8>();
    if raw.addr() == usize::MAX {
      return Err(refused);
    }

    if raw.addr() != brk {
      Self::give_back(raw, increment);
      return Err(RegionError::Discontiguous {
        expected: brk,
        actual: raw.addr(),
      });
    }

    self.end = Some(brk + requested);
    NonNull::new(raw.wrapping_add(pad)).ok_or(refused)
  }
}

/// A fixed-capacity reservation taken from the global allocator.
///
/// Grants are carved from the reservation front to back and refused once it
/// is exhausted, which makes it a deterministic stand-in for the OS in tests
/// and a way to run independent heaps side by side. The reservation is
/// released when the source is dropped.
pub struct Reserved {
  memory: NonNull<u8>,
  layout: alloc::Layout,
  granted: usize,
}

unsafe impl Send for Reserved {}

impl Reserved {
  pub fn new(capacity: usize) -> Result<Self, RegionError> {
    let refused = RegionError::Refused {
      requested: capacity,
    };
    let layout = alloc::Layout::from_size_align(capacity.max(REGION_ALIGN), REGION_ALIGN)
      .map_err(|_| refused)?;
    let memory = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(refused)?;

    Ok(Self {
      memory,
      layout,
      granted: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  /// Bytes handed out so far.
  pub fn granted(&self) -> usize {
    self.granted
  }
}

impl RegionSource for Reserved {
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, RegionError> {
    let remaining = self.capacity() - self.granted;
    if size > remaining {
      return Err(RegionError::Refused { requested: size });
    }

    let start = unsafe { self.memory.add(self.granted) };
    self.granted += size;
    Ok(start)
  }
}

impl Drop for Reserved {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.memory.as_ptr(), self.layout) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserved_grants_are_contiguous() {
    let mut source = Reserved::new(4096).unwrap();

    let first = source.grow(1024).unwrap();
    let second = source.grow(2048).unwrap();

    assert_eq!(first.addr().get() % REGION_ALIGN, 0);
    assert_eq!(second.addr().get(), first.addr().get() + 1024);
    assert_eq!(source.granted(), 3072);
  }

  #[test]
  fn test_reserved_refuses_past_capacity() {
    let mut source = Reserved::new(4096).unwrap();

    source.grow(4000).unwrap();
    assert_eq!(
      source.grow(200),
      Err(RegionError::Refused { requested: 200 })
    );
    assert_eq!(source.granted(), 4000);

    assert!(source.grow(96).is_ok());
  }

  #[test]
  fn test_reserved_memory_is_writable() {
    let mut source = Reserved::new(64).unwrap();
    let start = source.grow(64).unwrap();

    unsafe {
      start.as_ptr().write_bytes(0xAB, 64);
      assert_eq!(start.as_ptr().add(63).read(), 0xAB);
    }
  }
}

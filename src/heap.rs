//! The thread-safe heap.
//!
//! ```text
//!   Heap<S>
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ base ──────────────────────────────┐   (fixed, lock-free)    │
//!   │ Mutex ─┬─ source        (S)        │                         │
//!   │        ├─ size          (bytes)    │                         │
//!   │        ├─ growth_counter (1, 2, ..)│                         │
//!   │        └─ free_list                │                         │
//!   └────────────────────────────────────┼─────────────────────────┘
//!                                        ▼
//!   region:  ┌───────┬────┬─────────┬────┬───────────────────────────┐
//!            │ state │ H  │ payload │ H  │  free                     │
//!            └───────┴────┴─────────┴────┴───────────────────────────┘
//!            0       48   64
//! ```
//!
//! One lock serializes every mutation. Allocation keeps it across the whole
//! search-and-grow loop, including the call into the region source, so a slow
//! OS grant stalls every other thread. That is the price of taking the lock
//! once per call.

use std::{fmt, ptr::NonNull};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::{
  align::checked_align,
  block::{HEADER_SIZE, Offset, STATE_SIZE, payload_offset},
  config::HeapConfig,
  error::{Corruption, HeapError, RegionError, Result},
  free_list::{Allocated, FreeList},
  region::RegionSource,
};

/// Largest payload a single request may ask for. Anything above it could not
/// be described by one block in an address space of `isize::MAX` bytes.
pub const MAX_REQUEST: usize = isize::MAX as usize - HEADER_SIZE;

/// Point-in-time counters for a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes in the region, state reservation and headers included.
  pub heap_size: usize,
  /// Multiplier of the next growth request.
  pub growth_counter: usize,
  /// Successful growths since initialization.
  pub growths: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
}

/// A free block as seen from outside: header offset and payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  pub offset: Offset,
  pub size: usize,
}

struct Inner<S> {
  source: S,
  size: usize,
  growth_counter: usize,
  free_list: FreeList,
}

impl<S: RegionSource> Inner<S> {
  /// Asks the source for `page_size * growth_counter` more bytes and hands
  /// them to the last free block.
  fn grow(
    &mut self,
    base: NonNull<u8>,
    page_size: usize,
  ) -> Result<usize, RegionError> {
    let requested = page_size
      .checked_mul(self.growth_counter)
      .ok_or(RegionError::Refused {
        requested: usize::MAX,
      })?;

    let expected = base.addr().get() + self.size;
    let start = self.source.grow(requested)?;
    if start.addr().get() != expected {
      return Err(RegionError::Discontiguous {
        expected,
        actual: start.addr().get(),
      });
    }

    self.growth_counter += 1;
    self.size += requested;
    self.free_list.extend_tail(requested);
    Ok(requested)
  }

  /// The live allocation whose payload starts at `addr`.
  fn locate(
    &self,
    base: NonNull<u8>,
    addr: usize,
  ) -> Option<Allocated> {
    let base = base.addr().get();
    let first_payload = base + payload_offset(STATE_SIZE);

    if addr < first_payload || addr >= base + self.size {
      return None;
    }

    self.free_list.find_allocated(addr - base - HEADER_SIZE)
  }

  fn stats(&self) -> HeapStats {
    let (free_blocks, free_bytes) = self.free_list.free_totals();
    let (allocated_blocks, allocated_bytes) = self.free_list.allocated_totals(self.size);

    HeapStats {
      heap_size: self.size,
      growth_counter: self.growth_counter,
      growths: self.growth_counter - 1,
      free_blocks,
      free_bytes,
      allocated_blocks,
      allocated_bytes,
    }
  }
}

/// A first-fit heap over one contiguous, growable region.
///
/// Block headers live inside the region, so serving a request never touches
/// any other allocator.
///
/// # Examples
///
/// ```rust
/// use rheap::{Heap, Reserved};
///
/// let heap = Heap::new(Reserved::new(64 * 1024).unwrap()).unwrap();
///
/// let ptr = heap.allocate(100).unwrap();
/// assert_eq!(ptr.as_ptr().addr() % 8, 0);
///
/// heap.deallocate(ptr.as_ptr()).unwrap();
/// assert!(heap.deallocate(ptr.as_ptr()).is_err());
/// ```
pub struct Heap<S: RegionSource> {
  base: NonNull<u8>,
  config: HeapConfig,
  inner: Mutex<Inner<S>>,
}

unsafe impl<S: RegionSource + Send> Send for Heap<S> {}
unsafe impl<S: RegionSource + Send> Sync for Heap<S> {}

impl<S: RegionSource> Heap<S> {
  /// Initializes a heap with the default configuration.
  pub fn new(source: S) -> Result<Self> {
    Self::initialize(HeapConfig::default(), source)
  }

  /// Takes one page from `source` and lays the first free block over it.
  pub fn initialize(
    config: HeapConfig,
    mut source: S,
  ) -> Result<Self> {
    config.validate()?;

    let base = source.grow(config.page_size).map_err(|err| {
      if config.log_events {
        warn!("initial region of {} bytes refused: {err}", config.page_size);
      }
      HeapError::InitFailure(err)
    })?;

    let first_size = config.page_size - HEADER_SIZE - STATE_SIZE;
    // The source granted `page_size` bytes at `base`, aligned to REGION_ALIGN.
    let free_list = unsafe { FreeList::new(base, STATE_SIZE, first_size) };

    if config.log_events {
      debug!(
        "heap initialized at {base:p}: {} bytes, first free block {first_size} bytes",
        config.page_size
      );
    }

    Ok(Self {
      base,
      config,
      inner: Mutex::new(Inner {
        source,
        size: config.page_size,
        growth_counter: 1,
        free_list,
      }),
    })
  }

  fn payload(
    &self,
    block: Offset,
  ) -> NonNull<u8> {
    // `block` lies inside memory granted by the source.
    unsafe { self.base.add(payload_offset(block)) }
  }

  /// Allocates `size` bytes, rounded up to a multiple of 8.
  ///
  /// Grows the region as many times as needed, stopping with
  /// [`HeapError::OutOfMemory`] when the source refuses. Requests above
  /// [`MAX_REQUEST`] fail before the heap is touched.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size == 0 {
      return Err(HeapError::InvalidSize);
    }

    let aligned = checked_align(size)
      .filter(|&aligned| aligned <= MAX_REQUEST)
      .ok_or(HeapError::OutOfMemory {
        requested: size,
        source: None,
      })?;

    let mut inner = self.inner.lock();
    loop {
      if let Some((prev, block)) = inner.free_list.find_first_fit(aligned) {
        inner.free_list.split(prev, block, aligned);
        let payload = self.payload(block);

        if self.config.log_events {
          trace!("allocate({size}) -> {payload:p} (block {block:#x}, {aligned} bytes)");
        }
        return Ok(payload);
      }

      match inner.grow(self.base, self.config.page_size) {
        Ok(granted) => {
          if self.config.log_events {
            debug!(
              "grew heap by {granted} bytes to {} (next multiplier {})",
              inner.size, inner.growth_counter
            );
          }
        }
        Err(err) => {
          if self.config.log_events {
            warn!("allocate({size}) -> out of memory: {err}");
          }
          return Err(HeapError::OutOfMemory {
            requested: size,
            source: Some(err),
          });
        }
      }
    }
  }

  /// Returns a pointer obtained from [`allocate`](Self::allocate).
  ///
  /// Pointers outside the region, pointers that do not start a payload and
  /// pointers that are already free are rejected with
  /// [`HeapError::InvalidPointer`] and leave the heap untouched.
  pub fn deallocate(
    &self,
    ptr: *mut u8,
  ) -> Result<()> {
    let mut inner = self.inner.lock();

    let Some(block) = inner.locate(self.base, ptr.addr()) else {
      if self.config.log_events {
        warn!("deallocate({ptr:p}) -> rejected");
      }
      return Err(HeapError::InvalidPointer { ptr: ptr.addr() });
    };

    inner.free_list.release(block);
    if self.config.log_events {
      trace!("deallocate({ptr:p}) -> block {:#x} freed", block.offset);
    }
    Ok(())
  }

  /// Payload bytes available behind a live allocation.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Result<usize> {
    self
      .inner
      .lock()
      .locate(self.base, ptr.addr())
      .map(|block| block.size)
      .ok_or(HeapError::InvalidPointer { ptr: ptr.addr() })
  }

  /// Whether `ptr` falls inside the region.
  pub fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    let base = self.base.addr().get();
    let size = self.inner.lock().size;
    (base..base + size).contains(&ptr.addr())
  }

  /// First byte of the region.
  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Current region size in bytes.
  pub fn size(&self) -> usize {
    self.inner.lock().size
  }

  pub fn config(&self) -> HeapConfig {
    self.config
  }

  pub fn stats(&self) -> HeapStats {
    self.inner.lock().stats()
  }

  /// The free list, lowest offset first.
  pub fn free_blocks(&self) -> Vec<FreeBlock> {
    self
      .inner
      .lock()
      .free_list
      .iter()
      .map(|(offset, header)| FreeBlock {
        offset,
        size: header.size,
      })
      .collect()
  }

  /// Checks block tiling, free-list order and coalescing.
  pub fn check_invariants(&self) -> Result<(), Corruption> {
    let inner = self.inner.lock();
    inner.free_list.check(inner.size)
  }
}

impl<S: RegionSource> fmt::Debug for Heap<S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("base", &self.base)
      .field("config", &self.config)
      .field("stats", &self.inner.try_lock().map(|inner| inner.stats()))
      .finish()
  }
}

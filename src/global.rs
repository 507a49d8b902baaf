//! The process-wide heap, backed by the program break.
//!
//! [`initialize`] must succeed once before [`allocate`] and [`deallocate`] do
//! anything; until then they report [`HeapError::Uninitialized`]. A second
//! call to [`initialize`] reports [`HeapError::AlreadyInitialized`] and leaves
//! the running heap alone, so racing initializers are harmless.
//!
//! [`RheapAllocator`] serves Rust's global allocator from the same heap and
//! initializes it on first use:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOC: rheap::RheapAllocator = rheap::RheapAllocator;
//! ```

use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
  sync::OnceLock,
};

use parking_lot::{Mutex, const_mutex};

use crate::{
  align::ALIGNMENT,
  align_to,
  config::HeapConfig,
  error::{HeapError, Result},
  heap::{Heap, HeapStats},
  region::Sbrk,
};

static HEAP: OnceLock<Heap<Sbrk>> = OnceLock::new();
static INIT: Mutex<()> = const_mutex(());

fn heap() -> Result<&'static Heap<Sbrk>> {
  HEAP.get().ok_or(HeapError::Uninitialized)
}

pub fn initialize() -> Result<()> {
  initialize_with(HeapConfig::default())
}

/// Initializes the process heap with `config`.
///
/// When [`RheapAllocator`] is installed, `config.log_events` must be off if
/// the installed logger allocates: the heap lock is not reentrant.
pub fn initialize_with(config: HeapConfig) -> Result<()> {
  let _init = INIT.lock();
  if HEAP.get().is_some() {
    return Err(HeapError::AlreadyInitialized);
  }

  let heap = Heap::initialize(config, Sbrk::new())?;
  HEAP.set(heap).map_err(|_| HeapError::AlreadyInitialized)
}

pub fn allocate(size: usize) -> Result<NonNull<u8>> {
  heap()?.allocate(size)
}

pub fn deallocate(ptr: *mut u8) -> Result<()> {
  heap()?.deallocate(ptr)
}

pub fn stats() -> Result<HeapStats> {
  Ok(heap()?.stats())
}

/// [`GlobalAlloc`] over the process heap.
///
/// Layouts aligned to at most 8 bytes map straight onto
/// [`Heap::allocate`]. Larger alignments over-allocate by `align` bytes and
/// keep the pointer the heap returned in the word just below the one handed
/// out:
///
/// ```text
///   heap payload
///   ┌─────────┬──────────┬─────────────────────────┐
///   │ padding │ raw ptr  │ size bytes (aligned)    │
///   └─────────┴──────────┴─────────────────────────┘
///   ▲                    ▲
///   raw                  returned, multiple of align
/// ```
///
/// If the heap is first touched through this type it is initialized with
/// event logging off, so an allocating logger cannot recurse into it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RheapAllocator;

impl RheapAllocator {
  fn heap() -> Option<&'static Heap<Sbrk>> {
    if let Some(heap) = HEAP.get() {
      return Some(heap);
    }

    match initialize_with(HeapConfig::new().with_logging(false)) {
      Ok(()) | Err(HeapError::AlreadyInitialized) => HEAP.get(),
      Err(_) => None,
    }
  }
}

unsafe impl GlobalAlloc for RheapAllocator {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    let Some(heap) = Self::heap() else {
      return ptr::null_mut();
    };

    if layout.align() <= ALIGNMENT {
      return heap
        .allocate(layout.size().max(1))
        .map_or(ptr::null_mut(), NonNull::as_ptr);
    }

    let Some(padded) = layout.size().checked_add(layout.align()) else {
      return ptr::null_mut();
    };
    let Ok(raw) = heap.allocate(padded) else {
      return ptr::null_mut();
    };

    // `raw` is 8-aligned and `align` a larger power of two, so the gap is
    // between 8 and `align` bytes and `size` bytes still fit behind it.
    let gap = align_to!(raw.addr().get() + ALIGNMENT, layout.align()) - raw.addr().get();
    unsafe {
      let aligned = raw.as_ptr().add(gap);
      aligned.cast::<*mut u8>().sub(1).write(raw.as_ptr());
      aligned
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
  ) {
    let Some(heap) = HEAP.get() else {
      return;
    };

    let raw = if layout.align() <= ALIGNMENT {
      ptr
    } else {
      unsafe { ptr.cast::<*mut u8>().sub(1).read() }
    };

    // GlobalAlloc cannot report a rejected pointer; the heap is left as it was.
    let _ = heap.deallocate(raw);
  }
}

//! # rheap - A First-Fit Heap Allocator
//!
//! This crate provides a thread-safe **first-fit free-list allocator** that
//! manages one contiguous region obtained from the operating system and grows
//! it at the high end when no free block is large enough.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region:
//!
//!   base                                                         base+size
//!   ┌───────┬────┬──────┬────┬─────────┬────┬──────┬────┬───────────────┐
//!   │ state │ H  │ used │ H  │  free   │ H  │ used │ H  │     free      │
//!   └───────┴────┴──────┴────┴─────────┴────┴──────┴────┴───────────────┘
//!                           ▲                          ▲
//!   free list head ─────────┘──────────────────────────┘──► None
//!
//!   Free blocks are linked in address order. Neighbouring free blocks are
//!   merged as soon as the second one is freed.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header and layout constants
//!   ├── config     - Page size configuration
//!   ├── error      - HeapError, RegionError, Corruption
//!   ├── free_list  - Address-ordered free list, split and coalesce
//!   ├── global     - Process-wide heap over sbrk, RheapAllocator (unix)
//!   ├── heap       - Heap: locking, allocation, deallocation, growth
//!   └── region     - RegionSource trait, Sbrk and Reserved sources
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::{Heap, Reserved};
//!
//! let heap = Heap::new(Reserved::new(1 << 20).unwrap()).unwrap();
//!
//! let ptr = heap.allocate(100).unwrap().cast::<u64>();
//! unsafe {
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//! }
//!
//! heap.deallocate(ptr.as_ptr().cast()).unwrap();
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a 16-byte header, stored in the region itself,
//! recording its payload size and whether it is free:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ state: Free{..} │  │  │                          │  │
//!   │  │     / Allocated │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │      16 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Allocation takes the first free block with room for the request *and* one
//! more header, and splits it:
//!
//! ```text
//!   before:  │ H │              free (size S)                 │
//!   after:   │ H │ used (N) │ H │    free (S - N - 16)        │
//! ```
//!
//! When nothing fits, the region grows by `page_size * k` on the k-th growth
//! (4 KiB, 8 KiB, 12 KiB, ...) and the new bytes are added to the last free
//! block, which always touches the end of the region.
//!
//! ## Features
//!
//! - **Thread-safe**: one `parking_lot` mutex serializes all mutations
//! - **Validated frees**: foreign, interior and double frees are rejected
//! - **Bounded coalescing**: at most two neighbour checks per free
//! - **Pluggable memory**: `sbrk` for real use, `Reserved` for tests
//! - **Global allocator**: `RheapAllocator` implements `GlobalAlloc` over the
//!   process heap, padding requests aligned to more than 8 bytes
//!
//! ## Limitations
//!
//! - **No realloc**: allocations cannot be resized
//! - **Never shrinks**: memory is not returned to the OS
//! - **Single lock**: heavy concurrent allocation contends on one mutex, and
//!   region growth happens while it is held
//! - **Not reentrant**: calling into a heap while holding its lock deadlocks

pub mod align;
pub mod block;
pub mod config;
pub mod error;
mod free_list;
#[cfg(unix)]
pub mod global;
pub mod heap;
pub mod region;

pub use config::HeapConfig;
pub use error::{Corruption, HeapError, RegionError};
pub use heap::{FreeBlock, Heap, HeapStats};
#[cfg(unix)]
pub use global::RheapAllocator;
#[cfg(unix)]
pub use region::Sbrk;
pub use region::{RegionSource, Reserved};

use thiserror::Error;

/// Failures reported by a [`RegionSource`](crate::region::RegionSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegionError {
  #[error("the operating system refused to grant {requested} bytes")]
  Refused { requested: usize },
  #[error("region grant landed at {actual:#x}, expected {expected:#x}")]
  Discontiguous { expected: usize, actual: usize },
}

/// Failures reported by the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("could not obtain the initial heap region")]
  InitFailure(#[source] RegionError),
  #[error("zero-byte allocation requested")]
  InvalidSize,
  #[error("out of memory while serving a {requested}-byte request")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: Option<RegionError>,
  },
  #[error("pointer {ptr:#x} was not handed out by this heap or is already free")]
  InvalidPointer { ptr: usize },
  #[error("page size {page_size} is not usable (multiple of 8, at least {minimum} bytes)")]
  InvalidConfig { page_size: usize, minimum: usize },
  #[error("the process heap is already initialized")]
  AlreadyInitialized,
  #[error("the process heap has not been initialized")]
  Uninitialized,
}

/// A broken heap invariant, found by
/// [`Heap::check_invariants`](crate::Heap::check_invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("blocks should end at {expected:#x}, found {found:#x}")]
  Tiling { expected: usize, found: usize },
  #[error("block at {offset:#x} has unaligned size {size}")]
  Misaligned { offset: usize, size: usize },
  #[error("free list links to {offset:#x}, which is not a free header")]
  Dangling { offset: usize },
  #[error("free list is out of address order at {prev:#x} -> {next:#x}")]
  Unordered { prev: usize, next: usize },
  #[error("free blocks at {offset:#x} and {next:#x} are adjacent")]
  Uncoalesced { offset: usize, next: usize },
  #[error("free block at {offset:#x} is missing from the free list")]
  Unlisted { offset: usize },
  #[error("last free block ends at {end:#x}, region ends at {region_end:#x}")]
  DetachedTail { end: usize, region_end: usize },
}

pub type Result<T, E = HeapError> = std::result::Result<T, E>;

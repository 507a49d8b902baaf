use std::num::NonZeroU64;

/// Byte offset from the heap region base. Blocks are identified by the offset
/// of their header.
pub type Offset = usize;

/// Bytes every header occupies in front of its payload.
pub const HEADER_SIZE: usize = 16;

/// Bytes reserved at the base of the region for allocator state.
pub const STATE_SIZE: usize = 48;

/// Whether a block sits on the free list or is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  /// On the free list; `next` is the following free header, if any.
  Free { next: Option<Offset> },
  Allocated,
}

/// Metadata for one block in the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  /// Payload bytes, always a multiple of [`ALIGNMENT`](crate::align::ALIGNMENT).
  pub size: usize,
  pub state: BlockState,
}

impl Header {
  pub fn free(
    size: usize,
    next: Option<Offset>,
  ) -> Self {
    Self {
      size,
      state: BlockState::Free { next },
    }
  }

  pub fn allocated(size: usize) -> Self {
    Self {
      size,
      state: BlockState::Allocated,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self.state, BlockState::Free { .. })
  }

  /// Successor on the free list. `None` for the tail and for allocated blocks.
  pub fn next(&self) -> Option<Offset> {
    match self.state {
      BlockState::Free { next } => next,
      BlockState::Allocated => None,
    }
  }
}

/// Low bit of [`RawHeader::tagged_size`]; sizes are multiples of 8, so it is
/// otherwise always clear.
const ALLOCATED_BIT: u64 = 1;

/// A [`Header`] as stored in the region, `HEADER_SIZE` bytes in front of the
/// payload.
///
/// ```text
///   ┌──────────────────────────┬──────────────────────────┐
///   │ tagged_size: u64         │ next: Option<NonZeroU64> │
///   │ (size | allocated bit)   │ (0 = end of list)        │
///   └──────────────────────────┴──────────────────────────┘
/// ```
///
/// Offset 0 is never a header (it lies in the state reservation), so it can
/// stand for "no successor".
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
  tagged_size: u64,
  next: Option<NonZeroU64>,
}
const _: () = assert!(size_of::<RawHeader>() == HEADER_SIZE);
const _: () = assert!(align_of::<RawHeader>() <= crate::align::ALIGNMENT);

impl From<Header> for RawHeader {
  fn from(header: Header) -> Self {
    let size = header.size as u64;
    match header.state {
      BlockState::Free { next } => Self {
        tagged_size: size,
        next: next.and_then(|offset| NonZeroU64::new(offset as u64)),
      },
      BlockState::Allocated => Self {
        tagged_size: size | ALLOCATED_BIT,
        next: None,
      },
    }
  }
}

impl From<RawHeader> for Header {
  fn from(raw: RawHeader) -> Self {
    let size = (raw.tagged_size & !ALLOCATED_BIT) as usize;
    if raw.tagged_size & ALLOCATED_BIT != 0 {
      Header::allocated(size)
    } else {
      Header::free(size, raw.next.map(|offset| offset.get() as usize))
    }
  }
}

/// Offset of the payload belonging to the header at `header`.
pub const fn payload_offset(header: Offset) -> Offset {
  header + HEADER_SIZE
}

/// Offset one past the end of the block at `header` with `size` payload bytes.
pub const fn block_end(
  header: Offset,
  size: usize,
) -> Offset {
  header + HEADER_SIZE + size
}

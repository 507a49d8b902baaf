//! Address-ordered free list over the heap region.
//!
//! Every block, free or allocated, starts with a header stored in the region
//! itself. Free headers are threaded into a singly linked list through
//! [`BlockState::Free`], sorted by offset:
//!
//! ```text
//!   offset:  48         168          336        600             end
//!            ┌──────────┬────────────┬──────────┬───────────────┐
//!   region:  │ H │ free │ H │  used  │ H │ free │ H │   free    │
//!            └──────────┴────────────┴──────────┴───────────────┘
//!              │                       ▲ │        ▲
//!   head ──────┘───────────────────────┘ └────────┘
//! ```
//!
//! The last block in the region is always free (its payload may be empty), so
//! the tail of the list always touches the end of the region and growth can
//! simply lengthen it.

use std::ptr::NonNull;

use crate::{
  align::ALIGNMENT,
  block::{BlockState, HEADER_SIZE, Header, Offset, RawHeader, STATE_SIZE, block_end},
  error::Corruption,
};

/// An allocated block found by [`FreeList::find_allocated`], with the free
/// block that will precede it once it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocated {
  pub offset: Offset,
  pub size: usize,
  pub prev: Option<Offset>,
}

pub struct FreeList {
  base: NonNull<u8>,
  head: Option<Offset>,
}

impl FreeList {
  /// Lays one free block at `first` with `size` payload bytes and makes it
  /// the whole list.
  ///
  /// # Safety
  ///
  /// `base` must be aligned to [`ALIGNMENT`], and `base..base + first +
  /// HEADER_SIZE + size` must be writable memory that nothing else uses for as
  /// long as the list lives. Every offset later handed to the list (through
  /// growth) must stay inside memory with the same guarantee.
  pub unsafe fn new(
    base: NonNull<u8>,
    first: Offset,
    size: usize,
  ) -> Self {
    let mut list = Self {
      base,
      head: Some(first),
    };
    list.write(first, Header::free(size, None));
    list
  }

  fn slot(
    &self,
    offset: Offset,
  ) -> NonNull<RawHeader> {
    // Offsets only come from the list itself, which keeps them in the region.
    unsafe { self.base.add(offset) }.cast()
  }

  fn header(
    &self,
    offset: Offset,
  ) -> Header {
    unsafe { self.slot(offset).read() }.into()
  }

  fn write(
    &mut self,
    offset: Offset,
    header: Header,
  ) {
    unsafe { self.slot(offset).write(header.into()) }
  }

  /// Points `prev` (or the head when `prev` is `None`) at `next`.
  fn link(
    &mut self,
    prev: Option<Offset>,
    next: Option<Offset>,
  ) {
    match prev {
      Some(prev) => {
        let size = self.header(prev).size;
        self.write(prev, Header::free(size, next));
      }
      None => self.head = next,
    }
  }

  /// Walks the free blocks in address order.
  pub fn iter(&self) -> Iter<'_> {
    Iter {
      list: self,
      current: self.head,
    }
  }

  /// Finds the first free block able to host `size` payload bytes plus the
  /// header of the remainder left behind by a split.
  ///
  /// Returns the block together with its predecessor on the list.
  pub fn find_first_fit(
    &self,
    size: usize,
  ) -> Option<(Option<Offset>, Offset)> {
    let needed = size.checked_add(HEADER_SIZE)?;
    let mut prev = None;

    for (offset, header) in self.iter() {
      if header.size >= needed {
        return Some((prev, offset));
      }
      prev = Some(offset);
    }

    None
  }

  /// Hands out the first `size` bytes of the free block at `block`.
  ///
  /// The tail of the block becomes a new free header that takes the block's
  /// place on the list. `prev` must be the block's predecessor as returned by
  /// [`find_first_fit`](Self::find_first_fit).
  pub fn split(
    &mut self,
    prev: Option<Offset>,
    block: Offset,
    size: usize,
  ) {
    let header = self.header(block);
    debug_assert!(header.is_free(), "split of allocated block {block:#x}");
    debug_assert!(header.size >= size + HEADER_SIZE, "block {block:#x} too small");

    let remainder = block_end(block, size);
    let remainder_size = header.size - size - HEADER_SIZE;

    self.write(remainder, Header::free(remainder_size, header.next()));
    self.link(prev, Some(remainder));
    self.write(block, Header::allocated(size));
  }

  /// Finds the allocated block whose header sits at `offset`.
  ///
  /// The free list is walked up to the last free block below `offset`; from
  /// there the allocated blocks in between are stepped over by size, so only
  /// real header positions are accepted. `offset` must lie inside the region.
  pub fn find_allocated(
    &self,
    offset: Offset,
  ) -> Option<Allocated> {
    let mut prev = None;
    let mut cursor = STATE_SIZE;

    for (free, header) in self.iter() {
      if free >= offset {
        if free == offset {
          return None;
        }
        break;
      }
      prev = Some(free);
      cursor = block_end(free, header.size);
    }

    while cursor < offset {
      cursor = block_end(cursor, self.header(cursor).size);
    }
    if cursor != offset {
      return None;
    }

    let header = self.header(offset);
    match header.state {
      BlockState::Allocated => Some(Allocated {
        offset,
        size: header.size,
        prev,
      }),
      BlockState::Free { .. } => None,
    }
  }

  /// Returns a block found by [`find_allocated`](Self::find_allocated) to the
  /// list.
  ///
  /// At most two adjacency checks are made: the block against its successor,
  /// and its predecessor against the block.
  pub fn release(
    &mut self,
    block: Allocated,
  ) {
    let next = match block.prev {
      Some(prev) => self.header(prev).next(),
      None => self.head,
    };

    self.write(block.offset, Header::free(block.size, next));
    self.link(block.prev, Some(block.offset));

    self.coalesce(block.offset);
    if let Some(prev) = block.prev {
      self.coalesce(prev);
    }
  }

  /// Merges the free block at `offset` with its list successor when the two
  /// touch. The successor's header becomes part of the merged payload.
  pub fn coalesce(
    &mut self,
    offset: Offset,
  ) -> bool {
    let header = self.header(offset);
    let Some(next) = header.next() else {
      return false;
    };
    if block_end(offset, header.size) != next {
      return false;
    }

    let absorbed = self.header(next);
    let merged = header.size + HEADER_SIZE + absorbed.size;
    self.write(offset, Header::free(merged, absorbed.next()));
    true
  }

  /// Last block on the list.
  pub fn tail(&self) -> Option<Offset> {
    self.iter().last().map(|(offset, _)| offset)
  }

  /// Lengthens the last free block by `bytes`, returning it.
  ///
  /// The caller must already own the `bytes` following the region.
  pub fn extend_tail(
    &mut self,
    bytes: usize,
  ) -> Option<Offset> {
    let tail = self.tail()?;
    let header = self.header(tail);
    self.write(tail, Header::free(header.size + bytes, header.next()));
    Some(tail)
  }

  /// `(count, payload bytes)` of allocated blocks in a region of
  /// `region_size` bytes.
  pub fn allocated_totals(
    &self,
    region_size: usize,
  ) -> (usize, usize) {
    let mut totals = (0, 0);
    let mut cursor = STATE_SIZE;

    while cursor < region_size {
      let header = self.header(cursor);
      if !header.is_free() {
        totals = (totals.0 + 1, totals.1 + header.size);
      }
      cursor = block_end(cursor, header.size);
    }

    totals
  }

  /// `(count, payload bytes)` of free blocks.
  pub fn free_totals(&self) -> (usize, usize) {
    self
      .iter()
      .fold((0, 0), |(count, bytes), (_, header)| (count + 1, bytes + header.size))
  }

  /// Verifies the structure against a region of `region_size` bytes.
  ///
  /// Blocks are stepped through by size from the first header; the free list
  /// must visit exactly the free ones, in the same order.
  pub fn check(
    &self,
    region_size: usize,
  ) -> Result<(), Corruption> {
    let mut cursor = STATE_SIZE;
    let mut expected_free = self.head;
    let mut prev_free = None;
    let mut last_free_end = None;

    while cursor < region_size {
      if cursor + HEADER_SIZE > region_size {
        return Err(Corruption::Tiling {
          expected: region_size,
          found: cursor + HEADER_SIZE,
        });
      }

      let header = self.header(cursor);
      if header.size % ALIGNMENT != 0 {
        return Err(Corruption::Misaligned {
          offset: cursor,
          size: header.size,
        });
      }

      if header.is_free() {
        match expected_free {
          Some(expected) if expected == cursor => {}
          Some(expected) if expected < cursor => {
            return Err(Corruption::Dangling { offset: expected });
          }
          _ => return Err(Corruption::Unlisted { offset: cursor }),
        }
        if let Some(prev) = prev_free {
          return Err(Corruption::Uncoalesced {
            offset: prev,
            next: cursor,
          });
        }
        if let Some(next) = header.next().filter(|&next| next <= cursor) {
          return Err(Corruption::Unordered { prev: cursor, next });
        }

        expected_free = header.next();
        prev_free = Some(cursor);
        last_free_end = Some(block_end(cursor, header.size));
      } else {
        if let Some(expected) = expected_free.filter(|&expected| expected <= cursor) {
          return Err(Corruption::Dangling { offset: expected });
        }
        prev_free = None;
        last_free_end = None;
      }

      cursor = match cursor.checked_add(HEADER_SIZE + header.size) {
        Some(end) => end,
        None => {
          return Err(Corruption::Tiling {
            expected: region_size,
            found: usize::MAX,
          });
        }
      };
    }

    if cursor != region_size {
      return Err(Corruption::Tiling {
        expected: region_size,
        found: cursor,
      });
    }
    if let Some(offset) = expected_free {
      return Err(Corruption::Dangling { offset });
    }
    match last_free_end {
      Some(_) => Ok(()),
      None => Err(Corruption::DetachedTail {
        end: self.tail().map_or(STATE_SIZE, |tail| block_end(tail, self.header(tail).size)),
        region_end: region_size,
      }),
    }
  }
}

/// Iterator over free blocks, lowest offset first.
pub struct Iter<'a> {
  list: &'a FreeList,
  current: Option<Offset>,
}

impl Iterator for Iter<'_> {
  type Item = (Offset, Header);

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.current?;
    let header = self.list.header(offset);
    self.current = header.next();
    Some((offset, header))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const REGION: usize = 4096;
  const FIRST_SIZE: usize = REGION - STATE_SIZE - HEADER_SIZE;

  /// A list whose region is the first `region` bytes of a `capacity`-byte
  /// buffer. The buffer is returned so it outlives the list.
  fn fresh_within(
    capacity: usize,
    region: usize,
  ) -> (Vec<u64>, FreeList) {
    let mut memory = vec![0u64; capacity / 8];
    let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
    let list = unsafe { FreeList::new(base, STATE_SIZE, region - STATE_SIZE - HEADER_SIZE) };
    (memory, list)
  }

  fn fresh(region: usize) -> (Vec<u64>, FreeList) {
    fresh_within(region, region)
  }

  fn take(
    list: &mut FreeList,
    size: usize,
  ) -> Offset {
    let (prev, block) = list.find_first_fit(size).unwrap();
    list.split(prev, block, size);
    block
  }

  fn give_back(
    list: &mut FreeList,
    offset: Offset,
  ) {
    let block = list.find_allocated(offset).unwrap();
    list.release(block);
  }

  fn free_sizes(list: &FreeList) -> Vec<(Offset, usize)> {
    list.iter().map(|(offset, header)| (offset, header.size)).collect()
  }

  #[test]
  fn test_split_leaves_remainder_at_head() {
    let (_memory, mut list) = fresh(REGION);
    let block = take(&mut list, 104);

    assert_eq!(block, STATE_SIZE);
    assert_eq!(list.header(block), Header::allocated(104));
    assert_eq!(free_sizes(&list), vec![(168, FIRST_SIZE - 104 - HEADER_SIZE)]);
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_first_fit_needs_room_for_remainder_header() {
    let (_memory, mut list) = fresh(REGION);

    assert!(list.find_first_fit(FIRST_SIZE - HEADER_SIZE).is_some());
    assert!(list.find_first_fit(FIRST_SIZE - HEADER_SIZE + ALIGNMENT).is_none());
    assert!(list.find_first_fit(usize::MAX - 8).is_none());

    take(&mut list, FIRST_SIZE - HEADER_SIZE);
    assert_eq!(free_sizes(&list), vec![(REGION - HEADER_SIZE, 0)]);
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_first_fit_picks_lowest_address() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let _b = take(&mut list, 64);
    let c = take(&mut list, 256);
    let _d = take(&mut list, 64);

    give_back(&mut list, c);
    give_back(&mut list, a);

    let (prev, block) = list.find_first_fit(32).unwrap();
    assert_eq!((prev, block), (None, a));

    let (prev, block) = list.find_first_fit(128).unwrap();
    assert_eq!((prev, block), (Some(a), c));
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_split_relinks_predecessor() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let _b = take(&mut list, 64);
    let c = take(&mut list, 256);
    let _d = take(&mut list, 64);
    give_back(&mut list, a);
    give_back(&mut list, c);

    let block = take(&mut list, 128);
    assert_eq!(block, c);
    assert_eq!(list.header(a).next(), Some(block_end(c, 128)));
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_find_allocated_accepts_only_live_headers() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let b = take(&mut list, 64);
    let c = take(&mut list, 64);
    give_back(&mut list, a);

    assert_eq!(
      list.find_allocated(c),
      Some(Allocated {
        offset: c,
        size: 64,
        prev: Some(a)
      })
    );
    assert_eq!(list.find_allocated(b).map(|block| block.prev), Some(Some(a)));
    assert_eq!(list.find_allocated(a), None);
    assert_eq!(list.find_allocated(b + 8), None);
    assert_eq!(list.find_allocated(STATE_SIZE + 24), None);
  }

  #[test]
  fn test_absorbed_header_is_not_found_again() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let b = take(&mut list, 64);
    let _c = take(&mut list, 64);

    give_back(&mut list, b);
    give_back(&mut list, a);

    assert_eq!(list.find_allocated(b), None);
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_release_before_head_coalesces_forward() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);

    give_back(&mut list, a);

    assert_eq!(free_sizes(&list), vec![(STATE_SIZE, FIRST_SIZE)]);
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_coalescing_is_order_independent() {
    for order in [[0, 1], [1, 0]] {
      let (_memory, mut list) = fresh(REGION);
      let blocks = [take(&mut list, 64), take(&mut list, 128)];
      let _guard = take(&mut list, 32);

      for i in order {
        give_back(&mut list, blocks[i]);
      }

      assert_eq!(list.header(blocks[0]).size, 64 + 128 + HEADER_SIZE);
      assert_eq!(list.free_totals().0, 2);
      list.check(REGION).unwrap();
    }
  }

  #[test]
  fn test_release_between_merges_both_sides() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let b = take(&mut list, 64);
    let c = take(&mut list, 64);
    let _d = take(&mut list, 64);

    give_back(&mut list, a);
    give_back(&mut list, c);
    assert_eq!(list.free_totals().0, 3);

    give_back(&mut list, b);
    assert_eq!(list.free_totals().0, 2);
    assert_eq!(list.header(a).size, 3 * 64 + 2 * HEADER_SIZE);
    list.check(REGION).unwrap();
  }

  #[test]
  fn test_extend_tail_grows_last_block() {
    let (_memory, mut list) = fresh_within(REGION * 2, REGION);
    let a = take(&mut list, 64);
    let _b = take(&mut list, 64);
    give_back(&mut list, a);

    let tail = list.extend_tail(REGION).unwrap();
    assert_eq!(Some(tail), list.tail());
    assert_ne!(tail, a);
    list.check(REGION * 2).unwrap();
  }

  #[test]
  fn test_totals() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let _b = take(&mut list, 128);
    give_back(&mut list, a);

    assert_eq!(list.allocated_totals(REGION), (1, 128));
    assert_eq!(list.free_totals(), (2, 64 + FIRST_SIZE - 64 - 128 - 2 * HEADER_SIZE));
  }

  #[test]
  fn test_check_detects_uncoalesced_neighbours() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let b = take(&mut list, 64);
    let _c = take(&mut list, 64);

    let rest = list.head;
    list.write(a, Header::free(64, Some(b)));
    list.write(b, Header::free(64, rest));
    list.head = Some(a);

    assert_eq!(
      list.check(REGION),
      Err(Corruption::Uncoalesced { offset: a, next: b })
    );
  }

  #[test]
  fn test_check_detects_unlisted_free_block() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let _b = take(&mut list, 64);

    list.write(a, Header::free(64, None));

    assert_eq!(list.check(REGION), Err(Corruption::Unlisted { offset: a }));
  }

  #[test]
  fn test_check_detects_link_into_payload() {
    let (_memory, mut list) = fresh(REGION);
    let a = take(&mut list, 64);
    let b = take(&mut list, 64);
    give_back(&mut list, a);

    list.write(a, Header::free(64, Some(b + 8)));

    assert_eq!(list.check(REGION), Err(Corruption::Dangling { offset: b + 8 }));
  }
}

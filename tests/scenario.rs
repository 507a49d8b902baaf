use rheap::{
  FreeBlock, Heap, HeapConfig, Reserved,
  block::{HEADER_SIZE, STATE_SIZE},
};

const PAGE: usize = 4096;

fn heap() -> Heap<Reserved> {
  Heap::new(Reserved::new(1 << 20).unwrap()).unwrap()
}

/// Free payload available right after `growths` growths of a fresh heap.
fn free_after(growths: usize) -> usize {
  PAGE - STATE_SIZE - HEADER_SIZE + PAGE * growths * (growths + 1) / 2
}

#[test]
fn test_page_walkthrough() {
  let heap = heap();
  let base = heap.base().addr().get();

  let p1 = heap.allocate(100).unwrap();
  assert_eq!(p1.addr().get() - base, STATE_SIZE + HEADER_SIZE);
  assert_eq!(
    heap.free_blocks(),
    vec![FreeBlock {
      offset: STATE_SIZE + HEADER_SIZE + 104,
      size: PAGE - STATE_SIZE - 2 * HEADER_SIZE - 104,
    }]
  );

  heap.deallocate(p1.as_ptr()).unwrap();
  assert_eq!(
    heap.free_blocks(),
    vec![FreeBlock {
      offset: STATE_SIZE,
      size: PAGE - STATE_SIZE - HEADER_SIZE,
    }]
  );

  let p2 = heap.allocate(100).unwrap();
  assert_eq!(p2, p1);

  let before = heap.stats();
  let big = heap.allocate(5000).unwrap();
  let after = heap.stats();

  assert_eq!(after.growths, before.growths + 1);
  assert_eq!(after.heap_size, before.heap_size + PAGE);
  assert!(big.addr().get() + 5000 <= base + after.heap_size);
  heap.check_invariants().unwrap();
}

#[test]
fn test_growth_schedule_is_linear() {
  for k in 1..=6 {
    let heap = heap();
    let request = free_after(k - 1) - HEADER_SIZE + 8;

    heap.allocate(request).unwrap();

    let stats = heap.stats();
    assert_eq!(stats.growths, k, "request of {request} bytes");
    assert_eq!(stats.growth_counter, k + 1);
    assert_eq!(stats.heap_size, PAGE + PAGE * k * (k + 1) / 2);
    heap.check_invariants().unwrap();
  }
}

#[test]
fn test_growth_extends_last_free_block() {
  let heap = heap();
  let a = heap.allocate(64).unwrap();
  let _b = heap.allocate(64).unwrap();
  heap.deallocate(a.as_ptr()).unwrap();

  let tail_before = *heap.free_blocks().last().unwrap();
  heap.allocate(PAGE).unwrap();

  let blocks = heap.free_blocks();
  assert_eq!(blocks[0].offset, STATE_SIZE);
  assert_eq!(blocks.len(), 2);
  assert_eq!(
    blocks[1].offset,
    tail_before.offset + HEADER_SIZE + PAGE
  );
  heap.check_invariants().unwrap();
}

#[test]
fn test_custom_page_size_drives_growth() {
  let config = HeapConfig::new().with_page_size(256);
  let heap = Heap::initialize(config, Reserved::new(1 << 16).unwrap()).unwrap();

  assert_eq!(heap.size(), 256);
  heap.allocate(300).unwrap();

  let stats = heap.stats();
  assert_eq!(stats.growths, 2);
  assert_eq!(stats.heap_size, 256 + 256 + 512);
}

#[test]
fn test_out_of_memory_then_recovery() {
  let heap = Heap::new(Reserved::new(PAGE * 2).unwrap()).unwrap();

  let first = heap.allocate(3000).unwrap();
  assert!(heap.allocate(3000).is_ok());
  assert!(heap.allocate(3000).is_err());

  heap.deallocate(first.as_ptr()).unwrap();
  assert_eq!(heap.allocate(3000).unwrap(), first);
  heap.check_invariants().unwrap();
}

use std::{io::Read, ptr::NonNull};

use rheap::{Heap, Sbrk};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `gdb`,
/// or just visually track how the program break moves as the heap grows.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    Sbrk::program_break(),
  );
}

fn print_alloc(
  heap: &Heap<Sbrk>,
  size: usize,
  ptr: NonNull<u8>,
) {
  let stats = heap.stats();
  println!(
    "Allocated {} bytes at offset {:#x}, heap size = {}, growths = {}",
    size,
    ptr.addr().get() - heap.base().addr().get(),
    stats.heap_size,
    stats.growths,
  );
}

fn print_free_list(heap: &Heap<Sbrk>) {
  for block in heap.free_blocks() {
    println!("    free block at {:#x}: {} bytes", block.offset, block.size);
  }
}

fn main() {
  print_program_break("start");
  let heap = match Heap::new(Sbrk::new()) {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("could not initialize heap: {err}");
      return;
    }
  };
  print_program_break("after initialize");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes. The request is rounded up to 104 and carved from
  //    the front of the only free block.
  // --------------------------------------------------------------------
  let Ok(first) = heap.allocate(100) else {
    return;
  };
  println!("\n[1] Allocate 100 bytes");
  print_alloc(&heap, 100, first);
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate a u64 right behind it.
  // --------------------------------------------------------------------
  let Ok(second) = heap.allocate(size_of::<u64>()) else {
    return;
  };
  unsafe { second.cast::<u64>().write(0x1122334455667788) };
  println!("\n[2] Allocate u64, value = {:#X}", unsafe {
    second.cast::<u64>().read()
  });
  print_alloc(&heap, size_of::<u64>(), second);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block. It becomes the new head of the free list.
  // --------------------------------------------------------------------
  if let Err(err) = heap.deallocate(first.as_ptr()) {
    eprintln!("[3] deallocate failed: {err}");
  }
  println!("\n[3] Deallocated first block");
  print_free_list(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate a smaller block: first fit hands back the same address.
  // --------------------------------------------------------------------
  let Ok(third) = heap.allocate(32) else {
    return;
  };
  println!("\n[4] Allocate 32 bytes (check reuse of freed block)");
  print_alloc(&heap, 32, third);
  println!(
    "[4] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Allocate 64 KiB to force several growths of 4, 8, 12, ... KiB.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let Ok(big) = heap.allocate(64 * 1024) else {
    eprintln!("[5] out of memory");
    return;
  };
  println!("\n[5] Allocate 64 KiB");
  print_alloc(&heap, 64 * 1024, big);
  print_program_break("after large alloc");

  // --------------------------------------------------------------------
  // 6) Double frees are caught.
  // --------------------------------------------------------------------
  if let Err(err) = heap.deallocate(big.as_ptr()) {
    eprintln!("[6] deallocate failed: {err}");
  }
  match heap.deallocate(big.as_ptr()) {
    Ok(()) => println!("\n[6] second free unexpectedly accepted"),
    Err(err) => println!("\n[6] second free rejected: {err}"),
  }

  println!("\n[7] End of example. The program break is never lowered; the OS reclaims it at exit.");
}

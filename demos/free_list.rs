use std::io::Read;
use std::{ptr, slice};

use fallocator::{FreeListAllocator, OutOfMemory};
use log::{Level, LevelFilter, Metadata, Record};

/// Size of the demo heap: 64 KiB, obtained from the OS below.
const HEAP_SIZE: usize = 64 * 1024;

/// Minimal logger so the allocator's trace output is visible on stderr.
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
  fn enabled(
    &self,
    metadata: &Metadata,
  ) -> bool {
    metadata.level() <= Level::Trace
  }

  fn log(
    &self,
    record: &Record,
  ) {
    if self.enabled(record.metadata()) {
      eprintln!("[{}] {}", record.level(), record.args());
    }
  }

  fn flush(&self) {}
}

/// Waits until the user presses ENTER.
/// Useful when you want to follow the free-list dumps step by step.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the free blocks in address order plus the pool totals.
fn print_free_list(allocator: &FreeListAllocator<'_>) {
  println!(
    "free pool: {} of {} bytes in {} block(s)",
    allocator.free_bytes(),
    allocator.heap_size(),
    allocator.free_blocks().len(),
  );
  for (offset, size) in allocator.free_blocks() {
    println!("  free block at {:#07x}, {} bytes", offset, size);
  }
}

/// Maps an anonymous read-write region to serve as the backing buffer. The
/// allocator itself never talks to the OS; the host hands it this buffer
/// once and keeps ownership.
fn map_heap_buffer() -> &'static mut [u8] {
  unsafe {
    let address = libc::mmap(
      ptr::null_mut(),
      HEAP_SIZE,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    );
    assert!(address != libc::MAP_FAILED, "mmap failed");

    slice::from_raw_parts_mut(address as *mut u8, HEAP_SIZE)
  }
}

fn main() {
  log::set_logger(&LOGGER).expect("logger already installed");
  log::set_max_level(LevelFilter::Trace);

  let heap = map_heap_buffer();
  let mut allocator = FreeListAllocator::new(heap);

  println!("Fixed heap of {} bytes mapped and initialized.", HEAP_SIZE);
  print_free_list(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 26 bytes. With the 4-byte header this rounds to one
  //    64-byte block carved off the front of the heap.
  // --------------------------------------------------------------------
  let first = allocator.allocate(26).unwrap();
  println!("\n[1] allocate(26) -> offset {:#x}", first);
  allocator.payload_mut(first)[..26].copy_from_slice(b"the quick brown fox jumps ");
  print_free_list(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 200 zeroed bytes and verify the fill.
  // --------------------------------------------------------------------
  let second = allocator.zeroed_allocate(200).unwrap();
  println!("\n[2] zeroed_allocate(200) -> offset {:#x}", second);
  println!(
    "[2] payload all zero: {}",
    allocator.payload(second).iter().all(|&byte| byte == 0)
  );
  print_free_list(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Grow the first allocation. The block takes a round trip through
  //    the free list; the payload must survive it.
  // --------------------------------------------------------------------
  let grown = allocator.reallocate(first, 100).unwrap();
  println!("\n[3] reallocate(first, 100) -> offset {:#x}", grown);
  println!(
    "[3] payload preserved: {}",
    &allocator.payload(grown)[..26] == b"the quick brown fox jumps "
  );
  print_free_list(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Free everything. Watch the neighbors merge back into a single
  //    spanning block.
  // --------------------------------------------------------------------
  allocator.deallocate(second);
  println!("\n[4] deallocate(second)");
  print_free_list(&allocator);

  allocator.clear_and_deallocate(grown);
  println!("\n[4] clear_and_deallocate(grown)");
  print_free_list(&allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Exhaust the heap: a request larger than the buffer fails cleanly
  //    and leaves the heap exactly as it was.
  // --------------------------------------------------------------------
  match allocator.allocate(HEAP_SIZE) {
    Err(OutOfMemory) => println!("\n[5] allocate({}) -> OutOfMemory, heap unchanged", HEAP_SIZE),
    Ok(offset) => unreachable!("request cannot fit, got offset {:#x}", offset),
  }
  print_free_list(&allocator);
  allocator.check_invariants();

  println!("\n[6] End of example. The mapping is reclaimed when the process exits.");
}

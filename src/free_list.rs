//! # Free-List Allocator
//!
//! A best-fit allocator over a single fixed-size byte buffer supplied by the
//! host. All bookkeeping lives inside the buffer; the allocator itself only
//! holds the buffer borrow, the heap size, and the free-list head.
//!
//! ## Overview
//!
//! The buffer is partitioned into variably-sized blocks. Every block starts
//! with a 4-byte size field; free blocks additionally carry four link
//! fields (the 20-byte header described in `block.rs`) that thread them
//! into **two** doubly-linked lists at once:
//!
//! ```text
//!                 FREE_LIST_HEAD
//!                       │
//!          address      ▼      address                address
//!         ┌────────►┌────────┐◄────────┐          ┌────────────┐
//!   NEXT/ │         │ free   │         │          │ free       │
//!   PREV  │         │ @ 0x40 │─────────┼─────────►│ @ 0x400    │──► NIL
//!         │         │ 128 B  │         │          │ 832 B      │
//!         │         └────────┘         │          └────────────┘
//!         │           ▲    │ SMALLER/LARGER             ▲
//!         │           │    └────────────────────────────┘
//!         ▼           │   (same blocks, ordered by size)
//! ```
//!
//! - **NEXT / PREV** enumerate the free blocks in strictly increasing
//!   address order, starting at the head.
//! - **SMALLER / LARGER** thread the same blocks in non-decreasing size
//!   order, so the best-fit search can walk toward a fitting size instead
//!   of scanning every block.
//!
//! Allocated blocks keep only the size field; their identity is the payload
//! pointer (`block + 4`) handed to the caller, and the size field behind it
//! is how [`FreeListAllocator::deallocate`] recovers the block.
//!
//! ## Allocation
//!
//! ```text
//!   STEP 1: round the request      size = align!(requested + 4)
//!   STEP 2: best-fit search        smallest free block with size >= size
//!   STEP 3: exact fit?             unlink the block, done
//!           larger?                split: prefix is allocated, the tail
//!                                  re-enters the free list as its own block
//!   STEP 4: hand out block + 4
//! ```
//!
//! ## Deallocation
//!
//! The freed block is inserted back into both orderings, then a sweep walks
//! the address list and merges every pair of blocks that touch:
//!
//! ```text
//!   before:  │ free 64 │ USED 128 │ free 192 │   free(used)
//!   after:   │            free 384           │
//! ```
//!
//! The sweep re-examines a merged block before advancing, so chains of
//! adjacent free blocks collapse in a single pass and no two free neighbors
//! ever survive a public call.
//!
//! ## Reallocation
//!
//! Reallocation reuses the allocator's own machinery: free the block, let
//! the sweep merge it with its neighbors, then allocate the new size. The
//! first 16 payload bytes are captured up front because the free-list links
//! overwrite exactly that window, and the tail copy is clamped to the
//! smaller of the two payloads. If the allocation step fails, the old block
//! is carved back out of the free region that swallowed it, so the caller's
//! pointer stays valid either way.
//!
//! ## Trade-offs
//!
//! - **Best fit** keeps large blocks intact for large requests at the cost
//!   of a size-list walk per allocation.
//! - **Eager coalescing** bounds external fragmentation without a separate
//!   compaction phase; the sweep cost is linear in the free-block count.
//! - **In-band metadata** needs no auxiliary storage, but a caller that
//!   writes past its payload corrupts the heap structure. The allocator
//!   does not detect that; see [`FreeListAllocator::deallocate`].
//!
//! ## Thread Safety
//!
//! The allocator is **single-threaded** by design: no locks, no interior
//! mutability. Callers that need shared access wrap it in
//! [`crate::LockedAllocator`].

use std::{error, fmt};

use crate::align;
use crate::block::{
  BLOCK_QUANTUM, FREE_HEADER_SIZE, HEADER_SIZE, HEAP_OFFSET, LARGER, NEXT, NIL, PREV, QUANTUM_MASK,
  SIZE, SMALLER,
};

/// Number of payload bytes clobbered by the free-block link fields.
const LINK_BYTES: u32 = FREE_HEADER_SIZE - HEADER_SIZE;

/// The only failure the allocator produces: no free block is large enough
/// to satisfy the request. The heap is left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "no free block can satisfy the request")
  }
}

impl error::Error for OutOfMemory {}

/// A best-fit free-list allocator over a host-supplied buffer.
///
/// The allocator bundles the backing buffer with the two scalars that make
/// up its mutable state, so independent heaps can coexist:
///
/// * `heap_size` - total heap bytes, fixed at construction.
/// * `free_list_head` - offset of the lowest-address free block, or
///   [`NIL`](crate::NIL) when the heap is fully allocated.
///
/// All "pointers" taken and returned by the public API are `u32` byte
/// offsets into the backing buffer, which keeps the whole structure
/// relocatable with the buffer.
///
/// # Thread Safety
///
/// This allocator is **NOT** thread-safe. For multi-threaded usage wrap it
/// in [`crate::LockedAllocator`] (or any external mutex).
pub struct FreeListAllocator<'a> {
  /// The backing buffer. Blocks, headers and payloads all live here.
  heap: &'a mut [u8],

  /// Total size of the heap in bytes, established once at construction.
  heap_size: u32,

  /// Offset of the first free block in address order, or `NIL`.
  free_list_head: u32,
}

impl<'a> FreeListAllocator<'a> {
  /// Creates an allocator over `heap` and initializes it as one spanning
  /// free block.
  ///
  /// # Panics
  ///
  /// Panics if the usable buffer length is not a nonzero multiple of
  /// [`BLOCK_QUANTUM`](crate::BLOCK_QUANTUM), or if it is too large for
  /// 32-bit offsets.
  pub fn new(heap: &'a mut [u8]) -> Self {
    let usable = heap.len().saturating_sub(HEAP_OFFSET as usize);

    assert!(
      usable >= BLOCK_QUANTUM as usize,
      "heap buffer too small: {} usable bytes, need at least {}",
      usable,
      BLOCK_QUANTUM
    );
    assert_eq!(
      usable & QUANTUM_MASK as usize,
      0,
      "heap size must be a multiple of {}",
      BLOCK_QUANTUM
    );
    assert!(
      usable <= (NIL & !QUANTUM_MASK) as usize,
      "heap buffer too large for 32-bit offsets"
    );

    let mut allocator = Self {
      heap,
      heap_size: usable as u32,
      free_list_head: NIL,
    };
    allocator.init();
    allocator
  }

  /// Re-establishes the freshly bootstrapped heap: a single free block
  /// spanning the whole region, all four links [`NIL`](crate::NIL), and the
  /// head pointing at it.
  ///
  /// Calling this on a heap with live allocations abandons them all.
  pub fn init(&mut self) {
    self.free_list_head = HEAP_OFFSET;
    self.set_block_size(HEAP_OFFSET, self.heap_size);
    self.set_next(HEAP_OFFSET, NIL);
    self.set_prev(HEAP_OFFSET, NIL);
    self.set_smaller(HEAP_OFFSET, NIL);
    self.set_larger(HEAP_OFFSET, NIL);

    log::debug!("heap initialized: {} bytes at offset {}", self.heap_size, HEAP_OFFSET);
  }

  // --------------------------------------------------------------------
  // Block cursor: field accessors over raw offsets.
  // --------------------------------------------------------------------

  fn load(
    &self,
    at: u32,
  ) -> u32 {
    let at = at as usize;
    u32::from_le_bytes([
      self.heap[at],
      self.heap[at + 1],
      self.heap[at + 2],
      self.heap[at + 3],
    ])
  }

  fn store(
    &mut self,
    at: u32,
    value: u32,
  ) {
    let at = at as usize;
    self.heap[at..at + 4].copy_from_slice(&value.to_le_bytes());
  }

  pub(crate) fn block_size(
    &self,
    block: u32,
  ) -> u32 {
    self.load(block + SIZE)
  }

  fn set_block_size(
    &mut self,
    block: u32,
    size: u32,
  ) {
    self.store(block + SIZE, size);
  }

  fn next(
    &self,
    block: u32,
  ) -> u32 {
    self.load(block + NEXT)
  }

  fn set_next(
    &mut self,
    block: u32,
    target: u32,
  ) {
    self.store(block + NEXT, target);
  }

  fn prev(
    &self,
    block: u32,
  ) -> u32 {
    self.load(block + PREV)
  }

  fn set_prev(
    &mut self,
    block: u32,
    target: u32,
  ) {
    self.store(block + PREV, target);
  }

  fn smaller(
    &self,
    block: u32,
  ) -> u32 {
    self.load(block + SMALLER)
  }

  fn set_smaller(
    &mut self,
    block: u32,
    target: u32,
  ) {
    self.store(block + SMALLER, target);
  }

  fn larger(
    &self,
    block: u32,
  ) -> u32 {
    self.load(block + LARGER)
  }

  fn set_larger(
    &mut self,
    block: u32,
    target: u32,
  ) {
    self.store(block + LARGER, target);
  }

  pub(crate) fn bytes(
    &self,
    at: u32,
    len: u32,
  ) -> &[u8] {
    &self.heap[at as usize..(at + len) as usize]
  }

  pub(crate) fn bytes_mut(
    &mut self,
    at: u32,
    len: u32,
  ) -> &mut [u8] {
    &mut self.heap[at as usize..(at + len) as usize]
  }

  // --------------------------------------------------------------------
  // Free-list primitives.
  // --------------------------------------------------------------------

  /// Finds the free block of smallest size `>= size`.
  ///
  /// Walks the size-ordered chain starting from the head: climbs LARGER
  /// while the current block is too small, then descends SMALLER as long as
  /// the next smaller block still fits. Equal-size runs stop the descent
  /// because descending requires the smaller neighbor to keep fitting, so
  /// the walk cannot revisit a block.
  fn search(
    &self,
    size: u32,
  ) -> Result<u32, OutOfMemory> {
    let mut current = self.free_list_head;
    if current == NIL {
      return Err(OutOfMemory);
    }

    loop {
      if self.block_size(current) < size {
        // Too small: climb toward larger blocks.
        let above = self.larger(current);
        if above == NIL {
          return Err(OutOfMemory);
        }
        current = above;
      } else {
        // Fits: descend while the next smaller block still fits.
        let below = self.smaller(current);
        if below == NIL || self.block_size(below) < size {
          return Ok(current);
        }
        current = below;
      }
    }
  }

  /// Excises `block` from both orderings.
  ///
  /// Each non-`NIL` neighbor gets the block's opposite-direction link
  /// written into its mirror field. The block's own header is left as-is;
  /// whoever removes a block owns its bytes from here on.
  fn remove_free_block(
    &mut self,
    block: u32,
  ) {
    if self.free_list_head == block {
      self.free_list_head = self.next(block);
    }

    let next = self.next(block);
    let prev = self.prev(block);
    let smaller = self.smaller(block);
    let larger = self.larger(block);

    if next != NIL {
      self.set_prev(next, prev);
    }
    if prev != NIL {
      self.set_next(prev, next);
    }
    if smaller != NIL {
      self.set_larger(smaller, larger);
    }
    if larger != NIL {
      self.set_smaller(larger, smaller);
    }
  }

  /// Inserts a block of `size` bytes at offset `block` into both orderings.
  fn insert_free_block(
    &mut self,
    block: u32,
    size: u32,
  ) {
    if self.free_list_head == NIL {
      // Lone free block.
      self.free_list_head = block;
      self.set_block_size(block, size);
      self.set_next(block, NIL);
      self.set_prev(block, NIL);
      self.set_smaller(block, NIL);
      self.set_larger(block, NIL);
      return;
    }

    let head = self.free_list_head;

    // Address neighbors: the first free block past `block`, and the one
    // before it.
    let mut prev = NIL;
    let mut next = head;
    while next != NIL && next < block {
      prev = next;
      next = self.next(next);
    }

    // Size neighbors: walk up or down the size chain from the head until
    // the new size fits between two adjacent entries.
    let (smaller, larger) = if self.block_size(head) < size {
      let mut current = head;
      loop {
        let above = self.larger(current);
        if above == NIL {
          break (current, NIL);
        }
        if self.block_size(above) >= size {
          break (current, above);
        }
        current = above;
      }
    } else {
      let mut current = head;
      loop {
        let below = self.smaller(current);
        if below == NIL {
          break (NIL, current);
        }
        if self.block_size(below) <= size {
          break (below, current);
        }
        current = below;
      }
    };

    self.set_block_size(block, size);
    self.set_next(block, next);
    self.set_prev(block, prev);
    self.set_smaller(block, smaller);
    self.set_larger(block, larger);

    if next != NIL {
      self.set_prev(next, block);
    }
    if prev != NIL {
      self.set_next(prev, block);
    } else {
      // Lowest address in the list: the head moves.
      self.free_list_head = block;
    }
    if smaller != NIL {
      self.set_larger(smaller, block);
    }
    if larger != NIL {
      self.set_smaller(larger, block);
    }
  }

  /// Truncates free block `block` to `size` bytes for allocation; the tail
  /// re-enters the free list as its own block.
  ///
  /// Both sizes are quantum multiples, so the tail is never smaller than
  /// one quantum. An exact fit never reaches this path.
  fn split_free_block(
    &mut self,
    block: u32,
    size: u32,
  ) {
    let total = self.block_size(block);

    self.remove_free_block(block);
    self.insert_free_block(block + size, total - size);
    self.set_block_size(block, size);
  }

  /// Merges two address-adjacent free blocks into one at `first`.
  fn merge_free_blocks(
    &mut self,
    first: u32,
    second: u32,
  ) {
    let merged = self.block_size(first) + self.block_size(second);

    self.remove_free_block(first);
    self.remove_free_block(second);
    self.insert_free_block(first, merged);
  }

  /// Walks the address list and merges every pair of touching free blocks.
  /// A merged block is re-examined before advancing, so chains collapse in
  /// one pass.
  fn coalesce(&mut self) {
    let mut current = self.free_list_head;

    while current != NIL {
      let next = self.next(current);
      if next != NIL && current + self.block_size(current) == next {
        self.merge_free_blocks(current, next);
      } else {
        current = next;
      }
    }
  }

  /// Rounds a payload request to a block size: header added, then aligned
  /// to the quantum. Fails early when the result cannot fit the heap, so
  /// the arithmetic never overflows `u32`.
  fn block_size_for(
    &self,
    size: usize,
  ) -> Result<u32, OutOfMemory> {
    let with_header = match size.checked_add(HEADER_SIZE as usize) {
      Some(value) => value,
      None => return Err(OutOfMemory),
    };
    if with_header > self.heap_size as usize {
      return Err(OutOfMemory);
    }

    let aligned = align!(with_header);
    if aligned > self.heap_size as usize {
      return Err(OutOfMemory);
    }

    Ok(aligned as u32)
  }

  #[inline]
  fn debug_check(&self) {
    #[cfg(debug_assertions)]
    self.check_invariants();
  }

  // --------------------------------------------------------------------
  // Public API.
  // --------------------------------------------------------------------

  /// Allocates `size` usable bytes and returns the payload offset.
  ///
  /// The block backing the allocation is quantum-aligned; the returned
  /// payload offset is `block + 4` because the 4-byte size field precedes
  /// it. The usable region is at least `size` bytes (often more, up to the
  /// rounded block size) and disjoint from every live allocation.
  ///
  /// # Errors
  ///
  /// [`OutOfMemory`] when no free block is large enough. The heap is left
  /// unchanged in that case.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<u32, OutOfMemory> {
    let block_size = self.block_size_for(size)?;
    let block = self.search(block_size)?;

    if self.block_size(block) == block_size {
      // Exact fit: the block leaves the free list whole.
      self.remove_free_block(block);
    } else {
      self.split_free_block(block, block_size);
    }

    log::trace!("allocate: {} bytes -> block {:#x} ({} byte block)", size, block, block_size);
    self.debug_check();

    Ok(block + HEADER_SIZE)
  }

  /// Allocates `size` usable bytes with the entire payload region zeroed.
  ///
  /// Zeroing covers the full usable region (block size minus the 4-byte
  /// header), not just the `size` bytes requested.
  ///
  /// # Errors
  ///
  /// [`OutOfMemory`], as for [`allocate`](Self::allocate).
  pub fn zeroed_allocate(
    &mut self,
    size: usize,
  ) -> Result<u32, OutOfMemory> {
    let ptr = self.allocate(size)?;
    let payload = self.block_size(ptr - HEADER_SIZE) - HEADER_SIZE;
    self.zero_bytes(ptr, payload);

    Ok(ptr)
  }

  /// Resizes the allocation behind `ptr` to `size` usable bytes.
  ///
  /// If the rounded block size is unchanged the same pointer comes back and
  /// the heap is untouched. Otherwise the block takes a round trip through
  /// the free list: the first 16 payload bytes are captured (the free-block
  /// links overwrite exactly that window), the block is freed, the new size
  /// is allocated, and the payload is carried over - the captured 16 bytes
  /// first, then the remaining tail clamped to the smaller of the two
  /// payloads.
  ///
  /// The result is observably equivalent to allocate-new / copy-all /
  /// free-old, including on failure: when no block fits the new size, the
  /// old block is carved back out of the free region that absorbed it and
  /// `ptr` remains valid with its payload intact.
  ///
  /// # Errors
  ///
  /// [`OutOfMemory`] when no free block fits the new size.
  pub fn reallocate(
    &mut self,
    ptr: u32,
    size: usize,
  ) -> Result<u32, OutOfMemory> {
    let block = ptr - HEADER_SIZE;
    let old_block_size = self.block_size(block);
    let new_block_size = self.block_size_for(size)?;

    if new_block_size == old_block_size {
      return Ok(ptr);
    }

    let mut captured = [0u8; LINK_BYTES as usize];
    captured.copy_from_slice(self.bytes(ptr, LINK_BYTES));

    self.deallocate(ptr);

    let new_ptr = match self.allocate(size) {
      Ok(new_ptr) => new_ptr,
      Err(error) => {
        // Give the caller its block back exactly as it was.
        self.reclaim_block(block, old_block_size);
        self.bytes_mut(ptr, LINK_BYTES).copy_from_slice(&captured);
        self.debug_check();
        return Err(error);
      }
    };

    self.bytes_mut(new_ptr, LINK_BYTES).copy_from_slice(&captured);

    // Tail copy, clamped to the smaller of the two payloads. The copy is
    // overlap-safe: an allocation always begins at the start of a free
    // block, so an overlapping destination is never above the source.
    let tail = old_block_size.min(new_block_size) - FREE_HEADER_SIZE;
    self.mem_copy(ptr + LINK_BYTES, tail, new_ptr + LINK_BYTES);

    log::trace!(
      "reallocate: block {:#x} ({} bytes) -> block {:#x} ({} bytes)",
      block,
      old_block_size,
      new_ptr - HEADER_SIZE,
      new_block_size
    );

    Ok(new_ptr)
  }

  /// Returns the allocation behind `ptr` to the free pool and merges it
  /// with any adjacent free neighbors.
  ///
  /// # Contract
  ///
  /// `ptr` must be a live payload offset previously returned by this
  /// allocator. Double-frees, foreign offsets and writes past the payload
  /// are not detected: they corrupt the heap structure inside the buffer
  /// (or panic on a bounds check), after which any behavior of later calls
  /// is unspecified. Memory outside the buffer is never touched.
  pub fn deallocate(
    &mut self,
    ptr: u32,
  ) {
    let block = ptr - HEADER_SIZE;
    let size = self.block_size(block);

    log::trace!("deallocate: block {:#x} ({} byte block)", block, size);

    self.insert_free_block(block, size);
    self.coalesce();
    self.debug_check();
  }

  /// Zeroes the entire payload region behind `ptr`, then frees it.
  ///
  /// Useful when the payload held key material or other data that must not
  /// linger in the buffer after release. The free-list links are written
  /// over the first bytes afterwards; everything else stays zero.
  pub fn clear_and_deallocate(
    &mut self,
    ptr: u32,
  ) {
    let payload = self.block_size(ptr - HEADER_SIZE) - HEADER_SIZE;
    self.zero_bytes(ptr, payload);
    self.deallocate(ptr);
  }

  /// Re-carves `[block, block + size)` out of the free region that
  /// absorbed it, undoing a just-performed free. The bytes before and after
  /// the region re-enter the free list with exactly the extents they had
  /// before that free, because coalescing only ever merged them with this
  /// region.
  fn reclaim_block(
    &mut self,
    block: u32,
    size: u32,
  ) {
    let mut current = self.free_list_head;
    while current != NIL {
      let extent = self.block_size(current);
      if current <= block && block + size <= current + extent {
        break;
      }
      current = self.next(current);
    }
    debug_assert_ne!(current, NIL, "reclaimed region must be inside a free block");

    let start = current;
    let extent = self.block_size(current);

    self.remove_free_block(current);

    if block > start {
      self.insert_free_block(start, block - start);
    }
    let tail = start + extent - (block + size);
    if tail > 0 {
      self.insert_free_block(block + size, tail);
    }
    self.set_block_size(block, size);
  }

  // --------------------------------------------------------------------
  // Payload access and diagnostics.
  // --------------------------------------------------------------------

  /// The usable region behind a live payload offset, sized from the block
  /// header (block size minus the 4-byte header).
  pub fn payload(
    &self,
    ptr: u32,
  ) -> &[u8] {
    let len = self.block_size(ptr - HEADER_SIZE) - HEADER_SIZE;
    self.bytes(ptr, len)
  }

  /// Mutable variant of [`payload`](Self::payload).
  pub fn payload_mut(
    &mut self,
    ptr: u32,
  ) -> &mut [u8] {
    let len = self.block_size(ptr - HEADER_SIZE) - HEADER_SIZE;
    self.bytes_mut(ptr, len)
  }

  /// Total size of the heap in bytes.
  pub fn heap_size(&self) -> u32 {
    self.heap_size
  }

  /// Bytes currently sitting in free blocks, headers included.
  pub fn free_bytes(&self) -> u32 {
    let mut total = 0;
    let mut current = self.free_list_head;

    while current != NIL {
      total += self.block_size(current);
      current = self.next(current);
    }

    total
  }

  /// The free blocks in address order, as `(offset, size)` pairs.
  pub fn free_blocks(&self) -> Vec<(u32, u32)> {
    let mut blocks = Vec::new();
    let mut current = self.free_list_head;

    while current != NIL {
      blocks.push((current, self.block_size(current)));
      current = self.next(current);
    }

    blocks
  }

  /// Walks the whole heap and panics on any structural violation: broken
  /// tiling, misaligned or undersized blocks, unordered or inconsistent
  /// link chains, unmerged free neighbors, or a head that is not the
  /// lowest-address free block.
  ///
  /// Runs automatically after every mutating call in debug builds; hosts
  /// can also call it directly as a consistency probe.
  pub fn check_invariants(&self) {
    let limit = (self.heap_size / BLOCK_QUANTUM) as usize;
    let end = HEAP_OFFSET + self.heap_size;

    // Address chain: strictly increasing, aligned, quantum-sized, no two
    // neighbors touching, back links consistent. Starting the walk at the
    // head also proves the head is the lowest-address free block.
    let mut free = Vec::new();
    let mut previous = NIL;
    let mut current = self.free_list_head;

    while current != NIL {
      assert!(free.len() < limit, "free list does not terminate");

      let size = self.block_size(current);
      assert_eq!(current & QUANTUM_MASK, 0, "free block {current:#x} is misaligned");
      assert_eq!(size & QUANTUM_MASK, 0, "free block {current:#x} has unaligned size {size}");
      assert!(size >= BLOCK_QUANTUM, "free block {current:#x} is undersized: {size}");
      assert!(end - current >= size, "free block {current:#x} runs past the heap end");
      assert_eq!(self.prev(current), previous, "address back link broken at {current:#x}");

      if previous != NIL {
        assert!(previous < current, "address list out of order at {current:#x}");
        assert!(
          previous + self.block_size(previous) < current,
          "adjacent free blocks {previous:#x} and {current:#x} were not merged"
        );
      }

      free.push(current);
      previous = current;
      current = self.next(current);
    }

    // Size chain: one chain over the same set of blocks, sizes
    // non-decreasing, back links consistent.
    if !free.is_empty() {
      let mut bottom = NIL;
      for &block in &free {
        if self.smaller(block) == NIL {
          assert_eq!(bottom, NIL, "two blocks claim the bottom of the size list");
          bottom = block;
        }
      }
      assert_ne!(bottom, NIL, "size list has no bottom");

      let mut chain = Vec::new();
      let mut current = bottom;
      while current != NIL {
        assert!(chain.len() < free.len(), "size list does not terminate");
        chain.push(current);

        let above = self.larger(current);
        if above != NIL {
          assert!(
            self.block_size(above) >= self.block_size(current),
            "size list out of order at {current:#x}"
          );
          assert_eq!(self.smaller(above), current, "size back link broken at {above:#x}");
        }
        current = above;
      }

      let mut sorted_chain = chain.clone();
      sorted_chain.sort_unstable();
      let mut sorted_free = free.clone();
      sorted_free.sort_unstable();
      assert_eq!(sorted_chain, sorted_free, "address list and size list disagree");
    }

    // Tiling: block sizes cover [HEAP_OFFSET, HEAP_OFFSET + heap_size)
    // exactly, with no gaps and no overlap.
    let mut offset = HEAP_OFFSET;
    while offset < end {
      let size = self.block_size(offset);
      assert!(size >= BLOCK_QUANTUM, "block {offset:#x} is undersized: {size}");
      assert_eq!(size & QUANTUM_MASK, 0, "block {offset:#x} has unaligned size {size}");
      assert!(end - offset >= size, "block {offset:#x} runs past the heap end");
      offset += size;
    }
    assert_eq!(offset, end, "blocks do not tile the heap");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const HEAP_SIZE: usize = 65536;

  const PADDING_SEED: u64 = 0xCDEF_0123_4567_89AB;

  /// Helper: a fresh zeroed heap buffer.
  fn heap_buffer() -> Vec<u8> {
    vec![0u8; HEAP_SIZE]
  }

  /// Helper: fill `len` payload bytes behind `ptr` with a pattern derived
  /// from the seed.
  fn fill_payload(
    allocator: &mut FreeListAllocator<'_>,
    ptr: u32,
    len: usize,
    seed: u64,
  ) {
    let padding = PADDING_SEED ^ seed;
    for (i, byte) in allocator.payload_mut(ptr)[..len].iter_mut().enumerate() {
      *byte = (padding.wrapping_add(i as u64)) as u8;
    }
  }

  /// Helper: check the pattern written by `fill_payload`.
  fn check_payload(
    allocator: &FreeListAllocator<'_>,
    ptr: u32,
    len: usize,
    seed: u64,
  ) {
    let padding = PADDING_SEED ^ seed;
    for (i, byte) in allocator.payload(ptr)[..len].iter().enumerate() {
      assert_eq!(
        *byte,
        (padding.wrapping_add(i as u64)) as u8,
        "payload behind {ptr:#x} corrupted at byte {i}"
      );
    }
  }

  #[test]
  fn init_publishes_a_single_spanning_block() {
    let mut buffer = heap_buffer();
    let allocator = FreeListAllocator::new(&mut buffer);

    assert_eq!(allocator.free_list_head, 0);
    assert_eq!(allocator.block_size(0), HEAP_SIZE as u32);
    assert_eq!(allocator.next(0), NIL);
    assert_eq!(allocator.prev(0), NIL);
    assert_eq!(allocator.smaller(0), NIL);
    assert_eq!(allocator.larger(0), NIL);

    allocator.check_invariants();
  }

  #[test]
  fn init_is_idempotent_without_live_allocations() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let fresh_header: Vec<u8> = allocator.bytes(0, FREE_HEADER_SIZE).to_vec();

    let ptr = allocator.allocate(26).unwrap();
    allocator.deallocate(ptr);
    allocator.init();

    assert_eq!(allocator.bytes(0, FREE_HEADER_SIZE), &fresh_header[..]);
    assert_eq!(allocator.free_list_head, 0);
  }

  #[test]
  fn single_allocation_splits_the_spanning_block() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // 26 + 4 byte header rounds to one 64-byte block.
    let ptr = allocator.allocate(26).unwrap();

    assert_eq!(ptr, 4);
    assert_eq!(allocator.block_size(0), 64);
    assert_eq!(allocator.free_list_head, 64);
    assert_eq!(allocator.block_size(64), 65472);
    assert_eq!(allocator.free_blocks(), vec![(64, 65472)]);

    allocator.check_invariants();
  }

  #[test]
  fn allocate_then_free_restores_the_heap_byte_for_byte() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let before: Vec<u8> = allocator.bytes(0, FREE_HEADER_SIZE).to_vec();

    let ptr = allocator.allocate(26).unwrap();
    allocator.deallocate(ptr);

    assert_eq!(allocator.bytes(0, FREE_HEADER_SIZE), &before[..]);
    assert_eq!(allocator.free_list_head, 0);
    assert_eq!(allocator.free_blocks(), vec![(0, HEAP_SIZE as u32)]);
  }

  #[test]
  fn freeing_in_any_order_coalesces_to_one_block() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let a = allocator.allocate(26).unwrap();
    let b = allocator.allocate(26).unwrap();
    let c = allocator.allocate(26).unwrap();

    allocator.deallocate(b);
    allocator.deallocate(a);
    allocator.deallocate(c);

    assert_eq!(allocator.free_blocks(), vec![(0, HEAP_SIZE as u32)]);
    allocator.check_invariants();
  }

  #[test]
  fn best_fit_picks_the_smallest_sufficient_block() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Carve out blocks of 128, 256 and 192 bytes, separated and followed
    // by still-allocated guards so the frees below cannot coalesce.
    let a = allocator.allocate(124).unwrap();
    let _guard_a = allocator.allocate(60).unwrap();
    let b = allocator.allocate(252).unwrap();
    let _guard_b = allocator.allocate(60).unwrap();
    let c = allocator.allocate(188).unwrap();
    let _guard_c = allocator.allocate(60).unwrap();

    allocator.deallocate(a);
    allocator.deallocate(b);
    allocator.deallocate(c);
    allocator.check_invariants();

    // A 64-byte request must come out of the 128-byte block, not the 192,
    // the 256, or the large tail.
    let ptr = allocator.allocate(50).unwrap();
    assert_eq!(ptr, a);

    allocator.check_invariants();
  }

  #[test]
  fn search_terminates_among_equal_sizes() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Five equal 128-byte free blocks, kept apart by allocated guards.
    let mut equals = Vec::new();
    for _ in 0..5 {
      equals.push(allocator.allocate(124).unwrap());
      allocator.allocate(60).unwrap();
    }
    for &ptr in &equals {
      allocator.deallocate(ptr);
    }
    allocator.check_invariants();

    let ptr = allocator.allocate(124).unwrap();
    assert!(equals.contains(&ptr), "allocation must reuse one of the equal blocks");

    allocator.check_invariants();
  }

  #[test]
  fn exact_fit_consumes_the_whole_block() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(HEAP_SIZE - 4).unwrap();

    assert_eq!(ptr, 4);
    assert_eq!(allocator.free_list_head, NIL);
    assert_eq!(allocator.free_bytes(), 0);
    allocator.check_invariants();

    allocator.deallocate(ptr);
    assert_eq!(allocator.free_blocks(), vec![(0, HEAP_SIZE as u32)]);
  }

  #[test]
  fn zero_size_allocation_is_valid_and_freeable() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(0).unwrap();

    assert_eq!(allocator.payload(ptr).len(), (BLOCK_QUANTUM - HEADER_SIZE) as usize);

    allocator.deallocate(ptr);
    assert_eq!(allocator.free_blocks(), vec![(0, HEAP_SIZE as u32)]);
  }

  #[test]
  fn failed_allocation_leaves_the_heap_unchanged() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(100).unwrap();
    fill_payload(&mut allocator, ptr, 100, 1);
    let snapshot = allocator.free_blocks();

    assert_eq!(allocator.allocate(HEAP_SIZE), Err(OutOfMemory));
    assert_eq!(allocator.allocate(usize::MAX), Err(OutOfMemory));

    assert_eq!(allocator.free_blocks(), snapshot);
    check_payload(&allocator, ptr, 100, 1);
    allocator.check_invariants();
  }

  #[test]
  fn fragmented_heap_fails_large_requests_despite_free_bytes() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Fill the heap with minimum-size blocks, then free every other one:
    // plenty of free bytes, but no two of them contiguous.
    let mut pointers = Vec::new();
    for _ in 0..(HEAP_SIZE / BLOCK_QUANTUM as usize) {
      pointers.push(allocator.allocate(60).unwrap());
    }
    assert_eq!(allocator.free_list_head, NIL);

    for ptr in pointers.iter().step_by(2) {
      allocator.deallocate(*ptr);
    }

    assert_eq!(allocator.free_bytes() as usize, HEAP_SIZE / 2);
    assert_eq!(allocator.allocate(61), Err(OutOfMemory));
    allocator.check_invariants();
  }

  #[test]
  fn reallocate_within_the_same_size_class_returns_the_same_pointer() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(10).unwrap();
    fill_payload(&mut allocator, ptr, 10, 2);

    // 10 and 20 byte payloads both round to one 64-byte block.
    assert_eq!(allocator.reallocate(ptr, 20), Ok(ptr));
    assert_eq!(allocator.reallocate(ptr, 1), Ok(ptr));
    check_payload(&allocator, ptr, 10, 2);
  }

  #[test]
  fn reallocate_grow_preserves_the_payload() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(100).unwrap();
    fill_payload(&mut allocator, ptr, 100, 3);

    let grown = allocator.reallocate(ptr, 300).unwrap();

    check_payload(&allocator, grown, 100, 3);
    assert!(allocator.payload(grown).len() >= 300);
    allocator.check_invariants();
  }

  #[test]
  fn reallocate_moves_to_a_new_block_when_needed() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // A guard right behind the target keeps the freed block at 128 bytes,
    // so growing to 300 has to relocate past the guard.
    let ptr = allocator.allocate(100).unwrap();
    let _guard = allocator.allocate(60).unwrap();
    fill_payload(&mut allocator, ptr, 100, 9);

    let moved = allocator.reallocate(ptr, 300).unwrap();

    assert_ne!(moved, ptr);
    check_payload(&allocator, moved, 100, 9);
    assert!(allocator.payload(moved).len() >= 300);
    allocator.check_invariants();
  }

  #[test]
  fn reallocate_shrink_preserves_the_clamped_payload() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // 200 bytes sits in a 256-byte block; shrinking to 40 moves it into a
    // 64-byte block whose payload holds 60 bytes.
    let ptr = allocator.allocate(200).unwrap();
    fill_payload(&mut allocator, ptr, 200, 4);

    let shrunk = allocator.reallocate(ptr, 40).unwrap();

    assert_eq!(allocator.payload(shrunk).len(), 60);
    check_payload(&allocator, shrunk, 60, 4);
    allocator.check_invariants();
  }

  #[test]
  fn reallocate_failure_keeps_the_old_block_valid() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(100).unwrap();
    let _guard = allocator.allocate(60).unwrap();
    fill_payload(&mut allocator, ptr, 100, 5);

    // The rounded request passes the size pre-check but no contiguous
    // block can satisfy it, so the failure happens after the free step.
    let result = allocator.reallocate(ptr, HEAP_SIZE - 100);
    assert_eq!(result, Err(OutOfMemory));

    check_payload(&allocator, ptr, 100, 5);
    allocator.check_invariants();

    // The allocator keeps working afterwards.
    let other = allocator.allocate(30).unwrap();
    allocator.deallocate(other);
    allocator.deallocate(ptr);
  }

  #[test]
  fn reallocate_failure_restores_merged_neighbors() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Layout: free 64 | target 128 | guard 64 | free tail. Freeing the
    // target merges it with the block on its left, so the rollback has to
    // carve it back out of the middle of a larger free region.
    let a = allocator.allocate(60).unwrap();
    let target = allocator.allocate(100).unwrap();
    let _guard = allocator.allocate(60).unwrap();
    allocator.deallocate(a);

    fill_payload(&mut allocator, target, 100, 6);
    let free_before = allocator.free_blocks();

    let result = allocator.reallocate(target, HEAP_SIZE - 200);
    assert_eq!(result, Err(OutOfMemory));

    check_payload(&allocator, target, 100, 6);
    assert_eq!(allocator.free_blocks(), free_before);
    allocator.check_invariants();
  }

  #[test]
  fn zeroed_allocation_is_zero_filled_even_on_dirty_memory() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Dirty the region first, then free it so the next allocation reuses
    // the same bytes.
    let ptr = allocator.allocate(100).unwrap();
    fill_payload(&mut allocator, ptr, 124, 7);
    allocator.deallocate(ptr);

    let zeroed = allocator.zeroed_allocate(100).unwrap();

    assert!(allocator.payload(zeroed).iter().all(|&byte| byte == 0));
    allocator.check_invariants();
  }

  #[test]
  fn clear_and_deallocate_zeroes_the_payload_before_release() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let ptr = allocator.allocate(100).unwrap();
    let _guard = allocator.allocate(60).unwrap();
    fill_payload(&mut allocator, ptr, 124, 8);

    allocator.clear_and_deallocate(ptr);

    // The freed block keeps its size field and gains link fields; every
    // byte past the 20-byte free header must read as zero. The guard keeps
    // the block from merging away.
    let block = ptr - HEADER_SIZE;
    let size = allocator.block_size(block);
    assert_eq!(size, 128);
    assert!(
      allocator
        .bytes(block + FREE_HEADER_SIZE, size - FREE_HEADER_SIZE)
        .iter()
        .all(|&byte| byte == 0)
    );
    allocator.check_invariants();
  }

  #[test]
  fn stats_track_the_free_pool() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    assert_eq!(allocator.heap_size(), HEAP_SIZE as u32);
    assert_eq!(allocator.free_bytes(), HEAP_SIZE as u32);

    let ptr = allocator.allocate(60).unwrap();
    assert_eq!(allocator.free_bytes(), HEAP_SIZE as u32 - 64);

    allocator.deallocate(ptr);
    assert_eq!(allocator.free_bytes(), HEAP_SIZE as u32);
  }

  #[test]
  fn churn_keeps_the_heap_consistent() {
    let mut buffer = heap_buffer();
    let mut allocator = FreeListAllocator::new(&mut buffer);

    // Deterministic LCG so the run is reproducible.
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut roll = move || {
      state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
      state >> 33
    };

    let mut live: Vec<(u32, usize, u64)> = Vec::new();

    for round in 0..2000u64 {
      let action = roll();
      if action % 3 != 0 || live.is_empty() {
        let size = (roll() % 700) as usize;
        if let Ok(ptr) = allocator.allocate(size) {
          fill_payload(&mut allocator, ptr, size, round);
          live.push((ptr, size, round));
        }
      } else {
        let (ptr, size, seed) = live.swap_remove((roll() as usize) % live.len());
        check_payload(&allocator, ptr, size, seed);
        allocator.deallocate(ptr);
      }
    }

    for (ptr, size, seed) in live.drain(..) {
      check_payload(&allocator, ptr, size, seed);
      allocator.deallocate(ptr);
    }

    allocator.check_invariants();
    assert_eq!(allocator.free_blocks(), vec![(0, HEAP_SIZE as u32)]);
  }

  #[test]
  #[should_panic(expected = "multiple of")]
  fn unaligned_buffer_is_rejected() {
    let mut buffer = vec![0u8; HEAP_SIZE + 1];
    let _ = FreeListAllocator::new(&mut buffer);
  }

  #[test]
  #[should_panic(expected = "too small")]
  fn undersized_buffer_is_rejected() {
    let mut buffer = vec![0u8; 32];
    let _ = FreeListAllocator::new(&mut buffer);
  }
}

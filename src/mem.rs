//! Bulk-memory helpers over buffer offsets: plain copy, secure move, and
//! the zero-fill primitive behind the zeroing wrappers.

use crate::free_list::FreeListAllocator;

impl FreeListAllocator<'_> {
  /// Copies `len` bytes from offset `src` to offset `dst`.
  ///
  /// The regions must not overlap. (The copy itself is carried out with
  /// overlap-safe `copy_within`, which is what lets reallocation reuse it
  /// internally, but overlapping regions are outside this contract.)
  pub fn mem_copy(
    &mut self,
    src: u32,
    len: u32,
    dst: u32,
  ) {
    let src = src as usize;
    let dst = dst as usize;
    let len = len as usize;

    self.bytes_mut(0, self.heap_size()).copy_within(src..src + len, dst);
  }

  /// Copies `len` bytes from offset `src` to offset `dst`, then zeroes the
  /// source region so the original bytes do not linger in the buffer.
  ///
  /// The regions must not overlap; an overlapping destination would lose
  /// bytes to the zeroing pass.
  pub fn mem_move_secure(
    &mut self,
    src: u32,
    len: u32,
    dst: u32,
  ) {
    self.mem_copy(src, len, dst);
    self.zero_bytes(src, len);
  }

  /// Zero-fills `len` bytes starting at offset `at`.
  pub(crate) fn zero_bytes(
    &mut self,
    at: u32,
    len: u32,
  ) {
    self.bytes_mut(at, len).fill(0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn copy_moves_bytes_between_disjoint_regions() {
    let mut buffer = vec![0u8; 4096];
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let src = allocator.allocate(32).unwrap();
    let dst = allocator.allocate(32).unwrap();

    for (i, byte) in allocator.payload_mut(src)[..32].iter_mut().enumerate() {
      *byte = i as u8 + 1;
    }

    allocator.mem_copy(src, 32, dst);

    for (i, byte) in allocator.payload(dst)[..32].iter().enumerate() {
      assert_eq!(*byte, i as u8 + 1);
    }
    // The source is untouched.
    for (i, byte) in allocator.payload(src)[..32].iter().enumerate() {
      assert_eq!(*byte, i as u8 + 1);
    }
  }

  #[test]
  fn secure_move_zeroes_the_source() {
    let mut buffer = vec![0u8; 4096];
    let mut allocator = FreeListAllocator::new(&mut buffer);

    let src = allocator.allocate(32).unwrap();
    let dst = allocator.allocate(32).unwrap();

    allocator.payload_mut(src)[..32].fill(0xAB);

    allocator.mem_move_secure(src, 32, dst);

    assert!(allocator.payload(dst)[..32].iter().all(|&byte| byte == 0xAB));
    assert!(allocator.payload(src)[..32].iter().all(|&byte| byte == 0));
  }
}

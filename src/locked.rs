//! Shared-use wrapper around the single-threaded core.
//!
//! The allocator itself takes `&mut self` everywhere and holds no lock; a
//! host that wants to share one heap between threads serializes externally.
//! `LockedAllocator` is that external serialization, packaged: a
//! `spin::Mutex` around the core, in the same shape the surrounding
//! ecosystem wraps its heaps (`LockedHeap` and friends).

use spin::{Mutex, MutexGuard};

use crate::free_list::FreeListAllocator;

/// A [`FreeListAllocator`] behind a spin lock.
///
/// Every operation goes through [`lock`](Self::lock); the guard gives full
/// access to the core API for the duration of the critical section.
///
/// ```rust
/// use fallocator::LockedAllocator;
///
/// let mut buffer = vec![0u8; 4096];
/// let allocator = LockedAllocator::new(&mut buffer);
///
/// let ptr = allocator.lock().allocate(100).unwrap();
/// allocator.lock().deallocate(ptr);
/// ```
pub struct LockedAllocator<'a> {
  inner: Mutex<FreeListAllocator<'a>>,
}

impl<'a> LockedAllocator<'a> {
  /// Creates a locked allocator over `heap`.
  ///
  /// # Panics
  ///
  /// As for [`FreeListAllocator::new`].
  pub fn new(heap: &'a mut [u8]) -> Self {
    Self {
      inner: Mutex::new(FreeListAllocator::new(heap)),
    }
  }

  /// Locks the allocator for the duration of the returned guard.
  pub fn lock(&self) -> MutexGuard<'_, FreeListAllocator<'a>> {
    self.inner.lock()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn threads_can_share_one_heap() {
    let mut buffer = vec![0u8; 65536];
    let allocator = LockedAllocator::new(&mut buffer);

    std::thread::scope(|scope| {
      for thread in 0u8..4 {
        let allocator = &allocator;
        scope.spawn(move || {
          for round in 0..50 {
            let ptr = allocator.lock().allocate(100 + round).unwrap();
            {
              let mut guard = allocator.lock();
              guard.payload_mut(ptr)[..100].fill(thread);
              assert!(guard.payload(ptr)[..100].iter().all(|&byte| byte == thread));
            }
            allocator.lock().deallocate(ptr);
          }
        });
      }
    });

    let guard = allocator.lock();
    guard.check_invariants();
    assert_eq!(guard.free_bytes(), guard.heap_size());
  }
}

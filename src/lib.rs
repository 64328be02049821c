//! # fallocator - A Fixed-Buffer Memory Allocator Library
//!
//! This crate provides a **best-fit free-list allocator** that manages a
//! single fixed-size byte buffer supplied by its host. All metadata lives
//! inside the buffer itself; nothing is allocated elsewhere.
//!
//! ## Overview
//!
//! ```text
//!   Fixed-Buffer Allocator Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                    HOST-SUPPLIED BUFFER (fixed size)                 │
//!   │                                                                      │
//!   │   ┌────┬─────┬────┬──────────┬────┬─────┬────────────────────────┐   │
//!   │   │ A1 │free │ A2 │   free   │ A3 │ A4  │         free           │   │
//!   │   └────┴─────┴────┴──────────┴────┴─────┴────────────────────────┘   │
//!   │          │              │                          │                 │
//!   │          └──── NEXT ────┴────────── NEXT ──────────┘                 │
//!   │          (free blocks doubly linked by address AND by size)          │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: best-fit search over the size links, split on surplus.
//!   Release:    re-link, then merge any touching free neighbors.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   fallocator
//!   ├── align      - Quantum-alignment macro (align!)
//!   ├── block      - In-band block layout: constants and field offsets
//!   ├── free_list  - FreeListAllocator implementation
//!   ├── mem        - Bulk-memory helpers (copy, secure move)
//!   └── locked     - LockedAllocator, a spin::Mutex wrapper for shared use
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fallocator::FreeListAllocator;
//!
//! // The host owns the buffer; the allocator only borrows it.
//! let mut buffer = vec![0u8; 65536];
//! let mut allocator = FreeListAllocator::new(&mut buffer);
//!
//! // Allocate, use, release. "Pointers" are byte offsets into the buffer.
//! let ptr = allocator.allocate(100).unwrap();
//! allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//! assert_eq!(&allocator.payload(ptr)[..5], b"hello");
//! allocator.deallocate(ptr);
//! ```
//!
//! ## How It Works
//!
//! Every block starts with a 4-byte size field. Free blocks extend that to
//! a 20-byte header whose four link fields thread them into two orderings
//! at once - by address (for coalescing) and by size (for best-fit search):
//!
//! ```text
//!   Allocated block:                 Free block:
//!   ┌──────┬───────────────┐        ┌──────┬──────┬──────┬───────┬──────┬──────┐
//!   │ SIZE │    payload    │        │ SIZE │ NEXT │ PREV │SMALLER│LARGER│ ...  │
//!   └──────┴───────────────┘        └──────┴──────┴──────┴───────┴──────┴──────┘
//!          ▲
//!          └── offset handed to the caller (block + 4)
//! ```
//!
//! Releasing a block re-inserts it into both orderings and merges it with
//! any adjacent free neighbor, so no two free blocks ever touch.
//!
//! ## Features
//!
//! - **Fixed footprint**: the heap never grows; the host decides the size
//! - **Best-fit with coalescing**: bounded external fragmentation
//! - **In-band metadata**: zero auxiliary storage, relocatable with the
//!   buffer
//! - **Multiple heaps**: each allocator owns its state; instances are
//!   independent
//!
//! ## Limitations
//!
//! - **Single-threaded core**: share via [`LockedAllocator`] or an external
//!   mutex
//! - **Quantum granularity**: every block costs a multiple of
//!   [`BLOCK_QUANTUM`] bytes
//! - **Trusting**: double-frees, foreign offsets and payload overruns are
//!   not detected; they corrupt the heap structure inside the buffer
//!   (memory outside the buffer is never touched)

pub mod align;
mod block;
mod free_list;
mod locked;
mod mem;

pub use block::{BLOCK_QUANTUM, FREE_HEADER_SIZE, HEADER_SIZE, HEAP_OFFSET, NIL, QUANTUM_MASK};
pub use free_list::{FreeListAllocator, OutOfMemory};
pub use locked::LockedAllocator;

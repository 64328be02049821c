//! In-band block layout: every piece of allocator metadata lives inside the
//! backing buffer itself, so a block is described entirely by its byte
//! offset. An allocated block carries a 4-byte size field; a free block
//! extends the header to 20 bytes with four little-endian link fields:
//!
//! ```text
//!   offset:   +0        +4        +8        +12       +16       +20
//!             ┌─────────┬─────────┬─────────┬─────────┬─────────┬──────────
//!             │  SIZE   │  NEXT   │  PREV   │ SMALLER │ LARGER  │ free ...
//!             └─────────┴─────────┴─────────┴─────────┴─────────┴──────────
//! ```
//!
//! `SIZE` is the total block length in bytes, header included. `NEXT`/`PREV`
//! thread the free blocks in address order, `SMALLER`/`LARGER` in size
//! order. A link with no target holds [`NIL`].

/// Byte offset of the heap within the backing buffer.
pub const HEAP_OFFSET: u32 = 0;

/// Minimum block size and alignment granularity, in bytes.
pub const BLOCK_QUANTUM: u32 = 64;

/// `BLOCK_QUANTUM - 1`, for alignment arithmetic.
pub const QUANTUM_MASK: u32 = BLOCK_QUANTUM - 1;

/// Sentinel offset meaning "no such block".
pub const NIL: u32 = 0xFFFF_FFFF;

/// Header size of an allocated block: the size field alone.
pub const HEADER_SIZE: u32 = 4;

/// Header size of a free block: size field plus four link fields.
pub const FREE_HEADER_SIZE: u32 = 20;

// Field offsets within a block header.
pub(crate) const SIZE: u32 = 0;
pub(crate) const NEXT: u32 = 4;
pub(crate) const PREV: u32 = 8;
pub(crate) const SMALLER: u32 = 12;
pub(crate) const LARGER: u32 = 16;

// The quantum must be a power of two for the mask arithmetic and must have
// room for a full free-block header.
const _: () = {
  assert!(BLOCK_QUANTUM.is_power_of_two());
  assert!(BLOCK_QUANTUM >= FREE_HEADER_SIZE);
};

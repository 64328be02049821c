/// Rounds an allocation size up to the next multiple of the block quantum.
///
/// # Examples
///
/// ```rust
/// use fallocator::align;
///
/// assert_eq!(align!(30), 64);
/// assert_eq!(align!(64), 64);
/// assert_eq!(align!(65), 128);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {{
    let size: usize = $value;
    size
      + (($crate::BLOCK_QUANTUM as usize - (size & $crate::QUANTUM_MASK as usize))
        & $crate::QUANTUM_MASK as usize)
  }};
}

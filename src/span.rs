/// Number of buffer bytes a block occupies: its payload plus both boundary tags.
///
/// # Examples
///
/// ```rust
/// use tagpool::{TAG_WIDTH, block_span};
///
/// assert_eq!(block_span!(92), 100);
/// assert_eq!(block_span!(0), 2 * TAG_WIDTH);
/// ```
#[macro_export]
macro_rules! block_span {
  ($size:expr) => {
    $size + 2 * $crate::TAG_WIDTH
  };
}

#[cfg(test)]
mod tests {
  use crate::TAG_WIDTH;

  #[test]
  fn test_block_span() {
    for size in 0..64usize {
      assert_eq!(size + 8, block_span!(size));
    }

    // A block and the one after it tile the buffer without a gap.
    let first = 0;
    let second = first + block_span!(4);
    assert_eq!(second, 4 + 2 * TAG_WIDTH);
  }
}

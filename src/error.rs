//! Error types for the block pool.

use thiserror::Error;

use crate::tag::Tag;

pub type Result<T> = core::result::Result<T, PoolError>;

/// Reasons an allocation request is refused. The buffer is never modified
/// when one of these is returned.
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
  #[error("empty allocation request: element count must be at least 1")]
  EmptyRequest,

  #[error("pool exhausted: no block fits {count} elements (largest free: {largest_free} bytes)")]
  Exhausted { count: usize, largest_free: usize },
}

/// Structural defect found while walking the buffer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
  #[error("block at offset {offset}: leading tag {leading} does not match trailing tag {trailing}")]
  TagMismatch {
    offset: usize,
    leading: Tag,
    trailing: Tag,
  },

  #[error("block at offset {offset} with a {size} byte payload runs past the end of the buffer")]
  Overrun { offset: usize, size: usize },

  #[error("walk stopped at offset {offset} with {remaining} bytes left, too few for a block")]
  Truncated { offset: usize, remaining: usize },
}

impl Violation {
  /// Offset of the block where the walk found the defect.
  #[must_use]
  pub fn offset(&self) -> usize {
    match *self {
      Self::TagMismatch { offset, .. }
      | Self::Overrun { offset, .. }
      | Self::Truncated { offset, .. } => offset,
    }
  }
}

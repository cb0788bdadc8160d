//! Walking the buffer: the block iterator and the consistency checker.

use crate::{
  block_span,
  error::Violation,
  pool::BlockPool,
  tag::{BlockState, TAG_WIDTH},
};

/// One block as seen from its leading tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
  /// Offset of the leading tag.
  pub offset: usize,
  /// Payload bytes between the two tags.
  pub size: usize,
  pub state: BlockState,
}

impl Block {
  pub const fn is_free(&self) -> bool {
    matches!(self.state, BlockState::Free)
  }

  /// Offset of the first payload byte.
  pub const fn payload(&self) -> usize {
    self.offset + TAG_WIDTH
  }

  /// Bytes the block occupies, tags included.
  pub const fn span(&self) -> usize {
    block_span!(self.size)
  }
}

/// Iterator over the blocks of a pool in address order.
///
/// Follows leading tags only. Iteration ends at the buffer end, or early at
/// the first tag whose block would run past it.
pub struct Blocks<'a, T, const N: usize> {
  pool: &'a BlockPool<T, N>,
  offset: usize,
}

impl<T, const N: usize> Iterator for Blocks<'_, T, N> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if N - self.offset < 2 * TAG_WIDTH {
      return None;
    }

    let tag = self.pool.read_tag(self.offset);
    if block_span!(tag.size) > N - self.offset {
      self.offset = N;
      return None;
    }

    let block = Block {
      offset: self.offset,
      size: tag.size,
      state: tag.state,
    };
    self.offset += block.span();

    Some(block)
  }
}

impl<T, const N: usize> BlockPool<T, N> {
  pub fn blocks(&self) -> Blocks<'_, T, N> {
    Blocks { pool: self, offset: 0 }
  }

  /// Whether the buffer is a gapless sequence of blocks with matching tags.
  pub fn is_consistent(&self) -> bool {
    self.consistency_report().is_empty()
  }

  /// Walks the buffer from offset 0 and lists every structural defect found.
  ///
  /// Each block's trailing tag must repeat its leading tag, and the walk must
  /// land exactly on the end of the buffer. A tag mismatch is recorded and the
  /// walk continues; a block running past the end stops it.
  pub fn consistency_report(&self) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut offset = 0;

    while offset < N {
      let remaining = N - offset;
      if remaining < 2 * TAG_WIDTH {
        violations.push(Violation::Truncated { offset, remaining });
        break;
      }

      let leading = self.read_tag(offset);
      if leading.size > remaining - 2 * TAG_WIDTH {
        violations.push(Violation::Overrun {
          offset,
          size: leading.size,
        });
        break;
      }

      let trailing = self.read_tag(offset + TAG_WIDTH + leading.size);
      if trailing != leading {
        violations.push(Violation::TagMismatch {
          offset,
          leading,
          trailing,
        });
      }

      offset += block_span!(leading.size);
    }

    violations
  }
}

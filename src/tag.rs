use std::fmt;

/// Width in bytes of one boundary tag.
pub const TAG_WIDTH: usize = 4;

/// Largest payload a tag can describe; the high bit is reserved for the state.
pub const MAX_BLOCK_SIZE: usize = USED_BIT as usize - 1;

const USED_BIT: u32 = 1 << 31;

/// Occupancy of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
  Free,
  Used,
}

/// Decoded boundary tag.
///
/// Both tags of a block carry the same value. In the buffer a tag is a
/// little-endian `u32` whose high bit marks a used block and whose low 31 bits
/// hold the payload size.
///
/// ```text
///   31  30                                   0
///   ┌───┬─────────────────────────────────────┐
///   │ U │            payload size             │
///   └───┴─────────────────────────────────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
  pub size: usize,
  pub state: BlockState,
}

impl Tag {
  pub const fn free(size: usize) -> Self {
    Self {
      size,
      state: BlockState::Free,
    }
  }

  pub const fn used(size: usize) -> Self {
    Self {
      size,
      state: BlockState::Used,
    }
  }

  pub const fn is_free(&self) -> bool {
    matches!(self.state, BlockState::Free)
  }

  pub(crate) fn encode(self) -> [u8; TAG_WIDTH] {
    debug_assert!(self.size <= MAX_BLOCK_SIZE, "block size {} does not fit a tag", self.size);

    let raw = match self.state {
      BlockState::Free => self.size as u32,
      BlockState::Used => self.size as u32 | USED_BIT,
    };

    raw.to_le_bytes()
  }

  pub(crate) fn decode(bytes: [u8; TAG_WIDTH]) -> Self {
    let raw = u32::from_le_bytes(bytes);
    let size = (raw & !USED_BIT) as usize;

    if raw & USED_BIT == 0 {
      Self::free(size)
    } else {
      Self::used(size)
    }
  }
}

impl fmt::Display for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self.state {
      BlockState::Free => write!(f, "free({})", self.size),
      BlockState::Used => write!(f, "used({})", self.size),
    }
  }
}

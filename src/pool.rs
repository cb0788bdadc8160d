use std::{
  cell::UnsafeCell,
  fmt,
  marker::PhantomData,
  mem,
  ptr::{self, NonNull},
};

use tracing::{debug, error, trace};

use crate::{
  block_span,
  error::{PoolError, Result},
  tag::{BlockState, MAX_BLOCK_SIZE, TAG_WIDTH, Tag},
};

/// Whether every mutation is followed by a full consistency walk.
const VALIDATE: bool = cfg!(any(debug_assertions, feature = "validate"));

/// Backing storage. The lead pushes `bytes` to an address that is 4 modulo 8,
/// so the first payload (one tag in) starts 8-byte aligned.
#[repr(C, align(8))]
struct Arena<const N: usize> {
  _lead: [u8; TAG_WIDTH],
  bytes: [u8; N],
}

/// Fixed-capacity pool of `T` slots carved out of an `N` byte array.
///
/// Every block in the buffer is framed by a leading and a trailing boundary
/// tag holding the same [`Tag`]. Allocation is first-fit with splitting;
/// deallocation coalesces with both neighbours in constant time by reading the
/// tags right next to the freed block.
///
/// The pool hands out raw pointers into its own array, so it must stay in
/// place while any of them is in use. Dropping the pool does not drop values
/// still living in it.
pub struct BlockPool<T, const N: usize> {
  arena: UnsafeCell<Arena<N>>,
  _marker: PhantomData<T>,
}

impl<T, const N: usize> BlockPool<T, N> {
  const ELEMENT: usize = mem::size_of::<T>();

  /// Smallest free remainder worth splitting off.
  const MIN_REMAINDER: usize = Self::ELEMENT + 2 * TAG_WIDTH;

  /// Creates a pool whose whole buffer is one free block.
  ///
  /// Fails to compile when `N` cannot hold one `T` plus two tags, when `T` is
  /// zero-sized, or when `T` needs more than 8-byte alignment.
  pub fn new() -> Self {
    const {
      assert!(mem::size_of::<T>() > 0, "zero-sized types cannot be pooled");
      assert!(
        mem::align_of::<T>() <= 2 * TAG_WIDTH,
        "element alignment exceeds the payload alignment the pool guarantees"
      );
      assert!(
        N >= mem::size_of::<T>() + 2 * TAG_WIDTH,
        "capacity cannot hold one element and its two boundary tags"
      );
      assert!(N - 2 * TAG_WIDTH <= MAX_BLOCK_SIZE, "capacity exceeds the largest encodable block");
    }

    let pool = Self {
      arena: UnsafeCell::new(Arena {
        _lead: [0; TAG_WIDTH],
        bytes: [0; N],
      }),
      _marker: PhantomData,
    };

    let whole = Tag::free(N - 2 * TAG_WIDTH);
    pool.write_tag(0, whole);
    pool.write_tag(N - TAG_WIDTH, whole);
    pool.validate("new");

    pool
  }

  /// Size of the backing buffer in bytes.
  pub const fn capacity(&self) -> usize {
    N
  }

  /// Reserves room for `n` contiguous elements and returns a pointer to the
  /// first one. Nothing is written into the payload.
  ///
  /// ```rust
  /// use tagpool::{BlockPool, PoolError};
  ///
  /// let pool: BlockPool<u32, 100> = BlockPool::new();
  /// let slot = pool.allocate(1).unwrap();
  /// assert_eq!(pool.largest_free(), 80);
  ///
  /// assert_eq!(pool.allocate(0), Err(PoolError::EmptyRequest));
  /// pool.deallocate(slot);
  /// assert_eq!(pool.largest_free(), 92);
  /// ```
  pub fn allocate(
    &self,
    n: usize,
  ) -> Result<NonNull<T>> {
    if n == 0 {
      debug!("rejected empty allocation request");
      return Err(PoolError::EmptyRequest);
    }

    let Some(requested) = n.checked_mul(Self::ELEMENT) else {
      return Err(self.exhausted(n));
    };

    let Some(block) = self.blocks().find(|block| block.is_free() && block.size >= requested) else {
      return Err(self.exhausted(n));
    };

    match block.size.checked_sub(block_span!(requested)) {
      Some(remainder) if remainder >= Self::MIN_REMAINDER => {
        self.write_block(block.offset, Tag::used(requested));
        self.write_block(block.offset + block_span!(requested), Tag::free(remainder));
        trace!(offset = block.offset, requested, remainder, "split free block");
      }
      _ => {
        self.write_block(block.offset, Tag::used(block.size));
        trace!(
          offset = block.offset,
          size = block.size,
          requested,
          "handed out whole block"
        );
      }
    }

    debug!(offset = block.offset, count = n, bytes = requested, "allocated");
    self.validate("allocate");

    Ok(self.payload_ptr(block.offset))
  }

  /// Moves `value` into the slot at `p`.
  ///
  /// # Safety
  ///
  /// `p` must come from [`allocate`](Self::allocate) on this pool, must not
  /// have been deallocated since, and must not hold a live value.
  pub unsafe fn construct(
    &self,
    p: NonNull<T>,
    value: T,
  ) {
    debug_assert!(self.owns(p), "construct through a pointer outside the pool");

    unsafe { p.as_ptr().write(value) };
  }

  /// Drops the value at `p` in place, leaving the slot allocated.
  ///
  /// # Safety
  ///
  /// `p` must point at a value previously placed with
  /// [`construct`](Self::construct) and not destroyed since.
  pub unsafe fn destroy(
    &self,
    p: NonNull<T>,
  ) {
    debug_assert!(self.owns(p), "destroy through a pointer outside the pool");

    unsafe { ptr::drop_in_place(p.as_ptr()) };
  }

  /// Returns the block holding `p` to the pool and merges it with any free
  /// neighbour.
  ///
  /// # Panics
  ///
  /// Panics if `p` is not an aligned payload pointer into this pool's buffer,
  /// if the block in front of it is not marked used, or if that block's two
  /// tags disagree. A pointer into the middle of a payload is only caught
  /// with validation on (debug builds or the `validate` feature), which
  /// confirms the block start is reachable from offset 0.
  pub fn deallocate(
    &self,
    p: NonNull<T>,
  ) {
    let Some(payload) = self.payload_offset(p) else {
      contract_breach(format!(
        "deallocate of {p:?}, which is not a payload pointer of this pool"
      ));
    };

    let mut start = payload - TAG_WIDTH;
    let current = self.read_tag(start);

    if VALIDATE && !self.blocks().any(|block| block.offset == start) {
      contract_breach(format!(
        "deallocate at offset {payload}: not the start of a block payload"
      ));
    }

    if current.state != BlockState::Used {
      contract_breach(format!(
        "deallocate at offset {payload}: block is {current}, expected a used block"
      ));
    }

    let mut end = start + block_span!(current.size);

    if end > N || self.read_tag(end - TAG_WIDTH) != current {
      contract_breach(format!(
        "deallocate at offset {payload}: leading tag {current} has no matching trailing tag"
      ));
    }

    let mut size = current.size;

    if start > 0 {
      let previous = self.read_tag(start - TAG_WIDTH);
      if previous.is_free() {
        start -= block_span!(previous.size);
        size += block_span!(previous.size);
        trace!(offset = start, size = previous.size, "merging previous free block");
      }
    }

    if end < N {
      let next = self.read_tag(end);
      if next.is_free() {
        trace!(offset = end, size = next.size, "merging next free block");
        end += block_span!(next.size);
        size += block_span!(next.size);
      }
    }

    let merged = Tag::free(size);
    self.write_tag(start, merged);
    self.write_tag(end - TAG_WIDTH, merged);

    debug!(offset = start, size, "deallocated");
    self.validate("deallocate");
  }

  /// Total payload bytes across all free blocks.
  pub fn free_bytes(&self) -> usize {
    self.blocks().filter(|block| block.is_free()).map(|block| block.size).sum()
  }

  /// Payload size of the largest free block, zero when everything is in use.
  pub fn largest_free(&self) -> usize {
    self
      .blocks()
      .filter(|block| block.is_free())
      .map(|block| block.size)
      .max()
      .unwrap_or(0)
  }

  /// Number of blocks, free and used, the buffer is currently split into.
  pub fn block_count(&self) -> usize {
    self.blocks().count()
  }

  /// Whether `p` falls inside the payload range of this pool's buffer.
  pub fn owns(
    &self,
    p: NonNull<T>,
  ) -> bool {
    self.payload_offset(p).is_some()
  }

  pub(crate) fn read_tag(
    &self,
    offset: usize,
  ) -> Tag {
    assert!(offset <= N - TAG_WIDTH, "tag read at offset {offset} is outside the buffer");

    // SAFETY: the range was checked against the buffer above and the read is bytewise.
    let bytes = unsafe { ptr::read_unaligned(self.base().add(offset).cast::<[u8; TAG_WIDTH]>()) };

    Tag::decode(bytes)
  }

  fn write_tag(
    &self,
    offset: usize,
    tag: Tag,
  ) {
    assert!(offset <= N - TAG_WIDTH, "tag write at offset {offset} is outside the buffer");

    // SAFETY: the range was checked against the buffer above and the write is bytewise.
    unsafe {
      ptr::write_unaligned(
        self.base().add(offset).cast::<[u8; TAG_WIDTH]>(),
        tag.encode(),
      )
    };
  }

  /// Writes both tags of the block starting at `offset`.
  fn write_block(
    &self,
    offset: usize,
    tag: Tag,
  ) {
    self.write_tag(offset, tag);
    self.write_tag(offset + TAG_WIDTH + tag.size, tag);
  }

  fn base(&self) -> *mut u8 {
    // SAFETY: the cell pointer is valid for as long as `self` is; no reference is created.
    unsafe { (&raw mut (*self.arena.get()).bytes).cast::<u8>() }
  }

  fn payload_ptr(
    &self,
    block: usize,
  ) -> NonNull<T> {
    let payload = self.base().wrapping_add(block + TAG_WIDTH).cast::<T>();
    debug_assert!(payload.is_aligned(), "payload at offset {} is misaligned", block + TAG_WIDTH);

    // SAFETY: derived from the arena's address, which is never null.
    unsafe { NonNull::new_unchecked(payload) }
  }

  fn payload_offset(
    &self,
    p: NonNull<T>,
  ) -> Option<usize> {
    let offset = (p.as_ptr() as usize).checked_sub(self.base() as usize)?;

    // Block starts are multiples of the element alignment.
    let aligned = (offset.wrapping_sub(TAG_WIDTH)) % mem::align_of::<T>() == 0;

    ((TAG_WIDTH..=N - TAG_WIDTH).contains(&offset) && aligned).then_some(offset)
  }

  fn exhausted(
    &self,
    count: usize,
  ) -> PoolError {
    let largest_free = self.largest_free();
    debug!(count, largest_free, "no free block large enough");

    PoolError::Exhausted { count, largest_free }
  }

  fn validate(
    &self,
    operation: &str,
  ) {
    if !VALIDATE {
      return;
    }

    let violations = self.consistency_report();
    if !violations.is_empty() {
      error!(operation, ?violations, "boundary tags are inconsistent");
      panic!("buffer inconsistent after {operation}: {violations:?}");
    }
  }
}

#[cold]
#[track_caller]
fn contract_breach(message: String) -> ! {
  error!("{message}");
  panic!("{message}");
}

impl<T, const N: usize> Default for BlockPool<T, N> {
  fn default() -> Self {
    Self::new()
  }
}

/// Pools are interchangeable: any two compare equal.
impl<T, const N: usize> PartialEq for BlockPool<T, N> {
  fn eq(
    &self,
    _other: &Self,
  ) -> bool {
    true
  }
}

impl<T, const N: usize> Eq for BlockPool<T, N> {}

impl<T, const N: usize> fmt::Debug for BlockPool<T, N> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("BlockPool")
      .field("capacity", &N)
      .field("blocks", &self.blocks().collect::<Vec<_>>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, rc::Rc};

  use super::*;
  use crate::check::Block;

  type Pool = BlockPool<u32, 100>;

  fn layout<T, const N: usize>(pool: &BlockPool<T, N>) -> Vec<(usize, Tag)> {
    pool
      .blocks()
      .map(|block| (block.offset, Tag { size: block.size, state: block.state }))
      .collect()
  }

  fn offset_of<T, const N: usize>(
    pool: &BlockPool<T, N>,
    p: NonNull<T>,
  ) -> usize {
    p.as_ptr() as usize - pool.base() as usize
  }

  /// Writes `tag` at `offset` bytes from a payload pointer, bypassing the pool.
  unsafe fn overwrite_tag(
    payload: NonNull<u32>,
    offset: usize,
    tag: Tag,
  ) {
    unsafe {
      payload
        .cast::<u8>()
        .add(offset)
        .cast::<[u8; TAG_WIDTH]>()
        .write_unaligned(tag.encode())
    };
  }

  #[test]
  fn test_new_pool_is_one_free_block() {
    let pool = Pool::new();

    assert_eq!(layout(&pool), vec![(0, Tag::free(92))]);
    assert_eq!(pool.capacity(), 100);
    assert_eq!(pool.free_bytes(), 92);
    assert!(pool.is_consistent());
  }

  #[test]
  fn test_allocate_splits_first_free_block() {
    let pool = Pool::new();

    let p = pool.allocate(1).unwrap();

    assert_eq!(offset_of(&pool, p), TAG_WIDTH);
    assert_eq!(layout(&pool), vec![(0, Tag::used(4)), (12, Tag::free(80))]);
    assert!(pool.is_consistent());
  }

  #[test]
  fn test_deallocate_merges_back_into_initial_block() {
    let pool = Pool::new();

    let p = pool.allocate(1).unwrap();
    pool.deallocate(p);

    assert_eq!(layout(&pool), vec![(0, Tag::free(92))]);
  }

  #[test]
  fn test_deallocate_next_to_used_block_does_not_merge() {
    let pool = Pool::new();

    let first = pool.allocate(1).unwrap();
    let _second = pool.allocate(1).unwrap();
    pool.deallocate(first);

    assert_eq!(
      layout(&pool),
      vec![(0, Tag::free(4)), (12, Tag::used(4)), (24, Tag::free(68))]
    );

    // First fit goes back to the hole at the front.
    let third = pool.allocate(1).unwrap();
    assert_eq!(third, first);
    assert_eq!(layout(&pool)[0], (0, Tag::used(4)));
  }

  #[test]
  fn test_empty_request_is_rejected_without_change() {
    let pool = Pool::new();
    let _p = pool.allocate(2).unwrap();
    let before = layout(&pool);

    assert_eq!(pool.allocate(0), Err(PoolError::EmptyRequest));
    assert_eq!(layout(&pool), before);
    assert!(pool.is_consistent());
  }

  #[test]
  fn test_exact_fit_hands_out_whole_block() {
    let pool = Pool::new();

    let p = pool.allocate(23).unwrap();

    assert_eq!(layout(&pool), vec![(0, Tag::used(92))]);
    assert_eq!(
      pool.allocate(1),
      Err(PoolError::Exhausted {
        count: 1,
        largest_free: 0
      })
    );

    pool.deallocate(p);
    assert_eq!(layout(&pool), vec![(0, Tag::free(92))]);
  }

  #[test]
  fn test_small_remainder_is_donated() {
    // 92 - 76 - 8 = 8 bytes left over, short of one element plus two tags.
    let pool = Pool::new();
    pool.allocate(19).unwrap();
    assert_eq!(layout(&pool), vec![(0, Tag::used(92))]);

    // 92 - 72 - 8 = 12 bytes left over, exactly the minimum.
    let pool = Pool::new();
    pool.allocate(18).unwrap();
    assert_eq!(layout(&pool), vec![(0, Tag::used(72)), (80, Tag::free(12))]);
  }

  #[test]
  fn test_exhaustion_leaves_buffer_untouched() {
    let pool = Pool::new();
    let _p = pool.allocate(10).unwrap();
    let before = layout(&pool);

    assert_eq!(
      pool.allocate(20),
      Err(PoolError::Exhausted {
        count: 20,
        largest_free: 44
      })
    );
    assert_eq!(
      pool.allocate(usize::MAX),
      Err(PoolError::Exhausted {
        count: usize::MAX,
        largest_free: 44
      })
    );
    assert_eq!(layout(&pool), before);
  }

  #[test]
  fn test_deallocate_merges_both_neighbours() {
    let pool = Pool::new();

    let a = pool.allocate(1).unwrap();
    let b = pool.allocate(1).unwrap();
    let c = pool.allocate(1).unwrap();

    pool.deallocate(a);
    pool.deallocate(c);
    assert_eq!(
      layout(&pool),
      vec![(0, Tag::free(4)), (12, Tag::used(4)), (24, Tag::free(68))]
    );

    pool.deallocate(b);
    assert_eq!(layout(&pool), vec![(0, Tag::free(92))]);
  }

  #[test]
  fn test_last_block_has_no_next_neighbour() {
    let pool = Pool::new();

    let a = pool.allocate(1).unwrap();
    let b = pool.allocate(1).unwrap();
    // Takes the remaining 68 bytes as a whole block ending at the buffer edge.
    let c = pool.allocate(17).unwrap();
    assert_eq!(layout(&pool).last(), Some(&(24, Tag::used(68))));

    pool.deallocate(c);
    assert_eq!(layout(&pool).last(), Some(&(24, Tag::free(68))));

    pool.deallocate(a);
    pool.deallocate(b);
    assert_eq!(layout(&pool), vec![(0, Tag::free(92))]);
  }

  #[test]
  fn test_payloads_are_aligned_for_wide_types() {
    let pool: BlockPool<u64, 256> = BlockPool::new();

    let a = pool.allocate(1).unwrap();
    let b = pool.allocate(3).unwrap();
    pool.deallocate(a);
    let c = pool.allocate(2).unwrap();

    for p in [b, c] {
      assert_eq!(p.as_ptr() as usize % mem::align_of::<u64>(), 0);
    }
  }

  #[test]
  fn test_construct_and_destroy_round_trip() {
    let pool: BlockPool<Rc<Cell<u32>>, 128> = BlockPool::new();
    let shared = Rc::new(Cell::new(7));

    let p = pool.allocate(1).unwrap();
    unsafe {
      pool.construct(p, Rc::clone(&shared));
      assert_eq!(Rc::strong_count(&shared), 2);

      p.as_ref().set(11);
      pool.destroy(p);
    }

    assert_eq!(Rc::strong_count(&shared), 1);
    assert_eq!(shared.get(), 11);

    let before = pool.largest_free();
    pool.deallocate(p);
    assert!(pool.largest_free() >= before);
    assert_eq!(pool.allocate(1).unwrap(), p);
  }

  #[test]
  fn test_array_allocation_holds_every_element() {
    let pool: BlockPool<u16, 64> = BlockPool::new();

    let p = pool.allocate(6).unwrap();
    unsafe {
      for i in 0..6 {
        pool.construct(p.add(i), (i as u16 + 1) * 10);
      }
      for i in 0..6 {
        assert_eq!(*p.add(i).as_ptr(), (i as u16 + 1) * 10);
      }
    }
    assert!(pool.is_consistent());
  }

  #[test]
  #[should_panic(expected = "expected a used block")]
  fn test_double_deallocate_panics() {
    let pool = Pool::new();
    let a = pool.allocate(1).unwrap();
    let _b = pool.allocate(1).unwrap();

    pool.deallocate(a);
    pool.deallocate(a);
  }

  #[test]
  #[should_panic(expected = "not a payload pointer of this pool")]
  fn test_foreign_pointer_panics() {
    let pool = Pool::new();
    let other = Pool::new();

    let p = other.allocate(1).unwrap();
    pool.deallocate(p);
  }

  #[test]
  #[should_panic(expected = "not a payload pointer of this pool")]
  fn test_misaligned_pointer_panics() {
    let pool = Pool::new();

    let p = pool.allocate(2).unwrap();
    let skewed = unsafe { p.cast::<u8>().add(1) }.cast::<u32>();
    pool.deallocate(skewed);
  }

  #[test]
  #[cfg(any(debug_assertions, feature = "validate"))]
  #[should_panic(expected = "not the start of a block payload")]
  fn test_interior_pointer_panics() {
    let pool = Pool::new();

    let p = pool.allocate(4).unwrap();
    // The second element now reads like the leading tag of a used block.
    unsafe {
      pool.construct(p.add(1), u32::from_le_bytes(Tag::used(4).encode()));
      pool.deallocate(p.add(2));
    }
  }

  #[test]
  #[should_panic(expected = "no matching trailing tag")]
  fn test_deallocate_with_corrupt_trailing_tag_panics() {
    let pool = Pool::new();

    let p = pool.allocate(1).unwrap();
    unsafe { overwrite_tag(p, 4, Tag::used(8)) };
    pool.deallocate(p);
  }

  #[test]
  #[cfg(any(debug_assertions, feature = "validate"))]
  #[should_panic(expected = "buffer inconsistent after allocate")]
  fn test_allocate_over_corrupt_buffer_panics() {
    let pool = Pool::new();

    let p = pool.allocate(1).unwrap();
    unsafe { overwrite_tag(p, 4, Tag::used(8)) };
    let _ = pool.allocate(1);
  }

  #[test]
  fn test_owns() {
    let pool = Pool::new();
    let other = Pool::new();

    let p = pool.allocate(1).unwrap();
    let q = other.allocate(1).unwrap();

    assert!(pool.owns(p));
    assert!(!pool.owns(q));
  }

  #[test]
  fn test_pools_compare_equal() {
    let a = Pool::new();
    let b = Pool::default();
    let _p = a.allocate(4).unwrap();

    assert!(a == b);
    assert!(!(a != b));
  }

  #[test]
  fn test_debug_lists_blocks() {
    let pool = Pool::new();
    pool.allocate(1).unwrap();

    let rendered = format!("{pool:?}");
    assert!(rendered.contains("capacity: 100"));
    assert_eq!(
      pool.blocks().next(),
      Some(Block {
        offset: 0,
        size: 4,
        state: BlockState::Used
      })
    );
  }
}

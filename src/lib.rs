//! # tagpool - A Fixed-Capacity Boundary-Tag Pool
//!
//! This crate provides a **block pool**: an allocator that hands out
//! variably-sized runs of `T` slots from one fixed byte array, never touching
//! the system heap.
//!
//! ## Overview
//!
//! The buffer is always a gapless sequence of blocks. Every block carries its
//! size and state twice, once in front of the payload and once behind it:
//!
//! ```text
//!   Buffer of N bytes:
//!
//!   ┌─────┬──────────┬─────┬─────┬──────────────────────────────┬─────┐
//!   │ U 4 │ payload  │ U 4 │ F 80│          free space          │ F 80│
//!   └─────┴──────────┴─────┴─────┴──────────────────────────────┴─────┘
//!   0     4          8     12    16                             96    100
//!         ▲
//!         └── Pointer returned to the caller
//!
//!   U = used, F = free, number = payload bytes between the two tags.
//! ```
//!
//! Because the tag behind a block sits right before the next block's
//! leading tag, a block being released can look at both neighbours without
//! walking the buffer:
//!
//! ```text
//!   Deallocate the middle block:
//!
//!   ┌────┬───┬────┐┌────┬───┬────┐┌────┬───┬────┐
//!   │ F 4│   │ F 4││ U 4│   │ U 4││F 68│   │F 68│
//!   └────┴───┴────┘└────┴───┴────┘└────┴───┴────┘
//!                ▲                ▲
//!        previous trailing    next leading
//!
//!   Result, one free block spanning all three:
//!
//!   ┌────┬─────────────────────────────────────┬────┐
//!   │F 92│                                     │F 92│
//!   └────┴─────────────────────────────────────┴────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagpool
//!   ├── span   - block_span! macro (payload + both tags)
//!   ├── tag    - Tag / BlockState and their in-buffer encoding
//!   ├── pool   - BlockPool: allocate, construct, destroy, deallocate
//!   ├── check  - Block iterator and consistency walk
//!   └── error  - PoolError and Violation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagpool::BlockPool;
//!
//! let pool: BlockPool<u64, 256> = BlockPool::new();
//!
//! let slot = pool.allocate(1).unwrap();
//! unsafe {
//!     pool.construct(slot, 42);
//!     assert_eq!(*slot.as_ptr(), 42);
//!     pool.destroy(slot);
//! }
//! pool.deallocate(slot);
//!
//! assert!(pool.is_consistent());
//! assert_eq!(pool.block_count(), 1);
//! ```
//!
//! ## Policies
//!
//! - **First fit**: the first free block large enough wins.
//! - **Split**: the chosen block is cut to size when the leftover can hold one
//!   element plus two tags of its own; otherwise the caller gets all of it.
//! - **Coalesce**: a freed block absorbs a free predecessor and a free
//!   successor, so no two free blocks are ever adjacent.
//!
//! ## Validation
//!
//! Debug builds, and release builds with the `validate` feature, re-check the
//! whole buffer after every mutation and panic on the first inconsistency.
//! The same walk is available on demand through
//! [`BlockPool::consistency_report`].
//!
//! ## Limitations
//!
//! - **Single-threaded only**: the pool is `!Sync`
//! - **Fixed size**: the buffer never grows
//! - **Alignment**: element types may need at most 8-byte alignment
//! - **Pinned by use**: moving the pool invalidates the pointers it handed out

pub mod span;

mod check;
mod error;
mod pool;
mod tag;

pub use check::{Block, Blocks};
pub use error::{PoolError, Result, Violation};
pub use pool::BlockPool;
pub use tag::{BlockState, MAX_BLOCK_SIZE, TAG_WIDTH, Tag};

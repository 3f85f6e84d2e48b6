#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A thread-safe pool of fixed-layout memory chunks, carved out of memory-mapped segments that are
//! returned to the operating system once they drain.
//!
//! This crate provides [`SegmentPool`], a dynamically growing pool that hands out raw memory for
//! objects of one [`std::alloc::Layout`] chosen at pool creation. Memory comes from anonymous
//! memory mappings ("segments"), each divided into equally sized chunks. Free chunks from all
//! segments are kept on one shared free list, so allocating and freeing are constant-time
//! operations except when a segment has to be mapped or released.
//!
//! # Key Features
//!
//! - **Fixed layout**: Every chunk fits one item of the layout the pool was built with
//! - **Stable memory addresses**: Chunks never move while allocated
//! - **Thread-safe**: One pool can be shared by any number of threads
//! - **Returns memory to the OS**: Segments without allocated chunks are unmapped
//! - **Configurable reuse order**: [`ReclaimOrder`] picks between cache-warm LIFO reuse and FIFO
//!   reuse of freed chunks
//! - **Configurable purge timing**: [`PurgeTiming`] releases drained segments immediately or only
//!   on an explicit [`SegmentPool::purge()`] call
//! - **Recoverable exhaustion**: A failed mapping is reported as [`AllocError::OutOfMemory`] and
//!   leaves the pool unchanged
//!
//! The pool never creates references to the memory it hands out and never constructs or drops
//! values in it. Callers own the contents of their chunks.
//!
//! # Examples
//!
//! ## Basic Usage
//!
//! ```rust
//! use segment_pool::SegmentPool;
//!
//! let pool = SegmentPool::builder().layout_of::<u64>().build();
//!
//! let ptr = pool.allocate().unwrap().cast::<u64>();
//!
//! // SAFETY: The chunk is aligned and large enough for a u64 and nobody else has it.
//! unsafe { ptr.write(1234) };
//!
//! assert_eq!(pool.used_objects(), 1);
//!
//! // SAFETY: The pointer came from this pool and is freed exactly once.
//! unsafe { pool.free(ptr.cast()) };
//!
//! // The only segment drained, so it has already been returned to the operating system.
//! assert_eq!(pool.segment_count(), 0);
//! ```
//!
//! ## Deferred Purge
//!
//! ```rust
//! use std::num::NonZero;
//!
//! use segment_pool::{PurgeTiming, ReclaimOrder, SegmentPool};
//!
//! let pool = SegmentPool::builder()
//!     .layout_of::<[u8; 40]>()
//!     .chunks_per_segment(NonZero::new(100).unwrap())
//!     .reclaim_order(ReclaimOrder::FirstInFirstOut)
//!     .purge_timing(PurgeTiming::Deferred)
//!     .build();
//!
//! let ptrs: Vec<_> = (0..250).map(|_| pool.allocate().unwrap()).collect();
//! assert_eq!(pool.segment_count(), 3);
//!
//! for ptr in ptrs {
//!     // SAFETY: Every pointer came from this pool and is freed exactly once.
//!     unsafe { pool.free(ptr) };
//! }
//!
//! // Drained segments stay mapped until purged.
//! assert_eq!(pool.segment_count(), 3);
//! assert_eq!(pool.purge(), 3);
//! assert_eq!(pool.segment_count(), 0);
//! ```
//!
//! ## Sharing Between Threads
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use segment_pool::SegmentPool;
//!
//! let pool = Arc::new(SegmentPool::builder().layout_of::<u32>().build());
//!
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let pool = Arc::clone(&pool);
//!
//!         thread::spawn(move || {
//!             let ptr = pool.allocate().unwrap();
//!             // SAFETY: The pointer came from this pool and is freed exactly once.
//!             unsafe { pool.free(ptr) };
//!         })
//!     })
//!     .collect();
//!
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//!
//! assert!(pool.is_empty());
//! ```

mod builder;
mod chunk;
mod constants;
mod error;
mod free_list;
mod layout;
mod mapping;
mod pal;
mod policy;
mod pool;
mod segment;
mod segment_table;
mod stats;

pub use builder::*;
pub use error::*;
pub use policy::*;
pub use pool::SegmentPool;
pub use stats::PoolStats;

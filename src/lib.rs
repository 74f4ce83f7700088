//! # rheap - An Inspectable Arena Allocator
//!
//! This crate provides an explicitly instantiated **arena allocator** built
//! directly on anonymous `mmap(2)` mappings. Every [`Arena`] is independent:
//! it owns its memory, tracks every live allocation, and can tell you at any
//! point what is still outstanding.
//!
//! ## Overview
//!
//! An arena hands out memory from two places:
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                        GROWABLE REGION                               │
//!   │                                                                      │
//!   │   ┌─────┬──────┬─────┬────────┬────────────────────────┬─────────┐   │
//!   │   │ A1  │ free │ A2  │   A3   │   free (wilderness)    │no access│   │
//!   │   └─────┴──────┴─────┴────────┴────────────────────────┴─────────┘   │
//!   │   ▲                                                    ▲         ▲   │
//!   │   │                                                    │         │   │
//!   │  base                                        committed end  reserved │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   ┌──────────────┐   ┌────────────────────────┐
//!   │  mapped L1   │   │        mapped L2       │   one mapping per
//!   └──────────────┘   └────────────────────────┘   large request
//! ```
//!
//! - Requests below the **mmap threshold** (8 pages by default) are carved
//!   out of the growable region. Free space is split on allocation and
//!   coalesced with its neighbours on release, so two adjacent free chunks
//!   never coexist.
//! - Requests at or above the threshold get their own mapping, which is
//!   never split, merged, or mixed with region memory, and is unmapped as
//!   soon as it is released.
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── chunk      - Chunk records, splitting and coalescing (internal)
//!   ├── region     - The growable region (internal)
//!   ├── mapped     - Dedicated mappings for large blocks (internal)
//!   ├── os         - mmap/munmap/sysconf wrappers (internal)
//!   ├── resize     - In-place growth, shrink and relocation (internal)
//!   ├── arena      - Arena, the public entry point
//!   ├── leak       - Leak registry
//!   ├── config     - ArenaConfig
//!   ├── stats      - ArenaStats
//!   └── error      - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::Arena;
//!
//! let mut arena = Arena::create().unwrap();
//!
//! unsafe {
//!     // Allocate memory for a u64
//!     let ptr = arena.allocate(8).unwrap().as_ptr() as *mut u64;
//!
//!     // Use the memory
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     // Grow it; the value survives even if the block moves
//!     let ptr = arena.resize(ptr as *mut u8, 64).unwrap().as_ptr() as *mut u64;
//!     assert_eq!(ptr.read(), 42);
//!
//!     // Free the memory
//!     arena.release(ptr as *mut u8);
//! }
//!
//! assert!(arena.check_leaks().is_empty());
//! arena.destroy().unwrap();
//! ```
//!
//! ## How It Works
//!
//! The region reserves a large range of address space once, with no access
//! rights, and commits whole pages from its start as it needs them. Since
//! the range never moves, growing the region never invalidates a pointer:
//!
//! ```text
//!   Growth:
//!
//!   before   ┌──────┬──────┬───────────┬───────────────────────────────┐
//!            │ used │ used │   free    │            reserved           │
//!            └──────┴──────┴───────────┴───────────────────────────────┘
//!
//!   after    ┌──────┬──────┬───────────────────────────┬───────────────┐
//!            │ used │ used │      free (wilderness)    │    reserved   │
//!            └──────┴──────┴───────────────────────────┴───────────────┘
//!                                                      ▲
//!                                                      └── new committed end
//! ```
//!
//! Chunk metadata is not stored next to user data. The arena keeps a record
//! per chunk keyed by its offset in the region, so releasing or resizing a
//! pointer is a lookup, and user writes can never clobber bookkeeping.
//!
//! Allocation looks for space in a fixed order:
//!
//! 1. the **wilderness**, the free chunk touching the committed end;
//! 2. the lowest addressed free chunk that fits;
//! 3. new pages, which extend the wilderness.
//!
//! ## Features
//!
//! - **In-place resize**: shrinking frees the tail, growing absorbs a free
//!   successor or extends the region when the block is at its end
//! - **Leak accounting**: [`Arena::check_leaks`] lists every live
//!   allocation, [`Arena::report_leaks`] streams them to a callback
//! - **Introspection**: [`Arena::stats`], [`Arena::usable_size`],
//!   [`Arena::region_contains`]
//! - **Best-effort teardown**: [`Arena::destroy`] unmaps everything even if
//!   allocations are still live
//!
//! ## Limitations
//!
//! - **Single-threaded per arena**: `Arena` is `Send` but not `Sync`
//! - **Region never shrinks**: freed region memory is kept for reuse until
//!   the arena is destroyed
//! - **Word alignment only**: pointers are aligned to `usize`
//! - **Unix-only**: requires `libc` and anonymous `mmap`
//!
//! ## Safety
//!
//! Allocation is safe. Releasing and resizing take raw pointers and are
//! `unsafe`: the caller promises the pointer came from the same arena and is
//! not used after it is released or moved. Pointers dangle once the arena is
//! destroyed.

pub mod align;
mod arena;
mod chunk;
mod config;
mod error;
mod leak;
mod mapped;
mod os;
mod region;
mod resize;
mod stats;

pub use arena::Arena;
pub use config::ArenaConfig;
pub use error::{HeapError, Result};
pub use leak::Leak;
pub use stats::ArenaStats;

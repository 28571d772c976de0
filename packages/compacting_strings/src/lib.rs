#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Off-row storage for variable-length values in an in-memory row store.
//!
//! Rows keep a fixed-width pointer to a [`StringRef`] instead of the value itself. The handle
//! never moves, while the bytes it refers to live in a [`CompactingPool`] that is free to move
//! them around to stay densely packed. Every relocation is pushed back into the handle through a
//! back-pointer stored next to the bytes, so rows never see a stale address.
//!
//! # Components
//!
//! * [`StringRef`] - the stable-address handle, owned through a [`PooledStringRef`].
//! * [`CompactingPool`] - stores the blocks of one [`SizeClass`], compacting on every free by
//!   moving the last live block into the hole.
//! * [`PoolRegistry`] - one per thread, routes each size to its pool and creates pools on demand.
//! * [`Arena`] - bump allocator for temporary strings that are reclaimed all at once.
//!
//! # Examples
//!
//! Destroying a string relocates the last string of the same size class into the vacated block.
//! Handles are updated transparently:
//!
//! ```
//! use compacting_strings::PoolRegistry;
//!
//! let registry = PoolRegistry::new();
//!
//! let mut hello = registry.create(10).unwrap();
//! hello.write(|bytes| bytes.copy_from_slice(b"HELLOWORLD"));
//!
//! let mut goodbye = registry.create(10).unwrap();
//! goodbye.write(|bytes| bytes.copy_from_slice(b"GOODBYEFLY"));
//!
//! let before = goodbye.get();
//! hello.destroy();
//!
//! // The bytes moved, the handle followed them.
//! assert_ne!(goodbye.get(), before);
//! goodbye.read(|bytes| assert_eq!(bytes, b"GOODBYEFLY"));
//! ```
//!
//! Temporary strings for scratch work are carved out of an arena and never destroyed one by one:
//!
//! ```
//! use compacting_strings::{Arena, StringRef};
//!
//! let mut arena = Arena::new();
//!
//! for i in 0..10_u8 {
//!     let scratch = StringRef::create_temporary(4, &arena).unwrap();
//!     scratch.write(|bytes| bytes.fill(i));
//! }
//!
//! arena.reset();
//! assert_eq!(arena.allocated_bytes(), 0);
//! ```
//!
//! # Threading
//!
//! Pools, registries and handles belong to the thread that created them and the types are
//! neither `Send` nor `Sync`. No locking is involved. An [`Arena`] may be moved to another
//! thread as long as nothing borrows from it.

mod arena;
mod builder;
mod drop_policy;
mod error;
mod pool;
mod registry;
mod size_class;
mod string_ref;

pub use arena::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use pool::*;
pub use registry::*;
pub use size_class::*;
pub use string_ref::*;

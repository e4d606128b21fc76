//! magkit: slab-and-magazine object cache engine.
//!
//! Per-CPU magazine pairs over a locked depot of full/empty magazines,
//! a bufctl hash table for object lookup and audit, contention-driven
//! magazine resizing, and a periodic maintenance pass with working-set
//! reaping. See `DESIGN.md` for internal architecture and invariants.
//!
//! ```
//! use magkit::builder::CacheBuilder;
//! use magkit::registry::CacheRegistry;
//! use magkit::types::AllocMode;
//!
//! let registry = CacheRegistry::with_defaults();
//! registry.start();
//!
//! let cache = CacheBuilder::new("widgets", 96).build(&registry);
//! let obj = cache.alloc(AllocMode::Sleep).unwrap();
//! cache.free(obj);
//!
//! cache.reap_now(true);
//! cache.destroy();
//! ```

pub mod builder;
pub mod cache;
pub mod ds;
pub mod error;
pub mod region;
pub mod registry;
pub mod stats;
pub mod types;

mod bufctl;
mod cpu;
mod depot;
mod magazine;

pub mod prelude;

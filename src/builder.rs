//! Cache builder: the one way to create an [`ObjCache`].
//!
//! Collects name, geometry, callbacks, flags, and an optional backing
//! region, then wires the cache into a registry. Closure capture stands in
//! for the traditional private-context pointer: anything the constructor
//! or destructor needs rides in the closure.
//!
//! ## Example
//!
//! ```
//! use magkit::builder::CacheBuilder;
//! use magkit::registry::CacheRegistry;
//! use magkit::types::{AllocMode, CacheFlags};
//!
//! let registry = CacheRegistry::with_defaults();
//! registry.start();
//!
//! let cache = CacheBuilder::new("connections", 192)
//!     .align(64)
//!     .flags(CacheFlags::BATCH)
//!     .build(&registry);
//!
//! let obj = cache.alloc(AllocMode::Sleep).unwrap();
//! cache.free(obj);
//! cache.reap_now(true);
//! cache.destroy();
//! ```

use std::sync::Arc;

use crate::cache::ObjCache;
use crate::error::CtorError;
use crate::region::SlabProvider;
use crate::registry::CacheRegistry;
use crate::types::{AllocMode, CacheFlags, Ctor, Dtor, ObjRef, Reclaim, MIN_ALIGN};

/// Resolved build parameters handed to the cache controller.
pub(crate) struct CacheSpec {
    pub(crate) name: String,
    pub(crate) bufsize: usize,
    pub(crate) bufalign: usize,
    pub(crate) flags: CacheFlags,
    pub(crate) ctor: Option<Ctor>,
    pub(crate) dtor: Option<Dtor>,
    pub(crate) reclaim: Option<Reclaim>,
    pub(crate) region: Option<Arc<dyn SlabProvider>>,
}

/// Builder for [`ObjCache`] instances.
///
/// Configuration mistakes (zero size, non-power-of-two alignment, a chunk
/// that does not fit the region's objects) are fatal at
/// [`build`](CacheBuilder::build) — caches are created during subsystem
/// bring-up, not per request, and a misconfigured cache cannot be limped
/// past.
pub struct CacheBuilder {
    name: String,
    bufsize: usize,
    bufalign: usize,
    flags: CacheFlags,
    ctor: Option<Ctor>,
    dtor: Option<Dtor>,
    reclaim: Option<Reclaim>,
    region: Option<Arc<dyn SlabProvider>>,
}

impl CacheBuilder {
    /// Starts a builder for objects of `bufsize` bytes.
    pub fn new(name: impl Into<String>, bufsize: usize) -> Self {
        Self {
            name: name.into(),
            bufsize,
            bufalign: MIN_ALIGN,
            flags: CacheFlags::NONE,
            ctor: None,
            dtor: None,
            reclaim: None,
            region: None,
        }
    }

    /// Requests a minimum object alignment (power of two).
    pub fn align(mut self, bufalign: usize) -> Self {
        self.bufalign = bufalign;
        self
    }

    /// Sets mode flags. Flags implied by construction (pseudo regions,
    /// small-object clear-on-free, registry-wide audit) are added on top.
    pub fn flags(mut self, flags: CacheFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Registers an object constructor, run once per raw slab object.
    pub fn ctor(
        mut self,
        f: impl Fn(ObjRef, AllocMode) -> Result<(), CtorError> + Send + Sync + 'static,
    ) -> Self {
        self.ctor = Some(Arc::new(f));
        self
    }

    /// Registers an object destructor, run when objects return to the
    /// slab layer.
    pub fn dtor(mut self, f: impl Fn(ObjRef) + Send + Sync + 'static) -> Self {
        self.dtor = Some(Arc::new(f));
        self
    }

    /// Registers a reclaim notification, invoked ahead of reaps; implies
    /// [`CacheFlags::RECLAIM`].
    pub fn reclaim(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.reclaim = Some(Arc::new(f));
        self
    }

    /// Supplies the backing region. Without one the cache gets a private
    /// pseudo region sized for exactly its chunk, plus implied
    /// `PSEUDO | DYNAMIC | CLEARONFREE`.
    pub fn region(mut self, region: Arc<dyn SlabProvider>) -> Self {
        self.region = Some(region);
        self
    }

    /// Creates the cache and registers it. Panics on configuration errors
    /// (see type-level docs).
    pub fn build(self, registry: &Arc<CacheRegistry>) -> Arc<ObjCache> {
        ObjCache::create(
            CacheSpec {
                name: self.name,
                bufsize: self.bufsize,
                bufalign: self.bufalign,
                flags: self.flags,
                ctor: self.ctor,
                dtor: self.dtor,
                reclaim: self.reclaim,
                region: self.region,
            },
            registry,
        )
    }
}

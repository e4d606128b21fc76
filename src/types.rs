//! Core value types shared across the engine: object handles, allocation
//! modes, cache mode flags, and callback signatures.

use std::fmt;
use std::sync::Arc;

use crate::error::CtorError;

/// Minimum object alignment the engine guarantees.
pub const MIN_ALIGN: usize = 8;

/// Cache-line granularity used when rounding chunk sizes.
pub const CACHE_LINE: usize = 64;

/// Opaque handle to a cache-managed object.
///
/// An `ObjRef` wraps the address of a fixed-size chunk carved from a slab.
/// Clients receive it from [`alloc`](crate::cache::ObjCache::alloc), hold it
/// for the lifetime of the object, and hand it back to
/// [`free`](crate::cache::ObjCache::free). The engine hashes the address to
/// find the object's bufctl; the backing bytes are owned by the slab
/// provider, never dereferenced through this handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) usize);

impl ObjRef {
    /// Returns the raw chunk address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.0)
    }
}

/// Blocking behavior of an allocation request.
///
/// `Sleep` requests may block waiting for backing memory (the normal-region
/// provider will carve a fresh slab). `NoSleep` requests must not block and
/// fail outright when no cached or already-carved object is available —
/// used by paths that cannot sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// The request may block on the slab provider.
    Sleep,
    /// The request must not block; fails instead.
    NoSleep,
}

impl AllocMode {
    /// Returns `true` if the request is allowed to block.
    #[inline]
    pub fn can_block(self) -> bool {
        matches!(self, AllocMode::Sleep)
    }
}

/// Cache mode bit-set.
///
/// Combined with `|`; queried with [`contains`](CacheFlags::contains).
/// Some bits are implied by construction: a cache built without a region
/// gets `PSEUDO | DYNAMIC | CLEARONFREE`, and small objects get
/// `CLEARONFREE` regardless of what the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheFlags(u32);

impl CacheFlags {
    /// No mode bits set.
    pub const NONE: CacheFlags = CacheFlags(0);
    /// Disable the per-CPU magazine layer entirely.
    pub const NOMAGAZINES: CacheFlags = CacheFlags(1 << 0);
    /// Record an audit transaction ring per object.
    pub const AUDIT: CacheFlags = CacheFlags(1 << 1);
    /// Enable the batch alloc/free entry points.
    pub const BATCH: CacheFlags = CacheFlags(1 << 2);
    /// Allow contention-driven magazine resizing.
    pub const DYNAMIC: CacheFlags = CacheFlags(1 << 3);
    /// Zero object bytes when they return to the slab layer.
    pub const CLEARONFREE: CacheFlags = CacheFlags(1 << 4);
    /// Exempt from registry-wide forced reclaim passes.
    pub const NOREDIRECT: CacheFlags = CacheFlags(1 << 5);
    /// Cache owns a private single-object pseudo region.
    pub const PSEUDO: CacheFlags = CacheFlags(1 << 6);
    /// Cache registered a reclaim callback.
    pub const RECLAIM: CacheFlags = CacheFlags(1 << 7);

    /// Returns `true` if every bit in `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: CacheFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets every bit in `other`.
    #[inline]
    pub fn insert(&mut self, other: CacheFlags) {
        self.0 |= other.0;
    }

    /// Returns the raw bit pattern.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for CacheFlags {
    type Output = CacheFlags;

    fn bitor(self, rhs: CacheFlags) -> CacheFlags {
        CacheFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CacheFlags {
    fn bitor_assign(&mut self, rhs: CacheFlags) {
        self.0 |= rhs.0;
    }
}

/// Object constructor callback.
///
/// Runs exactly once per raw object carved from a slab; objects cached in
/// magazines stay constructed and skip it. A `CtorError` unwinds the
/// allocation and shortens the batch result.
pub type CtorFn = dyn Fn(ObjRef, AllocMode) -> Result<(), CtorError> + Send + Sync;

/// Object destructor callback; runs when an object leaves the magazine
/// layer for the slab, mirroring the constructor.
pub type DtorFn = dyn Fn(ObjRef) + Send + Sync;

/// Cache-level reclaim notification; invoked before a reap so the client
/// can release objects it is hoarding.
pub type ReclaimFn = dyn Fn() + Send + Sync;

/// Shared handle to a constructor callback.
pub type Ctor = Arc<CtorFn>;
/// Shared handle to a destructor callback.
pub type Dtor = Arc<DtorFn>;
/// Shared handle to a reclaim callback.
pub type Reclaim = Arc<ReclaimFn>;

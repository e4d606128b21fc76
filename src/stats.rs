//! Snapshot types for cache observability.
//!
//! Every layer keeps its counters under the lock that already guards it
//! (cpu slots, depot lists, slab layer) or in relaxed atomics (contention,
//! resizes, reaps); snapshots assemble a consistent-enough view for
//! reporting. This is the engine's only reporting surface — the host's
//! sysctl-style plumbing sits on top of these structs.

/// Point-in-time statistics for one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub name: String,
    pub id: u64,
    pub bufsize: usize,
    pub chunksize: usize,
    pub objsize: usize,
    /// Rounds per magazine at the current magazine type.
    pub magsize: usize,
    /// Objects handed out of / into the cpu magazine layer.
    pub cpu_allocs: u64,
    pub cpu_frees: u64,
    /// Raw objects carved from / returned to the slab provider.
    pub slab_allocs: u64,
    pub slab_frees: u64,
    /// Magazines currently parked in the depot.
    pub depot_full: usize,
    pub depot_empty: usize,
    /// Magazines handed out of each depot list, lifetime.
    pub depot_full_allocs: u64,
    pub depot_empty_allocs: u64,
    /// Failed depot try-locks observed so far.
    pub depot_contention: u64,
    /// Magazine-type advances performed by the resize controller.
    pub magazine_resizes: u64,
    /// Bufctl table rescales.
    pub hash_rescales: u64,
    pub hash_buckets: usize,
    /// Depot reap episodes that destroyed at least one magazine.
    pub depot_ws_reaps: u64,
    /// Objects currently carved from slabs (clients + magazines).
    pub bufinuse: usize,
    /// High-water mark of `bufinuse`.
    pub bufmax: usize,
}

/// Working-set view of one depot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepotListSnapshot {
    pub count: usize,
    pub min: usize,
    pub reap_limit: usize,
    pub allocs: u64,
}

/// Working-set view of both depot lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepotSnapshot {
    pub full: DepotListSnapshot,
    pub empty: DepotListSnapshot,
}

/// View of one cpu slot's magazine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub magsize: usize,
    /// Rounds in the loaded magazine; `None` when no magazine is loaded.
    pub loaded_rounds: Option<usize>,
    /// Rounds in the previous magazine; `None` when absent.
    pub previous_rounds: Option<usize>,
    pub allocs: u64,
    pub frees: u64,
}

/// View of one magazine-type pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Rounds per magazine of this type.
    pub magsize: usize,
    /// Magazines of this type in circulation anywhere.
    pub outstanding: usize,
    /// Magazines parked on the pool's free list.
    pub free: usize,
    /// Magazines handed out of the pool, lifetime.
    pub allocs: u64,
}

/// Operation recorded in an audit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    Alloc,
    Free,
}

/// One audit transaction from a live object's ring, reported by
/// [`ObjCache::audit_trail`](crate::cache::ObjCache::audit_trail).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub op: AuditOp,
    pub thread: std::thread::ThreadId,
    pub at: std::time::Instant,
    /// Rendered call stack captured at the transaction, when backtraces
    /// are enabled in the environment.
    pub stack: String,
}

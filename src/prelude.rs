pub use crate::builder::CacheBuilder;
pub use crate::cache::{ObjCache, ObjInfo};
pub use crate::ds::{CpuSelector, SlotArena, SlotId};
pub use crate::error::{ConfigError, CtorError, InvariantError};
pub use crate::region::{NormalRegion, PseudoRegion, RegionKind, SlabObj, SlabProvider};
pub use crate::registry::{CacheRegistry, RegistryConfig};
pub use crate::stats::{
    AuditOp, AuditRecord, CacheStats, CpuSnapshot, DepotListSnapshot, DepotSnapshot, PoolSnapshot,
};
pub use crate::types::{AllocMode, CacheFlags, ObjRef};

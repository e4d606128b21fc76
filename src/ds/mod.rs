pub mod cpu_slot;
pub mod slot_arena;

pub use cpu_slot::CpuSelector;
pub use slot_arena::{SlotArena, SlotId};

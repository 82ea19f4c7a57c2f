//! Port reservation, probing, and conflict repair.

mod allocator;
pub mod conflict;
mod probe;

pub use allocator::{PortAllocator, PortInfo};
pub use conflict::{resolve_conflicts, ConflictReason, ConflictResolution, EnvUpdate, PortChange};
pub use probe::{PortProbe, TcpProbe};

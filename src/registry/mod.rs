//! Registry data model: services, databases, and key references.

mod payloads;
mod types;

pub use payloads::*;
pub use types::*;

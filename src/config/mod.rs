//! Controller configuration.
//!
//! - `settings` - `Settings`, `PortRange`, `SupervisorConfig` read from `LOCAL_NEXUS_*`
//! - `env_loader` - `.env` parsing and environment variable name validation

pub mod env_loader;

mod settings;

pub use settings::*;

//! Service process supervision.
//!
//! - [`template`]: `{PORT}`/`{HOST}` substitution and the spawned environment
//! - [`process`]: detached spawn, liveness probing, tree termination
//! - [`Supervisor`]: the lifecycle state machine over registry rows
//! - [`log_tail`]: reading the end of a service's log file

pub mod log_tail;
pub mod process;
mod supervisor;
pub mod template;

pub use supervisor::*;

mod import;
mod ports;
mod registry;
mod services;
mod watch;

pub use import::run_import;
pub use ports::run_ports;
pub use registry::{run_db, run_env_example, run_keys, run_summary};
pub use services::{run_delete, run_lifecycle, run_list, run_logs, run_show, Lifecycle};
pub use watch::run_watch;

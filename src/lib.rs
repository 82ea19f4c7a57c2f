//! # Local Nexus
//!
//! A local control plane for ad-hoc development services: a registry of
//! services, databases, and secret references, a supervisor for their OS
//! processes, and a port allocator that keeps them from colliding.
//!
//! ## Features
//!
//! - **Registry**: SQLite-backed services, databases, and key references, with
//!   an additive startup migration
//! - **Supervision**: detached start, graceful tree stop, custom restart
//!   commands, and status reconciliation against the OS
//! - **Port Allocation**: lowest free port in a range, skipping reservations,
//!   the controller's own port, and anything answering TCP
//! - **Self-Healing Ports**: a service whose port is taken is moved before it starts
//! - **Bundle Import**: idempotent upsert by service name, from the CLI or a
//!   watched folder
//!
//! ## Quick Start
//!
//! ```no_run
//! use local_nexus::{config::Settings, registry::{ImportBundle, ServiceCreate}, Controller};
//!
//! # async fn example() -> Result<(), local_nexus::Error> {
//! let controller = Controller::open(Settings::from_env(".")?).await?;
//!
//! let bundle = ImportBundle::new(
//!     ServiceCreate::new("api").with_start_command("python -m http.server {PORT}"),
//! );
//! let outcome = controller.importer.import_bundle(bundle).await?;
//!
//! let service = controller.supervisor.start_service(&outcome.service_id).await?;
//! println!("{} is {}", service.name, service.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Every component is cheap to clone and shares one store connection.
//! Lifecycle calls on the same service are not serialized: each one refreshes
//! status from the OS before acting and relies on per-write transactions.

pub mod config;
pub mod controller;
pub mod error;
pub mod import;
pub mod port;
pub mod registry;
pub mod service;
pub mod state;
pub mod summary;
pub mod watch;

pub use config::{PortRange, Settings};
pub use controller::Controller;
pub use error::{Error, Result};
pub use import::Importer;
pub use port::{PortAllocator, PortProbe, TcpProbe};
pub use registry::{ImportBundle, ImportOutcome, Service, ServiceStatus};
pub use service::Supervisor;
pub use state::RegistryStore;
pub use watch::{BundleWatcher, WatcherHandle};

//! Persistent registry storage.
//!
//! Services, databases, and key references live in a single SQLite file
//! (WAL mode). The schema only ever grows: on every open, missing tables are
//! created and missing columns are added, and a failed column migration is
//! logged rather than treated as fatal.
//!
//! # Example
//!
//! ```ignore
//! use local_nexus::{registry::ServiceCreate, RegistryStore};
//!
//! let store = RegistryStore::open("data/local_nexus.db").await?;
//! let api = store.create_service(ServiceCreate::new("api")).await?;
//! ```

mod rows;
mod schema;
mod sqlite;

pub use sqlite::{ImportedRows, PortReservation, RegistryCounts, RegistryStore, ServiceFilter};

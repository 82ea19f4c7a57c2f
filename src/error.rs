// thiserror's expansion of struct variants trips this lint.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(nexus::config::error),
        help("Check the LOCAL_NEXUS_* variables in your environment or .env file")
    )]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(nexus::database::error))]
    Database(#[from] tokio_rusqlite::Error),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(nexus::service::not_found),
        help("List registered services with `nexus list`")
    )]
    ServiceNotFound(String),

    #[error("Database not found: {0}")]
    #[diagnostic(
        code(nexus::database::not_found),
        help("List registered databases with `nexus db list`")
    )]
    DatabaseNotFound(String),

    #[error("Key reference not found: {0}")]
    #[diagnostic(code(nexus::key::not_found))]
    KeyNotFound(String),

    #[error("A {entity} named '{name}' already exists")]
    #[diagnostic(
        code(nexus::registry::duplicate_name),
        help("Names are unique; update the existing entry or import a bundle to upsert it")
    )]
    DuplicateName { entity: &'static str, name: String },

    #[error("No free port found in range {start}-{end}")]
    #[diagnostic(
        code(nexus::port::range_exhausted),
        help("Widen LOCAL_NEXUS_PORT_RANGE_START/LOCAL_NEXUS_PORT_RANGE_END or free some ports")
    )]
    PortRangeExhausted { start: u16, end: u16 },

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Process error: {0}")]
    #[diagnostic(
        code(nexus::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("Invalid input: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// A next step for the user, when there is an obvious one.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ServiceNotFound(ident) => Some(format!(
                "No service matches '{}' by id or name. Run `nexus list` to see registered services.",
                ident
            )),
            Error::DatabaseNotFound(_) => {
                Some("Run `nexus db list` to see registered databases.".to_string())
            }
            Error::DuplicateName { entity, name } => Some(format!(
                "Pick a different name, or edit the existing {} '{}' instead.",
                entity, name
            )),
            Error::PortRangeExhausted { start, end } => Some(format!(
                "Every port in {}-{} is reserved or in use. Run `nexus ports map` to see who holds them, \
                 or `nexus ports resolve` to reassign conflicting services.",
                start, end
            )),
            Error::Config(_) => Some(
                "Settings are read from LOCAL_NEXUS_* environment variables and an optional .env file."
                    .to_string(),
            ),
            Error::Database(e) => {
                // tokio_rusqlite wraps the underlying rusqlite error opaquely.
                let text = e.to_string();
                if text.contains("database is locked") || text.contains("SQLITE_BUSY") {
                    Some("Another nexus process is writing to the registry. Retry in a moment.".to_string())
                } else if text.contains("malformed") || text.contains("SQLITE_CORRUPT") {
                    Some(
                        "The registry file is corrupted. Back it up and try:\n  sqlite3 data/local_nexus.db '.recover'"
                            .to_string(),
                    )
                } else {
                    None
                }
            }
            Error::Process(_) => Some("Check that the command exists and is executable".to_string()),
            _ => None,
        }
    }

    /// The message followed by its hint, if any.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Convert a recorded pid into a signal target.
///
/// Refuses 0 (the caller's process group), 1 (init), the controller itself,
/// and anything that does not fit a `pid_t`.
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    let refusal = match pid {
        0 => Some("pid 0 addresses a process group".to_string()),
        1 => Some("refusing to signal init".to_string()),
        p if p == std::process::id() => Some("refusing to signal the controller itself".to_string()),
        p if i32::try_from(p).is_err() => Some("out of range for a pid_t".to_string()),
        _ => None,
    };
    match refusal {
        Some(reason) => Err(Error::InvalidPid {
            pid,
            reason: format!("{} (service '{}')", reason, service_name),
        }),
        None => Ok(nix::unistd::Pid::from_raw(pid as i32)),
    }
}

/// Like [`validate_pid`] for read-only existence probes, where init and our
/// own pid are fine to look at.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a registered service.
///
/// ```text
/// stopped ──► running ──► stopped
///    │
///    └──► error   (failed start; left only by an explicit start)
/// ```
///
/// `running` is only trusted after a status refresh has confirmed the recorded
/// PID is a live, non-zombie process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
        }
    }

    /// Parse persisted text, treating anything unrecognised as `Stopped`.
    pub fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(ServiceStatus::Stopped)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(ServiceStatus::Stopped),
            "running" => Ok(ServiceStatus::Running),
            "error" => Ok(ServiceStatus::Error),
            other => Err(format!("unknown service status '{}'", other)),
        }
    }
}

/// A registered local program whose OS process is supervised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    /// Unique; the natural key used by bundle imports.
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub tech_stack: Vec<String>,
    /// Names of other services. Not checked against the registry.
    pub dependencies: Vec<String>,
    pub config_paths: Vec<String>,

    pub port: Option<u16>,
    pub local_url: Option<String>,
    pub healthcheck_url: Option<String>,

    pub working_directory: Option<String>,
    /// May contain `{PORT}` and `{HOST}` placeholders.
    pub start_command: String,
    pub stop_command: String,
    pub restart_command: String,
    /// Safe runtime values only, never secrets. Values may contain placeholders.
    pub env_overrides: BTreeMap<String, String>,

    pub status: ServiceStatus,
    pub process_pid: Option<u32>,
    pub process_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub log_path: Option<String>,

    pub database_id: Option<String>,
    pub database_connection_string: Option<String>,
    pub database_schema_overview: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    /// Rewrite `:old` to `:new` in the local and healthcheck URLs.
    ///
    /// Returns true if either URL changed.
    pub fn rewrite_url_ports(&mut self, old_port: u16, new_port: u16) -> bool {
        let needle = format!(":{}", old_port);
        let replacement = format!(":{}", new_port);
        let mut changed = false;
        for url in [&mut self.local_url, &mut self.healthcheck_url]
            .into_iter()
            .flatten()
        {
            if url.contains(&needle) {
                *url = url.replace(&needle, &replacement);
                changed = true;
            }
        }
        changed
    }
}

/// A logical data store description. Not supervised as a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    /// Unique; the natural key used by bundle imports.
    pub database_name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Name of the environment variable holding the username, never the value.
    pub username_env: Option<String>,
    /// Name of the environment variable holding the password, never the value.
    pub password_env: Option<String>,
    pub connection_string: Option<String>,
    pub schema_overview: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reference to a secret a service needs, by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRef {
    pub id: String,
    pub service_id: String,
    pub key_name: String,
    pub env_var: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Minimal view of a service linked to a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedService {
    pub id: String,
    pub name: String,
    pub status: ServiceStatus,
    pub port: Option<u16>,
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_category() -> String {
    "general".to_string()
}

fn default_db_type() -> String {
    "sqlite".to_string()
}

fn default_db_host() -> Option<String> {
    Some("localhost".to_string())
}

fn default_true() -> bool {
    true
}

/// Descriptor for a new service, also the service half of an [`ImportBundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub config_paths: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub local_url: Option<String>,
    #[serde(default)]
    pub healthcheck_url: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub start_command: String,
    #[serde(default)]
    pub stop_command: String,
    #[serde(default)]
    pub restart_command: String,
    #[serde(default)]
    pub env_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub database_connection_string: Option<String>,
    #[serde(default)]
    pub database_schema_overview: Option<String>,
}

impl ServiceCreate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: default_category(),
            tags: Vec::new(),
            tech_stack: Vec::new(),
            dependencies: Vec::new(),
            config_paths: Vec::new(),
            port: None,
            local_url: None,
            healthcheck_url: None,
            working_directory: None,
            start_command: String::new(),
            stop_command: String::new(),
            restart_command: String::new(),
            env_overrides: BTreeMap::new(),
            database_id: None,
            database_connection_string: None,
            database_schema_overview: None,
        }
    }

    pub fn with_start_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = command.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Partial update of a service. `None` leaves a field untouched; for the
/// nullable columns `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub tech_stack: Option<Vec<String>>,
    pub dependencies: Option<Vec<String>>,
    pub config_paths: Option<Vec<String>>,
    pub port: Option<Option<u16>>,
    pub local_url: Option<Option<String>>,
    pub healthcheck_url: Option<Option<String>>,
    pub working_directory: Option<Option<String>>,
    pub start_command: Option<String>,
    pub stop_command: Option<String>,
    pub restart_command: Option<String>,
    pub env_overrides: Option<BTreeMap<String, String>>,
    pub database_id: Option<Option<String>>,
    pub database_connection_string: Option<Option<String>>,
    pub database_schema_overview: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCreate {
    pub database_name: String,
    #[serde(rename = "type", default = "default_db_type")]
    pub db_type: String,
    #[serde(default = "default_db_host")]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub schema_overview: Option<String>,
}

impl DatabaseCreate {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            db_type: default_db_type(),
            host: default_db_host(),
            port: None,
            username_env: None,
            password_env: None,
            connection_string: None,
            schema_overview: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseUpdate {
    pub database_name: Option<String>,
    #[serde(rename = "type")]
    pub db_type: Option<String>,
    pub host: Option<Option<String>>,
    pub port: Option<Option<u16>>,
    pub username_env: Option<Option<String>>,
    pub password_env: Option<Option<String>>,
    pub connection_string: Option<Option<String>>,
    pub schema_overview: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRefCreate {
    pub key_name: String,
    pub env_var: String,
    #[serde(default)]
    pub description: String,
}

impl KeyRefCreate {
    pub fn new(key_name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            env_var: env_var.into(),
            description: String::new(),
        }
    }
}

/// The unit handed to the importer by discovery, the file watcher, and manual
/// imports alike. Never persisted as its own entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBundle {
    pub service: ServiceCreate,
    #[serde(default)]
    pub database: Option<DatabaseCreate>,
    #[serde(default)]
    pub keys: Vec<KeyRefCreate>,
    #[serde(default)]
    pub requested_port: Option<u16>,
    #[serde(default = "default_true")]
    pub auto_assign_port: bool,
    #[serde(default = "default_true")]
    pub auto_create_db: bool,
    /// Provenance, e.g. the discovery source. Opaque to the importer.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl ImportBundle {
    pub fn new(service: ServiceCreate) -> Self {
        Self {
            service,
            database: None,
            keys: Vec::new(),
            requested_port: None,
            auto_assign_port: true,
            auto_create_db: true,
            meta: serde_json::Map::new(),
        }
    }
}

/// Result of merging one bundle into the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub service_id: String,
    pub database_id: Option<String>,
    /// Advisory conflicts; the import succeeded regardless.
    pub warnings: Vec<String>,
}

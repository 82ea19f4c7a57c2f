//! Mapping between registry entities and SQLite rows.

use crate::registry::{Database, KeyRef, Service, ServiceStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(super) const SERVICE_COLUMNS: &str = "id, name, description, category, tags, tech_stack, \
     dependencies, config_paths, port, local_url, healthcheck_url, working_directory, \
     start_command, stop_command, restart_command, status, process_pid, process_started_at, \
     last_error, log_path, database_id, database_connection_string, database_schema_overview, \
     created_at, updated_at";

pub(super) const DATABASE_COLUMNS: &str = "id, database_name, type, host, port, username_env, \
     password_env, connection_string, schema_overview, created_at, updated_at";

pub(super) const KEYREF_COLUMNS: &str =
    "id, service_id, key_name, env_var, description, created_at";

fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn parse_json<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(super) fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(super) fn service_from_row(row: &Row<'_>) -> rusqlite::Result<Service> {
    let status: String = row.get("status")?;
    // Absent when the additive migration could not run.
    let env_overrides = row
        .get::<_, Option<String>>("env_overrides")
        .ok()
        .flatten();

    Ok(Service {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        category: row
            .get::<_, Option<String>>("category")?
            .unwrap_or_else(|| "general".to_string()),
        tags: parse_json(row.get("tags")?),
        tech_stack: parse_json(row.get("tech_stack")?),
        dependencies: parse_json(row.get("dependencies")?),
        config_paths: parse_json(row.get("config_paths")?),
        port: row.get("port")?,
        local_url: row.get("local_url")?,
        healthcheck_url: row.get("healthcheck_url")?,
        working_directory: row.get("working_directory")?,
        start_command: row.get::<_, Option<String>>("start_command")?.unwrap_or_default(),
        stop_command: row.get::<_, Option<String>>("stop_command")?.unwrap_or_default(),
        restart_command: row
            .get::<_, Option<String>>("restart_command")?
            .unwrap_or_default(),
        env_overrides: parse_json(env_overrides),
        status: ServiceStatus::from_db(&status),
        process_pid: row.get("process_pid")?,
        process_started_at: parse_time(row.get("process_started_at")?),
        last_error: row.get("last_error")?,
        log_path: row.get("log_path")?,
        database_id: row.get("database_id")?,
        database_connection_string: row.get("database_connection_string")?,
        database_schema_overview: row.get("database_schema_overview")?,
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_time(row.get("updated_at")?).unwrap_or_else(Utc::now),
    })
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(v) => Value::Text(v.clone()),
        None => Value::Null,
    }
}

fn opt_int<T: Into<i64> + Copy>(value: Option<T>) -> Value {
    match value {
        Some(v) => Value::Integer(v.into()),
        None => Value::Null,
    }
}

/// Column/value pairs for a full service row, `id` first.
pub(super) fn service_values(service: &Service, with_env_overrides: bool) -> Vec<(&'static str, Value)> {
    let mut values = vec![
        ("id", text(&service.id)),
        ("name", text(&service.name)),
        ("description", text(&service.description)),
        ("category", text(&service.category)),
        ("tags", Value::Text(to_json(&service.tags))),
        ("tech_stack", Value::Text(to_json(&service.tech_stack))),
        ("dependencies", Value::Text(to_json(&service.dependencies))),
        ("config_paths", Value::Text(to_json(&service.config_paths))),
        ("port", opt_int(service.port)),
        ("local_url", opt_text(&service.local_url)),
        ("healthcheck_url", opt_text(&service.healthcheck_url)),
        ("working_directory", opt_text(&service.working_directory)),
        ("start_command", text(&service.start_command)),
        ("stop_command", text(&service.stop_command)),
        ("restart_command", text(&service.restart_command)),
        ("status", text(service.status.as_str())),
        ("process_pid", opt_int(service.process_pid)),
        (
            "process_started_at",
            opt_text(&service.process_started_at.map(|t| t.to_rfc3339())),
        ),
        ("last_error", opt_text(&service.last_error)),
        ("log_path", opt_text(&service.log_path)),
        ("database_id", opt_text(&service.database_id)),
        (
            "database_connection_string",
            opt_text(&service.database_connection_string),
        ),
        (
            "database_schema_overview",
            opt_text(&service.database_schema_overview),
        ),
        ("created_at", Value::Text(service.created_at.to_rfc3339())),
        ("updated_at", Value::Text(service.updated_at.to_rfc3339())),
    ];
    if with_env_overrides {
        values.push(("env_overrides", Value::Text(to_json(&service.env_overrides))));
    }
    values
}

pub(super) fn insert_sql(table: &str, values: &[(&'static str, Value)]) -> String {
    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// `UPDATE` keyed on the first pair (the id).
pub(super) fn update_sql(table: &str, values: &[(&'static str, Value)]) -> String {
    let assignments: Vec<String> = values
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, (c, _))| format!("{} = ?{}", c, i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ?1",
        table,
        assignments.join(", "),
        values[0].0
    )
}

pub(super) fn database_from_row(row: &Row<'_>) -> rusqlite::Result<Database> {
    Ok(Database {
        id: row.get("id")?,
        database_name: row.get("database_name")?,
        db_type: row
            .get::<_, Option<String>>("type")?
            .unwrap_or_else(|| "sqlite".to_string()),
        host: row.get("host")?,
        port: row.get("port")?,
        username_env: row.get("username_env")?,
        password_env: row.get("password_env")?,
        connection_string: row.get("connection_string")?,
        schema_overview: row.get("schema_overview")?,
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_time(row.get("updated_at")?).unwrap_or_else(Utc::now),
    })
}

pub(super) fn database_values(db: &Database) -> Vec<(&'static str, Value)> {
    vec![
        ("id", text(&db.id)),
        ("database_name", text(&db.database_name)),
        ("type", text(&db.db_type)),
        ("host", opt_text(&db.host)),
        ("port", opt_int(db.port)),
        ("username_env", opt_text(&db.username_env)),
        ("password_env", opt_text(&db.password_env)),
        ("connection_string", opt_text(&db.connection_string)),
        ("schema_overview", opt_text(&db.schema_overview)),
        ("created_at", Value::Text(db.created_at.to_rfc3339())),
        ("updated_at", Value::Text(db.updated_at.to_rfc3339())),
    ]
}

pub(super) fn keyref_from_row(row: &Row<'_>) -> rusqlite::Result<KeyRef> {
    Ok(KeyRef {
        id: row.get("id")?,
        service_id: row.get("service_id")?,
        key_name: row.get("key_name")?,
        env_var: row.get("env_var")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
    })
}

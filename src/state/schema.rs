use tracing::{debug, info, warn};

/// Tables are created with `IF NOT EXISTS` so opening an existing registry is a no-op.
pub(super) const CREATE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS "database" (
        id TEXT PRIMARY KEY,
        database_name TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL DEFAULT 'sqlite',
        host TEXT,
        port INTEGER,
        username_env TEXT,
        password_env TEXT,
        connection_string TEXT,
        schema_overview TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS service (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT 'general',
        tags TEXT NOT NULL DEFAULT '[]',
        tech_stack TEXT NOT NULL DEFAULT '[]',
        dependencies TEXT NOT NULL DEFAULT '[]',
        config_paths TEXT NOT NULL DEFAULT '[]',
        port INTEGER,
        local_url TEXT,
        healthcheck_url TEXT,
        working_directory TEXT,
        start_command TEXT NOT NULL DEFAULT '',
        stop_command TEXT NOT NULL DEFAULT '',
        restart_command TEXT NOT NULL DEFAULT '',
        env_overrides TEXT,
        status TEXT NOT NULL DEFAULT 'stopped',
        process_pid INTEGER,
        process_started_at TEXT,
        last_error TEXT,
        log_path TEXT,
        database_id TEXT REFERENCES "database"(id),
        database_connection_string TEXT,
        database_schema_overview TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS keyref (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL REFERENCES service(id) ON DELETE CASCADE,
        key_name TEXT NOT NULL,
        env_var TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_keyref_service ON keyref(service_id);
    CREATE INDEX IF NOT EXISTS idx_service_port ON service(port);
"#;

/// Columns added after the first release. Never dropped or renamed.
pub(super) const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[("service", "env_overrides", "TEXT")];

/// Indexes that may fail on registries written before they existed
/// (e.g. duplicate service names). Failure is logged and tolerated.
pub(super) const OPTIONAL_INDEXES: &[(&str, &str)] = &[(
    "idx_service_name",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_service_name ON service(name)",
)];

pub(super) fn has_column(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )
}

/// Add any missing additive columns and optional indexes.
///
/// Safe to run on every startup. Individual failures are logged as warnings
/// and skipped. Returns the `table.column` names that were added.
pub(super) fn apply_additive_migrations(conn: &rusqlite::Connection) -> Vec<String> {
    let mut added = Vec::new();

    for (table, column, decl) in ADDITIVE_COLUMNS {
        match has_column(conn, table, column) {
            Ok(true) => {
                debug!("Column {}.{} already present", table, column);
            }
            Ok(false) => {
                let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl);
                match conn.execute(&sql, []) {
                    Ok(_) => {
                        info!("Migrated registry: added column {}.{}", table, column);
                        added.push(format!("{}.{}", table, column));
                    }
                    Err(e) => warn!("Failed to add column {}.{}: {}", table, column, e),
                }
            }
            Err(e) => warn!("Could not inspect table {}: {}", table, e),
        }
    }

    for (name, sql) in OPTIONAL_INDEXES {
        if let Err(e) = conn.execute(sql, []) {
            warn!("Could not create index {}: {}", name, e);
        }
    }

    added
}

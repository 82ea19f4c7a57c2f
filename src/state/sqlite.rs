use super::rows::{
    database_from_row, database_values, insert_sql, keyref_from_row, service_from_row,
    service_values, update_sql, DATABASE_COLUMNS, KEYREF_COLUMNS, SERVICE_COLUMNS,
};
use super::schema::{apply_additive_migrations, has_column, CREATE_TABLES};
use crate::config::env_loader::validate_env_name;
use crate::error::{Error, Result};
use crate::registry::{
    Database, DatabaseCreate, DatabaseUpdate, KeyRef, KeyRefCreate, LinkedService, Service,
    ServiceCreate, ServiceStatus, ServiceUpdate,
};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Filter for [`RegistryStore::list_services`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceFilter {
    pub category: Option<String>,
    pub status: Option<ServiceStatus>,
}

impl ServiceFilter {
    fn matches(&self, service: &Service) -> bool {
        self.category
            .as_ref()
            .map_or(true, |c| service.category.eq_ignore_ascii_case(c))
            && self.status.map_or(true, |s| service.status == s)
    }
}

/// A service's claim on a port, as seen by the allocator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortReservation {
    pub service_id: String,
    pub service_name: String,
    pub port: u16,
    pub status: ServiceStatus,
    pub process_pid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Rows written by [`RegistryStore::apply_import`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRows {
    pub service: Service,
    pub created: bool,
    pub database: Option<Database>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub services: usize,
    pub databases: usize,
    pub keys: usize,
}

/// SQLite-backed registry of services, databases, and key references.
///
/// Cheap to clone; all clones share one background connection. Every
/// multi-statement mutation runs inside a single transaction.
#[derive(Clone)]
pub struct RegistryStore {
    db_path: PathBuf,
    conn: Connection,
    /// False only when the additive migration for `env_overrides` failed.
    env_overrides_column: bool,
}

impl RegistryStore {
    /// Open (creating if needed) the registry file and run the startup migration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path).await?;
        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        let mut store = Self {
            db_path,
            conn,
            env_overrides_column: true,
        };
        store.initialize().await?;
        Ok(store)
    }

    /// An ephemeral in-memory registry.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open(":memory:").await?;
        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        let mut store = Self {
            db_path: PathBuf::from(":memory:"),
            conn,
            env_overrides_column: true,
        };
        store.initialize().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Create missing tables, then apply additive migrations.
    ///
    /// Running this against an up-to-date registry is a no-op. Migration
    /// failures are logged and do not fail initialization.
    pub async fn initialize(&mut self) -> Result<Vec<String>> {
        let (added, has_env) = self
            .conn
            .call(|conn: &mut rusqlite::Connection| {
                conn.execute_batch(CREATE_TABLES)?;
                let added = apply_additive_migrations(conn);
                let has_env = has_column(conn, "service", "env_overrides").unwrap_or(false);
                Ok((added, has_env))
            })
            .await?;

        if !added.is_empty() {
            info!("Registry schema migrated: {}", added.join(", "));
        }
        debug!("Registry ready at {}", self.db_path.display());
        self.env_overrides_column = has_env;
        Ok(added)
    }

    /// Run `f` inside a transaction, committing only when it returns `Ok(Ok(_))`.
    async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn: &mut rusqlite::Connection| {
                let tx = conn.transaction()?;
                let outcome = f(&tx)?;
                if outcome.is_ok() {
                    tx.commit()?;
                }
                Ok(outcome)
            })
            .await?
    }

    async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self
            .conn
            .call(move |conn: &mut rusqlite::Connection| Ok(f(conn)?))
            .await?)
    }

    fn service_select(&self) -> String {
        if self.env_overrides_column {
            format!("SELECT {}, env_overrides FROM service", SERVICE_COLUMNS)
        } else {
            format!("SELECT {} FROM service", SERVICE_COLUMNS)
        }
    }

    // ---------------------------------------------------------------------
    // Services
    // ---------------------------------------------------------------------

    pub async fn create_service(&self, payload: ServiceCreate) -> Result<Service> {
        validate_service_payload(&payload)?;
        let now = Utc::now();
        let mut service = new_service(payload, now);
        service.id = uuid::Uuid::new_v4().to_string();

        let values = service_values(&service, self.env_overrides_column);
        let sql = insert_sql("service", &values);
        let name = service.name.clone();
        let database_id = service.database_id.clone();

        self.with_transaction(move |tx| {
            if service_id_by_name(tx, &name)?.is_some() {
                return Ok(Err(Error::DuplicateName {
                    entity: "service",
                    name,
                }));
            }
            if let Some(db_id) = database_id {
                if !database_exists(tx, &db_id)? {
                    return Ok(Err(Error::DatabaseNotFound(db_id)));
                }
            }
            tx.execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            Ok(Ok(()))
        })
        .await?;

        info!("Registered service '{}' ({})", service.name, service.id);
        Ok(service)
    }

    pub async fn get_service(&self, id: &str) -> Result<Option<Service>> {
        let sql = format!("{} WHERE id = ?1", self.service_select());
        let id = id.to_string();
        self.read(move |conn| {
            conn.query_row(&sql, [&id], service_from_row).optional()
        })
        .await
    }

    /// Like [`get_service`](Self::get_service) but a missing row is an error.
    pub async fn require_service(&self, id: &str) -> Result<Service> {
        self.get_service(id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    pub async fn find_service_by_name(&self, name: &str) -> Result<Option<Service>> {
        let sql = format!("{} WHERE name = ?1 ORDER BY created_at LIMIT 1", self.service_select());
        let name = name.to_string();
        self.read(move |conn| {
            conn.query_row(&sql, [&name], service_from_row).optional()
        })
        .await
    }

    /// Look a service up by id, falling back to its unique name.
    pub async fn resolve_service(&self, ident: &str) -> Result<Service> {
        if let Some(service) = self.get_service(ident).await? {
            return Ok(service);
        }
        self.find_service_by_name(ident)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(ident.to_string()))
    }

    /// Services ordered by name.
    pub async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let sql = format!("{} ORDER BY name COLLATE NOCASE, created_at", self.service_select());
        let services = self
            .read(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], service_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(services.into_iter().filter(|s| filter.matches(s)).collect())
    }

    /// Apply a partial update.
    pub async fn update_service(&self, id: &str, patch: ServiceUpdate) -> Result<Service> {
        let mut service = self.require_service(id).await?;
        if let Some(env) = &patch.env_overrides {
            for key in env.keys() {
                validate_env_name(key).map_err(|e| Error::Validation(e.to_string()))?;
            }
        }
        apply_service_patch(&mut service, patch);
        if service.name.trim().is_empty() {
            return Err(Error::Validation("service name cannot be empty".to_string()));
        }
        self.save_service(&service).await
    }

    /// Persist a full service row, stamping `updated_at`.
    ///
    /// Returns the row as written.
    pub async fn save_service(&self, service: &Service) -> Result<Service> {
        let mut service = service.clone();
        service.updated_at = Utc::now();

        let values = service_values(&service, self.env_overrides_column);
        let sql = update_sql("service", &values);
        let id = service.id.clone();
        let name = service.name.clone();
        let database_id = service.database_id.clone();

        self.with_transaction(move |tx| {
            if let Some(other) = service_id_by_name(tx, &name)? {
                if other != id {
                    return Ok(Err(Error::DuplicateName {
                        entity: "service",
                        name,
                    }));
                }
            }
            if let Some(db_id) = database_id {
                if !database_exists(tx, &db_id)? {
                    return Ok(Err(Error::DatabaseNotFound(db_id)));
                }
            }
            let rows = tx.execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            if rows == 0 {
                return Ok(Err(Error::ServiceNotFound(id)));
            }
            Ok(Ok(()))
        })
        .await?;

        Ok(service)
    }

    /// Delete a service and its key references.
    pub async fn delete_service(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_transaction(move |tx| {
            tx.execute("DELETE FROM keyref WHERE service_id = ?1", [&id])?;
            let rows = tx.execute("DELETE FROM service WHERE id = ?1", [&id])?;
            if rows == 0 {
                return Ok(Err(Error::ServiceNotFound(id)));
            }
            Ok(Ok(()))
        })
        .await?;
        Ok(())
    }

    /// Insert or update by unique name.
    ///
    /// An existing row keeps its id, creation time, and live state (status,
    /// pid, start time, last error, log path); every other field is taken from
    /// the payload. A payload without a database link keeps the existing one.
    /// Returns the row and whether it was newly created.
    pub async fn upsert_service_by_name(&self, payload: ServiceCreate) -> Result<(Service, bool)> {
        validate_service_payload(&payload)?;
        let select = format!("{} WHERE name = ?1 ORDER BY created_at LIMIT 1", self.service_select());
        let with_env = self.env_overrides_column;
        self.with_transaction(move |tx| upsert_service(tx, &select, with_env, payload))
            .await
    }

    /// Write one import in a single transaction: optional database upsert,
    /// service upsert by name (linked to that database), then a wholesale
    /// replacement of the service's keys.
    ///
    /// Every payload is validated first. On any error nothing is written.
    pub async fn apply_import(
        &self,
        database: Option<DatabaseCreate>,
        service: ServiceCreate,
        keys: Vec<KeyRefCreate>,
    ) -> Result<ImportedRows> {
        if let Some(db) = &database {
            validate_database_payload(db)?;
        }
        validate_service_payload(&service)?;
        for key in &keys {
            validate_key_payload(key)?;
        }
        let select = format!("{} WHERE name = ?1 ORDER BY created_at LIMIT 1", self.service_select());
        let with_env = self.env_overrides_column;

        self.with_transaction(move |tx| {
            let mut service = service;
            let database = match database {
                Some(payload) => {
                    let db = upsert_database(tx, payload)?;
                    service.database_id = Some(db.id.clone());
                    Some(db)
                }
                None => None,
            };
            let (service, created) = match upsert_service(tx, &select, with_env, service)? {
                Ok(row) => row,
                Err(e) => return Ok(Err(e)),
            };
            let now = Utc::now();
            let keys: Vec<KeyRef> = keys
                .into_iter()
                .map(|k| new_key(&service.id, k, now))
                .collect();
            replace_service_keys(tx, &service.id, &keys)?;
            Ok(Ok(ImportedRows {
                service,
                created,
                database,
            }))
        })
        .await
    }

    /// Every non-null service port, in creation order.
    pub async fn service_ports(&self) -> Result<Vec<PortReservation>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, port, status, process_pid, created_at FROM service \
                 WHERE port IS NOT NULL ORDER BY created_at, name",
            )?;
            let rows = stmt.query_map([], port_reservation_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    /// The first service (by creation) holding `port`, other than `excluding_name`.
    pub async fn find_port_owner(
        &self,
        port: u16,
        excluding_name: Option<&str>,
    ) -> Result<Option<PortReservation>> {
        let excluding = excluding_name.map(str::to_string);
        self.read(move |conn| {
            conn.query_row(
                "SELECT id, name, port, status, process_pid, created_at FROM service \
                 WHERE port = ?1 AND (?2 IS NULL OR name != ?2) ORDER BY created_at LIMIT 1",
                rusqlite::params![port, excluding],
                port_reservation_from_row,
            )
            .optional()
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Databases
    // ---------------------------------------------------------------------

    pub async fn create_database(&self, payload: DatabaseCreate) -> Result<Database> {
        validate_database_payload(&payload)?;
        let mut db = new_database(payload, Utc::now());
        db.id = uuid::Uuid::new_v4().to_string();
        let values = database_values(&db);
        let name = db.database_name.clone();

        self.with_transaction(move |tx| {
            if database_id_by_name(tx, &name)?.is_some() {
                return Ok(Err(Error::DuplicateName {
                    entity: "database",
                    name,
                }));
            }
            tx.execute(
                &insert_sql("\"database\"", &values),
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            Ok(Ok(()))
        })
        .await?;

        info!("Registered database '{}' ({})", db.database_name, db.id);
        Ok(db)
    }

    pub async fn get_database(&self, id: &str) -> Result<Option<Database>> {
        let id = id.to_string();
        self.read(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM \"database\" WHERE id = ?1", DATABASE_COLUMNS),
                [&id],
                database_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn require_database(&self, id: &str) -> Result<Database> {
        self.get_database(id)
            .await?
            .ok_or_else(|| Error::DatabaseNotFound(id.to_string()))
    }

    /// Look a database up by id, falling back to its unique name.
    pub async fn resolve_database(&self, ident: &str) -> Result<Database> {
        if let Some(db) = self.get_database(ident).await? {
            return Ok(db);
        }
        let name = ident.to_string();
        self.read(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM \"database\" WHERE database_name = ?1",
                    DATABASE_COLUMNS
                ),
                [&name],
                database_from_row,
            )
            .optional()
        })
        .await?
        .ok_or_else(|| Error::DatabaseNotFound(ident.to_string()))
    }

    pub async fn list_databases(&self) -> Result<Vec<Database>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM \"database\" ORDER BY database_name COLLATE NOCASE",
                DATABASE_COLUMNS
            ))?;
            let rows = stmt.query_map([], database_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    pub async fn update_database(&self, id: &str, patch: DatabaseUpdate) -> Result<Database> {
        let mut db = self.require_database(id).await?;
        apply_database_patch(&mut db, patch);
        if db.database_name.trim().is_empty() {
            return Err(Error::Validation("database name cannot be empty".to_string()));
        }
        db.updated_at = Utc::now();

        let values = database_values(&db);
        let id = db.id.clone();
        let name = db.database_name.clone();
        self.with_transaction(move |tx| {
            if let Some(other) = database_id_by_name(tx, &name)? {
                if other != id {
                    return Ok(Err(Error::DuplicateName {
                        entity: "database",
                        name,
                    }));
                }
            }
            tx.execute(
                &update_sql("\"database\"", &values),
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            Ok(Ok(()))
        })
        .await?;
        Ok(db)
    }

    /// Delete a database, unlinking (not deleting) dependent services.
    pub async fn delete_database(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_transaction(move |tx| {
            let unlinked = tx.execute(
                "UPDATE service SET database_id = NULL, updated_at = ?2 WHERE database_id = ?1",
                rusqlite::params![&id, &now],
            )?;
            let rows = tx.execute("DELETE FROM \"database\" WHERE id = ?1", [&id])?;
            if rows == 0 {
                return Ok(Err(Error::DatabaseNotFound(id)));
            }
            debug!("Deleted database {} (unlinked {} services)", id, unlinked);
            Ok(Ok(()))
        })
        .await
    }

    /// Insert or update by unique `database_name`.
    pub async fn upsert_database_by_name(&self, payload: DatabaseCreate) -> Result<Database> {
        validate_database_payload(&payload)?;
        self.with_transaction(move |tx| Ok(Ok(upsert_database(tx, payload)?)))
            .await
    }

    /// Services linked to a database.
    pub async fn linked_services(&self, database_id: &str) -> Result<Vec<LinkedService>> {
        let database_id = database_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, status, port FROM service WHERE database_id = ?1 \
                 ORDER BY name COLLATE NOCASE",
            )?;
            let rows = stmt.query_map([&database_id], |row| {
                let status: String = row.get(2)?;
                Ok(LinkedService {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    status: ServiceStatus::from_db(&status),
                    port: row.get(3)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Key references
    // ---------------------------------------------------------------------

    pub async fn list_keys(&self) -> Result<Vec<KeyRef>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM keyref ORDER BY service_id, key_name",
                KEYREF_COLUMNS
            ))?;
            let rows = stmt.query_map([], keyref_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    pub async fn keys_for_service(&self, service_id: &str) -> Result<Vec<KeyRef>> {
        let service_id = service_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM keyref WHERE service_id = ?1 ORDER BY key_name",
                KEYREF_COLUMNS
            ))?;
            let rows = stmt.query_map([&service_id], keyref_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    pub async fn create_key(&self, service_id: &str, payload: KeyRefCreate) -> Result<KeyRef> {
        validate_key_payload(&payload)?;
        let key = new_key(service_id, payload, Utc::now());
        let inserted = key.clone();
        self.with_transaction(move |tx| {
            if !service_exists(tx, &inserted.service_id)? {
                return Ok(Err(Error::ServiceNotFound(inserted.service_id)));
            }
            insert_key(tx, &inserted)?;
            Ok(Ok(()))
        })
        .await?;
        Ok(key)
    }

    pub async fn delete_key(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_transaction(move |tx| {
            let rows = tx.execute("DELETE FROM keyref WHERE id = ?1", [&id])?;
            if rows == 0 {
                return Ok(Err(Error::KeyNotFound(id)));
            }
            Ok(Ok(()))
        })
        .await
    }

    /// Replace every key reference of a service with `keys`.
    ///
    /// An empty list clears the service's keys.
    pub async fn replace_keys(
        &self,
        service_id: &str,
        keys: Vec<KeyRefCreate>,
    ) -> Result<Vec<KeyRef>> {
        for key in &keys {
            validate_key_payload(key)?;
        }
        let now = Utc::now();
        let service_id = service_id.to_string();
        let created: Vec<KeyRef> = keys
            .into_iter()
            .map(|k| new_key(&service_id, k, now))
            .collect();
        let inserted = created.clone();

        self.with_transaction(move |tx| {
            if !service_exists(tx, &service_id)? {
                return Ok(Err(Error::ServiceNotFound(service_id)));
            }
            replace_service_keys(tx, &service_id, &inserted)?;
            Ok(Ok(()))
        })
        .await?;
        Ok(created)
    }

    pub async fn counts(&self) -> Result<RegistryCounts> {
        self.read(|conn| {
            let count = |table: &str| -> rusqlite::Result<usize> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
                Ok(usize::try_from(n).unwrap_or(0))
            };
            Ok(RegistryCounts {
                services: count("service")?,
                databases: count("\"database\"")?,
                keys: count("keyref")?,
            })
        })
        .await
    }
}

fn port_reservation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortReservation> {
    let status: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(PortReservation {
        service_id: row.get(0)?,
        service_name: row.get(1)?,
        port: row.get(2)?,
        status: ServiceStatus::from_db(&status),
        process_pid: row.get(4)?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn service_id_by_name(tx: &rusqlite::Transaction, name: &str) -> rusqlite::Result<Option<String>> {
    tx.query_row(
        "SELECT id FROM service WHERE name = ?1 ORDER BY created_at LIMIT 1",
        [name],
        |row| row.get(0),
    )
    .optional()
}

fn service_exists(tx: &rusqlite::Transaction, id: &str) -> rusqlite::Result<bool> {
    tx.query_row(
        "SELECT COUNT(*) > 0 FROM service WHERE id = ?1",
        [id],
        |row| row.get(0),
    )
}

fn database_id_by_name(
    tx: &rusqlite::Transaction,
    name: &str,
) -> rusqlite::Result<Option<String>> {
    tx.query_row(
        "SELECT id FROM \"database\" WHERE database_name = ?1",
        [name],
        |row| row.get(0),
    )
    .optional()
}

fn database_exists(tx: &rusqlite::Transaction, id: &str) -> rusqlite::Result<bool> {
    tx.query_row(
        "SELECT COUNT(*) > 0 FROM \"database\" WHERE id = ?1",
        [id],
        |row| row.get(0),
    )
}

fn insert_key(tx: &rusqlite::Transaction, key: &KeyRef) -> rusqlite::Result<usize> {
    tx.execute(
        "INSERT INTO keyref (id, service_id, key_name, env_var, description, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            &key.id,
            &key.service_id,
            &key.key_name,
            &key.env_var,
            &key.description,
            key.created_at.to_rfc3339(),
        ],
    )
}

fn upsert_service(
    tx: &rusqlite::Transaction,
    select: &str,
    with_env: bool,
    payload: ServiceCreate,
) -> rusqlite::Result<Result<(Service, bool)>> {
    let existing = tx
        .query_row(select, [&payload.name], service_from_row)
        .optional()?;
    if let Some(db_id) = &payload.database_id {
        if !database_exists(tx, db_id)? {
            return Ok(Err(Error::DatabaseNotFound(db_id.clone())));
        }
    }
    let now = Utc::now();

    match existing {
        Some(current) => {
            let mut updated = new_service(payload, now);
            updated.id = current.id;
            updated.created_at = current.created_at;
            updated.status = current.status;
            updated.process_pid = current.process_pid;
            updated.process_started_at = current.process_started_at;
            updated.last_error = current.last_error;
            updated.log_path = current.log_path;
            if updated.database_id.is_none() {
                updated.database_id = current.database_id;
            }

            let values = service_values(&updated, with_env);
            tx.execute(
                &update_sql("service", &values),
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            Ok(Ok((updated, false)))
        }
        None => {
            let mut created = new_service(payload, now);
            created.id = uuid::Uuid::new_v4().to_string();
            let values = service_values(&created, with_env);
            tx.execute(
                &insert_sql("service", &values),
                rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
            )?;
            Ok(Ok((created, true)))
        }
    }
}

fn upsert_database(tx: &rusqlite::Transaction, payload: DatabaseCreate) -> rusqlite::Result<Database> {
    let existing = tx
        .query_row(
            &format!(
                "SELECT {} FROM \"database\" WHERE database_name = ?1",
                DATABASE_COLUMNS
            ),
            [&payload.database_name],
            database_from_row,
        )
        .optional()?;
    let now = Utc::now();

    let mut db = new_database(payload, now);
    let values;
    let sql = match existing {
        Some(current) => {
            db.id = current.id;
            db.created_at = current.created_at;
            values = database_values(&db);
            update_sql("\"database\"", &values)
        }
        None => {
            db.id = uuid::Uuid::new_v4().to_string();
            values = database_values(&db);
            insert_sql("\"database\"", &values)
        }
    };
    tx.execute(
        &sql,
        rusqlite::params_from_iter(values.iter().map(|(_, v)| v)),
    )?;
    Ok(db)
}

fn replace_service_keys(
    tx: &rusqlite::Transaction,
    service_id: &str,
    keys: &[KeyRef],
) -> rusqlite::Result<()> {
    let removed = tx.execute("DELETE FROM keyref WHERE service_id = ?1", [service_id])?;
    for key in keys {
        insert_key(tx, key)?;
    }
    debug!(
        "Replaced {} key refs with {} for service {}",
        removed,
        keys.len(),
        service_id
    );
    Ok(())
}

fn validate_service_payload(payload: &ServiceCreate) -> Result<()> {
    if payload.name.trim().is_empty() {
        return Err(Error::Validation("service name cannot be empty".to_string()));
    }
    for key in payload.env_overrides.keys() {
        validate_env_name(key).map_err(|e| Error::Validation(e.to_string()))?;
    }
    Ok(())
}

fn validate_database_payload(payload: &DatabaseCreate) -> Result<()> {
    if payload.database_name.trim().is_empty() {
        return Err(Error::Validation("database name cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_key_payload(payload: &KeyRefCreate) -> Result<()> {
    if payload.key_name.trim().is_empty() {
        return Err(Error::Validation("key name cannot be empty".to_string()));
    }
    if payload.env_var.trim().is_empty() {
        return Err(Error::Validation("env_var cannot be empty".to_string()));
    }
    Ok(())
}

/// A fresh row from a payload: stopped, no live state, empty id.
fn new_service(payload: ServiceCreate, now: DateTime<Utc>) -> Service {
    Service {
        id: String::new(),
        name: payload.name.trim().to_string(),
        description: payload.description,
        category: payload.category,
        tags: payload.tags,
        tech_stack: payload.tech_stack,
        dependencies: payload.dependencies,
        config_paths: payload.config_paths,
        port: payload.port,
        local_url: payload.local_url,
        healthcheck_url: payload.healthcheck_url,
        working_directory: payload.working_directory,
        start_command: payload.start_command,
        stop_command: payload.stop_command,
        restart_command: payload.restart_command,
        env_overrides: payload.env_overrides,
        status: ServiceStatus::Stopped,
        process_pid: None,
        process_started_at: None,
        last_error: None,
        log_path: None,
        database_id: payload.database_id,
        database_connection_string: payload.database_connection_string,
        database_schema_overview: payload.database_schema_overview,
        created_at: now,
        updated_at: now,
    }
}

fn new_database(payload: DatabaseCreate, now: DateTime<Utc>) -> Database {
    Database {
        id: String::new(),
        database_name: payload.database_name.trim().to_string(),
        db_type: payload.db_type,
        host: payload.host,
        port: payload.port,
        username_env: payload.username_env,
        password_env: payload.password_env,
        connection_string: payload.connection_string,
        schema_overview: payload.schema_overview,
        created_at: now,
        updated_at: now,
    }
}

fn new_key(service_id: &str, payload: KeyRefCreate, now: DateTime<Utc>) -> KeyRef {
    KeyRef {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service_id.to_string(),
        key_name: payload.key_name,
        env_var: payload.env_var,
        description: payload.description,
        created_at: now,
    }
}

fn apply_service_patch(service: &mut Service, patch: ServiceUpdate) {
    if let Some(v) = patch.name {
        service.name = v.trim().to_string();
    }
    if let Some(v) = patch.description {
        service.description = v;
    }
    if let Some(v) = patch.category {
        service.category = v;
    }
    if let Some(v) = patch.tags {
        service.tags = v;
    }
    if let Some(v) = patch.tech_stack {
        service.tech_stack = v;
    }
    if let Some(v) = patch.dependencies {
        service.dependencies = v;
    }
    if let Some(v) = patch.config_paths {
        service.config_paths = v;
    }
    if let Some(v) = patch.port {
        service.port = v;
    }
    if let Some(v) = patch.local_url {
        service.local_url = v;
    }
    if let Some(v) = patch.healthcheck_url {
        service.healthcheck_url = v;
    }
    if let Some(v) = patch.working_directory {
        service.working_directory = v;
    }
    if let Some(v) = patch.start_command {
        service.start_command = v;
    }
    if let Some(v) = patch.stop_command {
        service.stop_command = v;
    }
    if let Some(v) = patch.restart_command {
        service.restart_command = v;
    }
    if let Some(v) = patch.env_overrides {
        service.env_overrides = v;
    }
    if let Some(v) = patch.database_id {
        service.database_id = v;
    }
    if let Some(v) = patch.database_connection_string {
        service.database_connection_string = v;
    }
    if let Some(v) = patch.database_schema_overview {
        service.database_schema_overview = v;
    }
}

fn apply_database_patch(db: &mut Database, patch: DatabaseUpdate) {
    if let Some(v) = patch.database_name {
        db.database_name = v.trim().to_string();
    }
    if let Some(v) = patch.db_type {
        db.db_type = v;
    }
    if let Some(v) = patch.host {
        db.host = v;
    }
    if let Some(v) = patch.port {
        db.port = v;
    }
    if let Some(v) = patch.username_env {
        db.username_env = v;
    }
    if let Some(v) = patch.password_env {
        db.password_env = v;
    }
    if let Some(v) = patch.connection_string {
        db.connection_string = v;
    }
    if let Some(v) = patch.schema_overview {
        db.schema_overview = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn create_test_store() -> RegistryStore {
        RegistryStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_service() {
        let store = create_test_store().await;
        let mut payload = ServiceCreate::new("api").with_start_command("run --port {PORT}");
        payload.tags = vec!["backend".to_string()];
        payload
            .env_overrides
            .insert("API_URL".to_string(), "http://{HOST}:{PORT}".to_string());

        let created = store.create_service(payload).await.unwrap();
        assert_eq!(created.status, ServiceStatus::Stopped);
        assert!(created.process_pid.is_none());

        let loaded = store.get_service(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "api");
        assert_eq!(loaded.tags, vec!["backend".to_string()]);
        assert_eq!(
            loaded.env_overrides.get("API_URL").map(String::as_str),
            Some("http://{HOST}:{PORT}")
        );
    }

    #[tokio::test]
    async fn test_create_duplicate_name_rejected() {
        let store = create_test_store().await;
        store.create_service(ServiceCreate::new("api")).await.unwrap();

        let err = store
            .create_service(ServiceCreate::new("api"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { entity: "service", .. }));
        assert_eq!(store.counts().await.unwrap().services, 1);
    }

    #[tokio::test]
    async fn test_invalid_env_override_name_rejected() {
        let store = create_test_store().await;
        let mut payload = ServiceCreate::new("api");
        payload
            .env_overrides
            .insert("BAD-NAME".to_string(), "x".to_string());
        assert!(matches!(
            store.create_service(payload).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_by_id_or_name() {
        let store = create_test_store().await;
        let created = store.create_service(ServiceCreate::new("web")).await.unwrap();

        assert_eq!(store.resolve_service(&created.id).await.unwrap().id, created.id);
        assert_eq!(store.resolve_service("web").await.unwrap().id, created.id);
        assert!(matches!(
            store.resolve_service("missing").await,
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_patch_clears_nullable_fields() {
        let store = create_test_store().await;
        let created = store
            .create_service(ServiceCreate::new("api").with_port(4000))
            .await
            .unwrap();

        let updated = store
            .update_service(
                &created.id,
                ServiceUpdate {
                    port: Some(None),
                    description: Some("HTTP API".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.port, None);
        assert_eq!(updated.description, "HTTP API");
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_rename_onto_existing_name_rejected() {
        let store = create_test_store().await;
        store.create_service(ServiceCreate::new("api")).await.unwrap();
        let worker = store.create_service(ServiceCreate::new("worker")).await.unwrap();

        let err = store
            .update_service(
                &worker.id,
                ServiceUpdate {
                    name: Some("api".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_list_services_filters_and_orders() {
        let store = create_test_store().await;
        let mut b = ServiceCreate::new("beta");
        b.category = "frontend".to_string();
        store.create_service(b).await.unwrap();
        store.create_service(ServiceCreate::new("alpha")).await.unwrap();

        let all = store.list_services(&ServiceFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let frontend = store
            .list_services(&ServiceFilter {
                category: Some("frontend".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(frontend.len(), 1);
        assert_eq!(frontend[0].name, "beta");
    }

    #[tokio::test]
    async fn test_delete_service_removes_keys() {
        let store = create_test_store().await;
        let svc = store.create_service(ServiceCreate::new("api")).await.unwrap();
        store
            .create_key(&svc.id, KeyRefCreate::new("Stripe", "STRIPE_KEY"))
            .await
            .unwrap();

        store.delete_service(&svc.id).await.unwrap();
        assert!(store.get_service(&svc.id).await.unwrap().is_none());
        assert!(store.list_keys().await.unwrap().is_empty());
        assert!(matches!(
            store.delete_service(&svc.id).await,
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_database_unlinks_services() {
        let store = create_test_store().await;
        let db = store
            .create_database(DatabaseCreate::new("app_db"))
            .await
            .unwrap();
        let mut payload = ServiceCreate::new("api");
        payload.database_id = Some(db.id.clone());
        let svc = store.create_service(payload).await.unwrap();
        assert_eq!(store.linked_services(&db.id).await.unwrap().len(), 1);

        store.delete_database(&db.id).await.unwrap();

        let svc = store.require_service(&svc.id).await.unwrap();
        assert!(svc.database_id.is_none());
        assert!(store.list_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_database_link_rejected() {
        let store = create_test_store().await;
        let mut payload = ServiceCreate::new("api");
        payload.database_id = Some("nope".to_string());
        assert!(matches!(
            store.create_service(payload).await,
            Err(Error::DatabaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_preserves_live_state() {
        let store = create_test_store().await;
        let (created, is_new) = store
            .upsert_service_by_name(ServiceCreate::new("api").with_port(4000))
            .await
            .unwrap();
        assert!(is_new);

        let mut running = created.clone();
        running.status = ServiceStatus::Running;
        running.process_pid = Some(4242);
        running.log_path = Some("/tmp/api.log".to_string());
        store.save_service(&running).await.unwrap();

        let mut payload = ServiceCreate::new("api").with_port(4001);
        payload.description = "updated".to_string();
        let (updated, is_new) = store.upsert_service_by_name(payload).await.unwrap();

        assert!(!is_new);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.port, Some(4001));
        assert_eq!(updated.description, "updated");
        assert_eq!(updated.status, ServiceStatus::Running);
        assert_eq!(updated.process_pid, Some(4242));
        assert_eq!(updated.log_path.as_deref(), Some("/tmp/api.log"));
    }

    #[tokio::test]
    async fn test_upsert_database_by_name_is_idempotent() {
        let store = create_test_store().await;
        let first = store
            .upsert_database_by_name(DatabaseCreate::new("app_db"))
            .await
            .unwrap();
        let mut again = DatabaseCreate::new("app_db");
        again.db_type = "postgres".to_string();
        let second = store.upsert_database_by_name(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.db_type, "postgres");
        assert_eq!(store.list_databases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_keys_wholesale() {
        let store = create_test_store().await;
        let svc = store.create_service(ServiceCreate::new("api")).await.unwrap();
        store
            .replace_keys(
                &svc.id,
                vec![
                    KeyRefCreate::new("OpenAI", "OPENAI_API_KEY"),
                    KeyRefCreate::new("Stripe", "STRIPE_KEY"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.keys_for_service(&svc.id).await.unwrap().len(), 2);

        store.replace_keys(&svc.id, Vec::new()).await.unwrap();
        assert!(store.keys_for_service(&svc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_key_requires_service() {
        let store = create_test_store().await;
        let err = store
            .create_key("missing", KeyRefCreate::new("k", "K"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)));
        assert!(matches!(
            store.delete_key("missing").await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_port_owner_excludes_name() {
        let store = create_test_store().await;
        store
            .create_service(ServiceCreate::new("api").with_port(4000))
            .await
            .unwrap();

        let owner = store.find_port_owner(4000, Some("worker")).await.unwrap();
        assert_eq!(owner.map(|o| o.service_name), Some("api".to_string()));
        assert!(store.find_port_owner(4000, Some("api")).await.unwrap().is_none());
        assert!(store.find_port_owner(4001, None).await.unwrap().is_none());
        assert_eq!(store.service_ports().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("registry.db");

        let id = {
            let store = RegistryStore::open(&path).await.unwrap();
            let mut payload = ServiceCreate::new("api");
            payload.env_overrides = BTreeMap::from([("PORT".to_string(), "9000".to_string())]);
            store.create_service(payload).await.unwrap().id
        };

        let store = RegistryStore::open(&path).await.unwrap();
        let svc = store.require_service(&id).await.unwrap();
        assert_eq!(svc.env_overrides.get("PORT").map(String::as_str), Some("9000"));
    }

    #[tokio::test]
    async fn test_initialize_twice_is_noop() {
        let mut store = create_test_store().await;
        let added = store.initialize().await.unwrap();
        assert!(added.is_empty());
    }
}

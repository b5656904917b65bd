//! Local SQLite database layer for Laundry POS.
//!
//! Uses rusqlite with WAL mode. Holds two things: a document table that
//! backs the [`DocumentStore`] collections (`stores`, `storeSettings`,
//! `staffShifts`, `pos_orders/...`), and a flat key/value table standing in
//! for device-local storage (`orderState`, `token`, `userData`, ...).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PosError, PosResult};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/laundry-pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| PosError::remote(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("laundry-pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open an in-memory database with the full schema. Used by tests and by
/// callers that want a throwaway store.
pub fn open_in_memory() -> PosResult<DbState> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        -- documents (collection path + id -> JSON body)
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (collection, id)
        );

        -- device-local key/value storage
        CREATE TABLE IF NOT EXISTS local_storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    info!("Applied migration v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_documents_collection_updated
            ON documents (collection, updated_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;
    info!("Applied migration v2");
    Ok(())
}

impl DbState {
    pub fn lock(&self) -> PosResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PosError::remote(format!("db lock poisoned: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

/// Schema-on-write document collections.
///
/// Collection names are slash-separated paths
/// (`pos_orders/{adminId}/stores/{storeId}/orders`). Documents are JSON
/// objects; `update` merges top-level keys into an existing document.
pub trait DocumentStore {
    fn get(&self, collection: &str, id: &str) -> PosResult<Option<Value>>;

    /// Create or replace a document.
    fn set(&self, collection: &str, id: &str, data: &Value) -> PosResult<()>;

    /// Merge `patch` into an existing document. Fails with `NotFound` when
    /// the document does not exist.
    fn update(&self, collection: &str, id: &str, patch: &Value) -> PosResult<()>;

    fn list(&self, collection: &str) -> PosResult<Vec<(String, Value)>>;

    /// Insert with a generated id and return it.
    fn add(&self, collection: &str, data: &Value) -> PosResult<String> {
        let id = Uuid::new_v4().to_string();
        self.set(collection, &id, data)?;
        Ok(id)
    }

    /// Equality filter on a top-level field.
    fn query(&self, collection: &str, field: &str, value: &Value) -> PosResult<Vec<(String, Value)>> {
        Ok(self
            .list(collection)?
            .into_iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .collect())
    }
}

impl DocumentStore for DbState {
    fn get(&self, collection: &str, id: &str) -> PosResult<Option<Value>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(PosError::from))
            .transpose()
    }

    fn set(&self, collection: &str, id: &str, data: &Value) -> PosResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents (collection, id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![collection, id, data.to_string(), now],
        )?;
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, patch: &Value) -> PosResult<()> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| PosError::not_found(format!("{collection}/{id}")))?;

        let mut doc: Value = serde_json::from_str(&raw)?;
        merge_top_level(&mut doc, patch);

        conn.execute(
            "UPDATE documents SET data = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            params![doc.to_string(), Utc::now().to_rfc3339(), collection, id],
        )?;
        Ok(())
    }

    fn list(&self, collection: &str) -> PosResult<Vec<(String, Value)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, data FROM documents WHERE collection = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for (id, raw) in rows.flatten() {
            match serde_json::from_str::<Value>(&raw) {
                Ok(doc) => out.push((id, doc)),
                Err(e) => warn!(collection, id = %id, error = %e, "skipping unreadable document"),
            }
        }
        Ok(out)
    }
}

fn merge_top_level(doc: &mut Value, patch: &Value) {
    match (doc.as_object_mut(), patch.as_object()) {
        (Some(target), Some(source)) => {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        _ => *doc = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// Local key/value helpers
// ---------------------------------------------------------------------------

pub fn get_local(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM local_storage WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .ok()
}

pub fn set_local(conn: &Connection, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO local_storage (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_local(conn: &Connection, key: &str) -> PosResult<()> {
    conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

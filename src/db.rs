//! Local SQLite persistence for the receipt system.
//!
//! Uses rusqlite with WAL mode. The four entity collections are persisted as
//! JSON-serialized arrays in named slots (`entity_store`), matching the
//! original browser deployment's four localStorage keys; a missing slot means
//! an empty collection, not an error. A `local_settings` category/key/value
//! table holds the store profile and remote endpoint config.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;

/// Shared database handle; all access goes through the connection mutex.
pub struct DbState {
    pub conn: Mutex<Connection>,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Slot names for the four entity collections.
pub const SLOT_CUSTOMERS: &str = "customers";
pub const SLOT_ITEMS: &str = "items";
pub const SLOT_ORDERS: &str = "orders";
pub const SLOT_PAYMENTS: &str = "payments";

/// Initialize the database at `{data_dir}/receipts.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| crate::error::Error::Storage(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("receipts.db");
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
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path).map_err(|e| {
                crate::error::Error::Storage(format!("database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
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
fn run_migrations(conn: &Connection) -> Result<()> {
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

    Ok(())
}

/// Migration v1: entity slots and local settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- entity_store (one JSON array per collection)
        CREATE TABLE IF NOT EXISTS entity_store (
            slot TEXT PRIMARY KEY,
            data TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entity slots
// ---------------------------------------------------------------------------

/// Read a slot's JSON text. A missing slot yields `[]`.
pub fn read_slot(conn: &Connection, slot: &str) -> Result<String> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM entity_store WHERE slot = ?1",
            params![slot],
            |row| row.get(0),
        )
        .optional()?;
    Ok(data.unwrap_or_else(|| "[]".to_string()))
}

/// Write a slot's JSON text, replacing any previous contents.
pub fn write_slot(conn: &Connection, slot: &str, data: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO entity_store (slot, data, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(slot) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![slot, data],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a setting value, or `None` when unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Upsert a setting value.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key)
         DO UPDATE SET setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// In-memory database with the full schema, for unit tests.
#[cfg(test)]
pub fn open_in_memory() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("migrations");
    DbState {
        conn: Mutex::new(conn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_slot_reads_as_empty_array() {
        let db = open_in_memory();
        let conn = db.conn.lock().unwrap();
        assert_eq!(read_slot(&conn, SLOT_ORDERS).unwrap(), "[]");
    }

    #[test]
    fn slot_write_replaces_previous_contents() {
        let db = open_in_memory();
        let conn = db.conn.lock().unwrap();
        write_slot(&conn, SLOT_CUSTOMERS, r#"[{"id":"1"}]"#).unwrap();
        write_slot(&conn, SLOT_CUSTOMERS, r#"[{"id":"2"}]"#).unwrap();
        assert_eq!(read_slot(&conn, SLOT_CUSTOMERS).unwrap(), r#"[{"id":"2"}]"#);
    }

    #[test]
    fn settings_upsert_and_read_back() {
        let db = open_in_memory();
        let conn = db.conn.lock().unwrap();
        assert_eq!(get_setting(&conn, "store", "name"), None);
        set_setting(&conn, "store", "name", "CRE.MNL").unwrap();
        set_setting(&conn, "store", "name", "CRE.MNL Pasig").unwrap();
        assert_eq!(
            get_setting(&conn, "store", "name").as_deref(),
            Some("CRE.MNL Pasig")
        );
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = open_in_memory();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}

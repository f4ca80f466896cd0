//! Local SQLite database layer for Sari POS.
//!
//! Uses rusqlite with WAL mode. Owns the three persisted collections
//! (`products`, `sale_records`, `loyalty_customers`), the stock adjustment
//! outbox, and the scoped `local_settings` key/value store. Provides schema
//! migrations and managed state shared across the workflow modules.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 5;

/// Initialize the database at `{data_dir}/sari-pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("sari-pos.db");
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
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

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
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }
    if current < 5 {
        migrate_v5(conn)?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i32) -> Result<(), String> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![version],
    )
    .map_err(|e| format!("record schema v{version}: {e}"))?;
    Ok(())
}

/// v1: core collections. `sale_records` still carries the original
/// single-service columns; multi-product line items arrived in v2.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- products (catalog; read-only reference data for sales)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            price REAL NOT NULL DEFAULT 0,
            cost REAL NOT NULL DEFAULT 0,
            available INTEGER NOT NULL DEFAULT 1,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- sale_records (the ledger)
        CREATE TABLE IF NOT EXISTS sale_records (
            id TEXT PRIMARY KEY,
            customer_name TEXT NOT NULL DEFAULT 'N/A',
            service_id TEXT,
            service_name TEXT,
            quantity INTEGER,
            total_price REAL NOT NULL DEFAULT 0,
            cashier_id TEXT NOT NULL DEFAULT '',
            cashier_name TEXT,
            state TEXT NOT NULL DEFAULT 'unpaid'
                CHECK (state IN ('unpaid', 'paid', 'voided')),
            payment_method TEXT,
            amount_tendered REAL,
            change_given REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_sale_records_state ON sale_records(state);
        CREATE INDEX IF NOT EXISTS idx_sale_records_created ON sale_records(created_at);

        -- loyalty_customers (reference data for customer resolution)
        CREATE TABLE IF NOT EXISTS loyalty_customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            cars TEXT NOT NULL DEFAULT '[]',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_loyalty_customers_name
            ON loyalty_customers(name);
        ",
    )
    .map_err(|e| format!("migrate v1: {e}"))?;
    record_version(conn, 1)
}

/// v2: multi-product sales. Line items are stored as a JSON array on the
/// record; the v1 single-service columns stay behind as the legacy
/// fallback for old records.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "ALTER TABLE sale_records ADD COLUMN line_items TEXT NOT NULL DEFAULT '[]';",
    )
    .map_err(|e| format!("migrate v2: {e}"))?;
    record_version(conn, 2)
}

/// v3: stock adjustment outbox. Enqueued in the same transaction as the
/// ledger write; drained against the external inventory service.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stock_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            idempotency_key TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'applied', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            applied_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_stock_queue_status ON stock_queue(status);
        ",
    )
    .map_err(|e| format!("migrate v3: {e}"))?;
    record_version(conn, 3)
}

/// v4: scoped local settings (store header, currency symbol).
fn migrate_v4(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );
        ",
    )
    .map_err(|e| format!("migrate v4: {e}"))?;
    record_version(conn, 4)
}

/// v5: void audit trail on sale records.
fn migrate_v5(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "ALTER TABLE sale_records ADD COLUMN void_reason TEXT;
         ALTER TABLE sale_records ADD COLUMN voided_by TEXT;
         ALTER TABLE sale_records ADD COLUMN voided_at TEXT;",
    )
    .map_err(|e| format!("migrate v5: {e}"))?;
    record_version(conn, 5)
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a single setting value, or `None` if unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Run all migrations against a caller-provided connection. Panics on
/// failure; intended for in-memory test databases only.
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

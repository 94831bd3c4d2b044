//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, V1)?;
    }
    if version < 2 {
        apply(conn, 2, V2)?;
    }
    if version < 3 {
        apply(conn, 3, V3)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply one migration's statements atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    for stmt in statements {
        if let Err(e) = conn.execute_batch(stmt) {
            conn.execute_batch("ROLLBACK").ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version]) {
        conn.execute_batch("ROLLBACK").ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute_batch("COMMIT") {
        conn.execute_batch("ROLLBACK").ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Version 1: mirrored entities, raw records, settings and run logs
const V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS pets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        night_rate REAL NOT NULL DEFAULT 0,
        day_rate REAL NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        source TEXT NOT NULL DEFAULT 'manual',
        external_id TEXT UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_pets_name ON pets(name COLLATE NOCASE)",
    "CREATE TABLE IF NOT EXISTS stays (
        id TEXT PRIMARY KEY,
        pet_id TEXT NOT NULL REFERENCES pets(id) ON DELETE CASCADE,
        arrival_at INTEGER NOT NULL,
        departure_at INTEGER NOT NULL,
        external_id TEXT UNIQUE,
        source TEXT NOT NULL DEFAULT 'manual',
        billed_amount REAL,
        night_rate REAL,
        day_rate REAL,
        cancelled_at INTEGER,
        cancellation_reason TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_stays_pet_dates ON stays(pet_id, arrival_at, departure_at)",
    "CREATE TABLE IF NOT EXISTS sync_records (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        source_url TEXT NOT NULL,
        check_in_at INTEGER,
        check_out_at INTEGER,
        status TEXT,
        pet_name TEXT,
        appointment_total REAL,
        raw_data TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        last_change_type TEXT NOT NULL,
        changed_fields TEXT,
        previous_data TEXT,
        pet_id TEXT REFERENCES pets(id) ON DELETE SET NULL,
        stay_id TEXT REFERENCES stays(id) ON DELETE SET NULL,
        sync_status TEXT NOT NULL DEFAULT 'active',
        missing_sync_count INTEGER NOT NULL DEFAULT 0,
        missing_since INTEGER,
        first_synced_at INTEGER NOT NULL,
        last_synced_at INTEGER NOT NULL,
        last_changed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_records_check_in ON sync_records(check_in_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_records_status ON sync_records(sync_status)",
    "CREATE TABLE IF NOT EXISTS sync_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        session_cookies TEXT,
        session_expires_at INTEGER,
        last_sync_at INTEGER,
        last_sync_status TEXT,
        last_sync_message TEXT,
        schedule_cursor_date TEXT
    )",
    "INSERT OR IGNORE INTO sync_settings (id) VALUES (1)",
    "CREATE TABLE IF NOT EXISTS sync_logs (
        id TEXT PRIMARY KEY,
        sync_type TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        found INTEGER NOT NULL DEFAULT 0,
        created INTEGER NOT NULL DEFAULT 0,
        updated INTEGER NOT NULL DEFAULT 0,
        unchanged INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        skipped INTEGER NOT NULL DEFAULT 0,
        archived INTEGER NOT NULL DEFAULT 0,
        errors TEXT NOT NULL DEFAULT '[]',
        change_details TEXT NOT NULL DEFAULT '[]',
        duration_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_logs_started ON sync_logs(started_at DESC)",
];

/// Version 2: micro-sync work queue
const V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        source_url TEXT NOT NULL,
        title TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        next_retry_at INTEGER,
        last_error TEXT,
        queued_at INTEGER NOT NULL,
        processing_started_at INTEGER,
        processed_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, queued_at)",
];

/// Version 3: resumable checkpoints and scheduled-job health
const V3: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_checkpoints (
        id TEXT PRIMARY KEY,
        sync_type TEXT NOT NULL,
        target_start TEXT NOT NULL,
        target_end TEXT NOT NULL,
        last_completed_date TEXT,
        total_batches INTEGER NOT NULL DEFAULT 0,
        batches_completed INTEGER NOT NULL DEFAULT 0,
        appointments_processed INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_checkpoints_type ON sync_checkpoints(sync_type, status, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS cron_health (
        cron_name TEXT PRIMARY KEY,
        last_ran_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error_msg TEXT
    )",
];

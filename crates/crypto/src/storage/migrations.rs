//! Versioned schema for the local secret store.

use rusqlite::Connection;

use crate::error::E2eeError;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE e2ee_device_info (
            id             INTEGER PRIMARY KEY CHECK (id = 1),
            device_id      TEXT NOT NULL,
            user_id        TEXT NOT NULL,
            device_name    TEXT NOT NULL,
            fingerprint    TEXT NOT NULL,
            public_key     TEXT NOT NULL,
            last_active_at INTEGER NOT NULL
        );

        CREATE TABLE e2ee_device_keys (
            device_id   TEXT PRIMARY KEY,
            private_key BLOB NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE e2ee_pre_key_secrets (
            key_id      TEXT PRIMARY KEY,
            device_id   TEXT NOT NULL,
            private_key BLOB NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX idx_pre_key_secrets_device ON e2ee_pre_key_secrets (device_id);
    ",
}];

/// Bring the connection's schema up to the latest version.
pub(super) fn run(conn: &Connection) -> Result<(), E2eeError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
    }
    Ok(())
}

//! Device directory client.
//!
//! The directory is the shared, remote collaborator holding every user's
//! device public keys and advertised one-time pre-keys. No cryptographic
//! logic lives here — only the request/response contract. `SqliteDirectory`
//! is the reference implementation of that contract; deployments back the
//! trait with their own store, which must provide the same single-statement
//! atomic pre-key claim.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use convoy_shared::constants::DEVICE_FRESHNESS_WINDOW_DAYS;
use convoy_shared::ids::{DeviceId, PreKeyId, UserId};
use rusqlite::Connection;

use crate::error::E2eeError;
use crate::identity::DeviceIdentity;
use crate::prekeys::PreKey;

/// Default freshness window: devices inactive longer than this are excluded
/// from encryption fan-out, which is the system's only implicit expiry.
pub fn default_freshness_window() -> Duration {
    Duration::days(DEVICE_FRESHNESS_WINDOW_DAYS)
}

/// A device as listed for encryption fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub device_id: DeviceId,
    /// Base64 X25519 public key as registered.
    pub public_key: String,
}

/// The remote device-directory collaborator contract.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Register a new device. The directory assigns the `device_id`;
    /// clients never invent one.
    async fn register(
        &self,
        user_id: UserId,
        name: &str,
        fingerprint: &str,
        public_key: &str,
    ) -> Result<DeviceIdentity, E2eeError>;

    /// List devices for `user_id` whose `last_active_at` falls within
    /// `freshness_window`.
    async fn list_active_devices(
        &self,
        user_id: UserId,
        freshness_window: Duration,
    ) -> Result<Vec<DirectoryEntry>, E2eeError>;

    /// List every device for `user_id`, fresh or stale, with full metadata.
    /// Device-management surface, not the encryption fan-out.
    async fn list_devices(&self, user_id: UserId) -> Result<Vec<DeviceIdentity>, E2eeError>;

    /// Refresh a device's `last_active_at` timestamp. Returns `false` when
    /// no such device exists, which a caller should treat as remote
    /// revocation.
    async fn touch(&self, device_id: DeviceId) -> Result<bool, E2eeError>;

    /// Delete a device record and invalidate its queued pre-keys.
    async fn revoke(&self, device_id: DeviceId) -> Result<(), E2eeError>;

    /// Advertise a batch of one-time pre-key public halves.
    async fn publish_pre_keys(&self, user_id: UserId, keys: &[PreKey]) -> Result<(), E2eeError>;

    /// Atomically consume one unconsumed pre-key for the user (optionally
    /// scoped to one device). At-most-once even under concurrent claims
    /// from different processes — the backing store's transactional
    /// guarantee, not in-process locking.
    async fn claim_pre_key(
        &self,
        user_id: UserId,
        device_id: Option<DeviceId>,
    ) -> Result<Option<PreKey>, E2eeError>;

    /// Count of unconsumed pre-keys advertised for a device.
    async fn available_pre_key_count(&self, device_id: DeviceId) -> Result<u32, E2eeError>;
}

const DIRECTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_devices (
    device_id      TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL,
    device_name    TEXT NOT NULL,
    fingerprint    TEXT NOT NULL,
    public_key     TEXT NOT NULL,
    last_active_at INTEGER NOT NULL,
    created_at     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_devices_user ON user_devices (user_id, last_active_at);

CREATE TABLE IF NOT EXISTS e2ee_pre_keys (
    key_id     TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    device_id  TEXT NOT NULL,
    public_key TEXT NOT NULL,
    consumed   INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pre_keys_claim ON e2ee_pre_keys (user_id, device_id, consumed);
";

/// SQLite-backed reference directory.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open (or create) a directory database at `path` and apply the schema.
    pub fn open(path: &std::path::Path) -> Result<Self, E2eeError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(DIRECTORY_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory directory with schema applied. Test/demo use.
    pub fn open_in_memory() -> Result<Self, E2eeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DIRECTORY_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Wrap an existing connection without applying the schema. Used to
    /// exercise the missing-schema degraded mode.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, E2eeError> {
        self.conn
            .lock()
            .map_err(|_| E2eeError::StorageError("directory connection lock poisoned".into()))
    }
}

/// Classify a directory-side sqlite error. A missing table means the
/// deployment has not run the E2EE migration yet — surfaced as
/// `DirectoryUnavailable` so callers can decide about degraded operation.
fn directory_err(err: rusqlite::Error) -> E2eeError {
    let detail = err.to_string();
    if detail.contains("no such table") {
        E2eeError::DirectoryUnavailable(detail)
    } else {
        E2eeError::StorageError(detail)
    }
}

fn timestamp_to_datetime(secs: i64) -> Result<DateTime<Utc>, E2eeError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| E2eeError::StorageError(format!("invalid timestamp: {secs}")))
}

#[async_trait]
impl DeviceDirectory for SqliteDirectory {
    async fn register(
        &self,
        user_id: UserId,
        name: &str,
        fingerprint: &str,
        public_key: &str,
    ) -> Result<DeviceIdentity, E2eeError> {
        let conn = self.lock()?;
        let device_id = DeviceId::new();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO user_devices
                 (device_id, user_id, device_name, fingerprint, public_key, last_active_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                device_id.to_string(),
                user_id.to_string(),
                name,
                fingerprint,
                public_key,
                now
            ],
        )
        .map_err(directory_err)?;

        Ok(DeviceIdentity {
            device_id,
            user_id,
            name: name.to_string(),
            fingerprint: fingerprint.to_string(),
            public_key: public_key.to_string(),
            last_active_at: timestamp_to_datetime(now)?,
        })
    }

    async fn list_active_devices(
        &self,
        user_id: UserId,
        freshness_window: Duration,
    ) -> Result<Vec<DirectoryEntry>, E2eeError> {
        let conn = self.lock()?;
        let cutoff = (Utc::now() - freshness_window).timestamp();

        let mut stmt = conn
            .prepare(
                "SELECT device_id, public_key FROM user_devices
                 WHERE user_id = ?1 AND last_active_at >= ?2",
            )
            .map_err(directory_err)?;

        let rows = stmt
            .query_map(
                rusqlite::params![user_id.to_string(), cutoff],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(directory_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (device_id, public_key) = row.map_err(directory_err)?;
            let device_id = device_id
                .parse::<DeviceId>()
                .map_err(|e| E2eeError::StorageError(format!("bad device_id in directory: {e}")))?;
            entries.push(DirectoryEntry {
                device_id,
                public_key,
            });
        }
        Ok(entries)
    }

    async fn list_devices(&self, user_id: UserId) -> Result<Vec<DeviceIdentity>, E2eeError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT device_id, device_name, fingerprint, public_key, last_active_at
                 FROM user_devices WHERE user_id = ?1 ORDER BY last_active_at DESC",
            )
            .map_err(directory_err)?;

        let rows = stmt
            .query_map([user_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(directory_err)?;

        let mut devices = Vec::new();
        for row in rows {
            let (device_id, name, fingerprint, public_key, last_active) =
                row.map_err(directory_err)?;
            devices.push(DeviceIdentity {
                device_id: device_id.parse::<DeviceId>().map_err(|e| {
                    E2eeError::StorageError(format!("bad device_id in directory: {e}"))
                })?,
                user_id,
                name,
                fingerprint,
                public_key,
                last_active_at: timestamp_to_datetime(last_active)?,
            });
        }
        Ok(devices)
    }

    async fn touch(&self, device_id: DeviceId) -> Result<bool, E2eeError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE user_devices SET last_active_at = ?1 WHERE device_id = ?2",
                rusqlite::params![Utc::now().timestamp(), device_id.to_string()],
            )
            .map_err(directory_err)?;
        Ok(updated > 0)
    }

    async fn revoke(&self, device_id: DeviceId) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(directory_err)?;
        tx.execute(
            "DELETE FROM user_devices WHERE device_id = ?1",
            [device_id.to_string()],
        )
        .map_err(directory_err)?;
        tx.execute(
            "DELETE FROM e2ee_pre_keys WHERE device_id = ?1",
            [device_id.to_string()],
        )
        .map_err(directory_err)?;
        tx.commit().map_err(directory_err)?;
        Ok(())
    }

    async fn publish_pre_keys(&self, user_id: UserId, keys: &[PreKey]) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(directory_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO e2ee_pre_keys (key_id, user_id, device_id, public_key, consumed, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                )
                .map_err(directory_err)?;
            let now = Utc::now().timestamp();
            for key in keys {
                stmt.execute(rusqlite::params![
                    key.key_id.to_string(),
                    user_id.to_string(),
                    key.device_id.to_string(),
                    key.public_key,
                    now
                ])
                .map_err(directory_err)?;
            }
        }
        tx.commit().map_err(directory_err)?;
        Ok(())
    }

    async fn claim_pre_key(
        &self,
        user_id: UserId,
        device_id: Option<DeviceId>,
    ) -> Result<Option<PreKey>, E2eeError> {
        let conn = self.lock()?;
        let device_filter = device_id.map(|d| d.to_string());

        // Single-statement compare-and-swap: the row is only claimed if it
        // is still unconsumed at update time.
        let result = conn
            .query_row(
                "UPDATE e2ee_pre_keys SET consumed = 1
                 WHERE key_id = (
                     SELECT key_id FROM e2ee_pre_keys
                     WHERE user_id = ?1
                       AND (?2 IS NULL OR device_id = ?2)
                       AND consumed = 0
                     ORDER BY created_at, key_id
                     LIMIT 1
                 ) AND consumed = 0
                 RETURNING key_id, device_id, public_key",
                rusqlite::params![user_id.to_string(), device_filter],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            );

        match result {
            Ok((key_id, device_id, public_key)) => {
                let key_id = key_id
                    .parse::<PreKeyId>()
                    .map_err(|e| E2eeError::StorageError(format!("bad key_id in directory: {e}")))?;
                let device_id = device_id
                    .parse::<DeviceId>()
                    .map_err(|e| E2eeError::StorageError(format!("bad device_id in directory: {e}")))?;
                Ok(Some(PreKey {
                    key_id,
                    device_id,
                    public_key,
                    consumed: true,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(directory_err(e)),
        }
    }

    async fn available_pre_key_count(&self, device_id: DeviceId) -> Result<u32, E2eeError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM e2ee_pre_keys WHERE device_id = ?1 AND consumed = 0",
            [device_id.to_string()],
            |row| row.get(0),
        )
        .map_err(directory_err)
    }
}

//! Device-local secret store backed by SQLite.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use convoy_shared::ids::{DeviceId, PreKeyId, UserId};
use rusqlite::{Connection, OptionalExtension};
use x25519_dalek::StaticSecret;

use super::migrations;
use crate::error::E2eeError;
use crate::identity::{DeviceIdentity, DeviceKeyPair};

/// Holds this device's private key material and cached identity record.
///
/// Absence of a row is the normal first-run state and is reported as
/// `Ok(None)`; a row that exists but cannot be decoded is reported as
/// `SecretStoreCorrupt` so the caller can wipe and re-register.
pub struct SecretStore {
    conn: Mutex<Connection>,
}

impl SecretStore {
    pub fn open(path: &Path) -> Result<Self, E2eeError> {
        let conn = Connection::open(path)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, E2eeError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, E2eeError> {
        self.conn
            .lock()
            .map_err(|_| E2eeError::StorageError("secret store lock poisoned".into()))
    }

    #[cfg(test)]
    pub(crate) fn lock_for_tests(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Persist the device's long-term private key.
    pub fn store_device_key(
        &self,
        device_id: DeviceId,
        secret: &StaticSecret,
    ) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO e2ee_device_keys (device_id, private_key, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                device_id.to_string(),
                secret.to_bytes().as_slice(),
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Load the device's long-term keypair, if one is stored.
    pub fn load_device_key(&self, device_id: DeviceId) -> Result<Option<DeviceKeyPair>, E2eeError> {
        let conn = self.lock()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT private_key FROM e2ee_device_keys WHERE device_id = ?1",
                [device_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            None => Ok(None),
            Some(bytes) => Ok(Some(keypair_from_blob(&bytes)?)),
        }
    }

    pub fn delete_device_key(&self, device_id: DeviceId) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM e2ee_device_keys WHERE device_id = ?1",
            [device_id.to_string()],
        )?;
        Ok(())
    }

    /// Cache the registered identity record (single row).
    pub fn store_device_info(&self, identity: &DeviceIdentity) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO e2ee_device_info
                 (id, device_id, user_id, device_name, fingerprint, public_key, last_active_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                identity.device_id.to_string(),
                identity.user_id.to_string(),
                identity.name,
                identity.fingerprint,
                identity.public_key,
                identity.last_active_at.timestamp()
            ],
        )?;
        Ok(())
    }

    /// Load the cached identity record, if present.
    pub fn load_device_info(&self) -> Result<Option<DeviceIdentity>, E2eeError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT device_id, user_id, device_name, fingerprint, public_key, last_active_at
                 FROM e2ee_device_info WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((device_id, user_id, name, fingerprint, public_key, last_active)) = row else {
            return Ok(None);
        };

        let device_id = device_id
            .parse::<DeviceId>()
            .map_err(|e| E2eeError::SecretStoreCorrupt(format!("device_id: {e}")))?;
        let user_id = user_id
            .parse::<UserId>()
            .map_err(|e| E2eeError::SecretStoreCorrupt(format!("user_id: {e}")))?;
        let last_active_at = DateTime::from_timestamp(last_active, 0)
            .ok_or_else(|| E2eeError::SecretStoreCorrupt(format!("last_active_at: {last_active}")))?;

        Ok(Some(DeviceIdentity {
            device_id,
            user_id,
            name,
            fingerprint,
            public_key,
            last_active_at,
        }))
    }

    pub fn clear_device_info(&self) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM e2ee_device_info", [])?;
        Ok(())
    }

    /// Persist the private half of a published pre-key.
    pub fn put_pre_key_secret(
        &self,
        key_id: PreKeyId,
        device_id: DeviceId,
        secret: &StaticSecret,
    ) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO e2ee_pre_key_secrets (key_id, device_id, private_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                key_id.to_string(),
                device_id.to_string(),
                secret.to_bytes().as_slice(),
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Remove and return a pre-key's private half. One-time by construction.
    pub fn take_pre_key_secret(&self, key_id: PreKeyId) -> Result<Option<DeviceKeyPair>, E2eeError> {
        let conn = self.lock()?;
        let blob = conn
            .query_row(
                "DELETE FROM e2ee_pre_key_secrets WHERE key_id = ?1 RETURNING private_key",
                [key_id.to_string()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;

        match blob {
            None => Ok(None),
            Some(bytes) => Ok(Some(keypair_from_blob(&bytes)?)),
        }
    }

    /// Count of stored pre-key private halves for a device.
    pub fn pre_key_secret_count(&self, device_id: DeviceId) -> Result<u32, E2eeError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM e2ee_pre_key_secrets WHERE device_id = ?1",
            [device_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Erase everything belonging to a device. Used on revocation and when
    /// recovering from a corrupt store.
    pub fn wipe_device(&self, device_id: DeviceId) -> Result<(), E2eeError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM e2ee_device_keys WHERE device_id = ?1",
            [device_id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM e2ee_pre_key_secrets WHERE device_id = ?1",
            [device_id.to_string()],
        )?;
        tx.execute("DELETE FROM e2ee_device_info", [])?;
        tx.commit()?;
        Ok(())
    }
}

fn keypair_from_blob(bytes: &[u8]) -> Result<DeviceKeyPair, E2eeError> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| {
        E2eeError::SecretStoreCorrupt(format!("private key has {} bytes, expected 32", bytes.len()))
    })?;
    Ok(DeviceKeyPair::from_private_bytes(arr))
}

//! Session lifecycle for this device's E2EE state.
//!
//! A [`CryptoSession`] is an owned value holding the directory client, the
//! local secret store, and the currently loaded device. Callers construct
//! one per logged-in user; there is no process-global instance.

use std::sync::{Arc, RwLock};

use chrono::Duration;
use convoy_shared::ids::{DeviceId, UserId};
use tracing::{info, warn};

use crate::directory::{default_freshness_window, DeviceDirectory};
use crate::envelope::MessagePayload;
use crate::error::E2eeError;
use crate::fingerprint;
use crate::identity::{DeviceIdentity, DeviceKeyPair};
use crate::message::{self, EncryptOutcome};
use crate::prekeys::{self, PreKey};
use crate::storage::SecretStore;

/// Outcome of [`CryptoSession::initialize`].
#[derive(Debug)]
pub enum E2eeStatus {
    /// This device is registered and can encrypt and decrypt.
    Ready(DeviceIdentity),
    /// The directory is unreachable or not provisioned. No identity was
    /// established; encryption operations will fail until a later
    /// `initialize` succeeds.
    Unavailable { name: String, fingerprint: String },
}

struct CurrentDevice {
    identity: DeviceIdentity,
    keys: DeviceKeyPair,
}

/// Per-user E2EE session over a device directory `D`.
pub struct CryptoSession<D: DeviceDirectory> {
    directory: D,
    secrets: SecretStore,
    freshness_window: Duration,
    current: RwLock<Option<Arc<CurrentDevice>>>,
}

impl<D: DeviceDirectory> CryptoSession<D> {
    pub fn new(directory: D, secrets: SecretStore) -> Self {
        Self {
            directory,
            secrets,
            freshness_window: default_freshness_window(),
            current: RwLock::new(None),
        }
    }

    /// Override the device freshness window. Mainly for tests and
    /// deployments with tighter activity requirements.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Establish this device's identity for `user_id`.
    ///
    /// Loads the cached identity and private key when both are present and
    /// belong to `user_id`; otherwise registers a fresh device. A corrupt
    /// secret store is wiped and treated as a fresh install. A device that
    /// was revoked from another device re-registers under a new id. An
    /// unreachable directory yields `E2eeStatus::Unavailable` rather than
    /// an error, so the caller can surface degraded mode explicitly.
    pub async fn initialize(&self, user_id: UserId) -> Result<E2eeStatus, E2eeError> {
        match self.load_local(user_id) {
            Ok(Some((identity, keys))) => match self.directory.touch(identity.device_id).await {
                Ok(true) => {
                    info!(device_id = %identity.device_id, "resumed existing device identity");
                    self.finish_initialize(identity, keys).await
                }
                Ok(false) => {
                    warn!(
                        device_id = %identity.device_id,
                        "device no longer in directory, re-registering"
                    );
                    self.secrets.wipe_device(identity.device_id)?;
                    self.register_fresh(user_id).await
                }
                Err(E2eeError::DirectoryUnavailable(detail)) => {
                    Ok(self.unavailable(&detail))
                }
                Err(err) => Err(err),
            },
            Ok(None) => self.register_fresh(user_id).await,
            Err(E2eeError::SecretStoreCorrupt(detail)) => {
                warn!(error = %detail, "secret store corrupt, wiping and re-registering");
                if let Ok(Some(identity)) = self.secrets.load_device_info() {
                    self.secrets.wipe_device(identity.device_id)?;
                } else {
                    self.secrets.clear_device_info()?;
                }
                self.register_fresh(user_id).await
            }
            Err(err) => Err(err),
        }
    }

    fn load_local(
        &self,
        user_id: UserId,
    ) -> Result<Option<(DeviceIdentity, DeviceKeyPair)>, E2eeError> {
        let Some(identity) = self.secrets.load_device_info()? else {
            return Ok(None);
        };
        if identity.user_id != user_id {
            // A different account used this store. Start over for this user.
            return Ok(None);
        }
        let Some(keys) = self.secrets.load_device_key(identity.device_id)? else {
            return Ok(None);
        };
        Ok(Some((identity, keys)))
    }

    async fn register_fresh(&self, user_id: UserId) -> Result<E2eeStatus, E2eeError> {
        let name = fingerprint::device_name();
        let fp = fingerprint::device_fingerprint();
        let keys = DeviceKeyPair::generate();

        let identity = match self
            .directory
            .register(user_id, &name, &fp, &keys.public_key_b64())
            .await
        {
            Ok(identity) => identity,
            Err(E2eeError::DirectoryUnavailable(detail)) => {
                return Ok(self.unavailable(&detail));
            }
            Err(err) => return Err(err),
        };

        self.secrets.store_device_key(identity.device_id, keys.secret())?;
        self.secrets.store_device_info(&identity)?;
        info!(device_id = %identity.device_id, "registered new device");

        self.finish_initialize(identity, keys).await
    }

    async fn finish_initialize(
        &self,
        identity: DeviceIdentity,
        keys: DeviceKeyPair,
    ) -> Result<E2eeStatus, E2eeError> {
        // Pre-key publication failure degrades session establishment for
        // peers but does not block this device from operating.
        if let Err(err) = prekeys::replenish_if_low(
            &self.directory,
            &self.secrets,
            identity.user_id,
            identity.device_id,
        )
        .await
        {
            warn!(error = %err, "pre-key replenishment failed");
        }

        let device = Arc::new(CurrentDevice {
            identity: identity.clone(),
            keys,
        });
        *self.write_current()? = Some(device);
        Ok(E2eeStatus::Ready(identity))
    }

    fn unavailable(&self, detail: &str) -> E2eeStatus {
        warn!(error = %detail, "device directory unavailable, e2ee disabled");
        E2eeStatus::Unavailable {
            name: fingerprint::device_name(),
            fingerprint: fingerprint::device_fingerprint(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.current
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// The identity established by the last successful `initialize`.
    pub fn current_identity(&self) -> Option<DeviceIdentity> {
        self.current
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|d| d.identity.clone()))
    }

    /// Encrypt `plaintext` for every active device of `recipient` plus this
    /// user's own devices.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        recipient: UserId,
    ) -> Result<EncryptOutcome, E2eeError> {
        let device = self.current_device()?;
        message::encrypt_for_devices(
            &self.directory,
            plaintext,
            recipient,
            device.identity.user_id,
            self.freshness_window,
        )
        .await
    }

    /// Decrypt raw message-store content. Envelopes are decrypted with this
    /// device's key; legacy plaintext passes through.
    pub fn decrypt(&self, raw: &str) -> Result<String, E2eeError> {
        let device = self.current_device()?;
        let payload = MessagePayload::from_wire(raw);
        message::decrypt_payload(&payload, device.identity.device_id, device.keys.secret())
    }

    /// Claim a one-time pre-key for `user_id`, optionally pinned to one of
    /// their devices. An exhausted pool is an error at this level.
    pub async fn claim_pre_key(
        &self,
        user_id: UserId,
        device_id: Option<DeviceId>,
    ) -> Result<PreKey, E2eeError> {
        self.current_device()?;
        self.directory
            .claim_pre_key(user_id, device_id)
            .await?
            .ok_or(E2eeError::PreKeyExhausted)
    }

    /// Every device registered for this user, fresh or stale.
    pub async fn list_my_devices(&self) -> Result<Vec<DeviceIdentity>, E2eeError> {
        let device = self.current_device()?;
        self.directory.list_devices(device.identity.user_id).await
    }

    /// Revoke this device: remove it from the directory, invalidate its
    /// advertised pre-keys, and erase all local key material. The session
    /// returns to the uninitialized state.
    pub async fn revoke_current_device(&self) -> Result<(), E2eeError> {
        let device = self.current_device()?;
        self.directory.revoke(device.identity.device_id).await?;
        self.secrets.wipe_device(device.identity.device_id)?;
        *self.write_current()? = None;
        info!(device_id = %device.identity.device_id, "device revoked");
        Ok(())
    }

    fn current_device(&self) -> Result<Arc<CurrentDevice>, E2eeError> {
        self.current
            .read()
            .map_err(|_| E2eeError::StorageError("session lock poisoned".into()))?
            .clone()
            .ok_or(E2eeError::NotInitialized)
    }

    fn write_current(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Option<Arc<CurrentDevice>>>, E2eeError> {
        self.current
            .write()
            .map_err(|_| E2eeError::StorageError("session lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::SqliteDirectory;
    use rusqlite::Connection;

    fn session() -> CryptoSession<SqliteDirectory> {
        CryptoSession::new(
            SqliteDirectory::open_in_memory().unwrap(),
            SecretStore::open_in_memory().unwrap(),
        )
    }

    fn ready_identity(status: E2eeStatus) -> DeviceIdentity {
        match status {
            E2eeStatus::Ready(identity) => identity,
            other => panic!("expected Ready, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn initialize_registers_a_new_device() {
        let session = session();
        let user = UserId::new();

        assert!(!session.is_initialized());
        let identity = ready_identity(session.initialize(user).await.unwrap());
        assert!(session.is_initialized());
        assert_eq!(identity.user_id, user);
        assert_eq!(session.current_identity().unwrap(), identity);
    }

    #[tokio::test]
    async fn initialize_publishes_initial_pre_keys() {
        let session = session();
        let user = UserId::new();
        let identity = ready_identity(session.initialize(user).await.unwrap());

        let available = session
            .directory
            .available_pre_key_count(identity.device_id)
            .await
            .unwrap();
        assert_eq!(available, convoy_shared::constants::PRE_KEY_BATCH_SIZE);
    }

    #[tokio::test]
    async fn second_initialize_reuses_cached_identity() {
        let session = session();
        let user = UserId::new();

        let first = ready_identity(session.initialize(user).await.unwrap());
        let second = ready_identity(session.initialize(user).await.unwrap());
        assert_eq!(first.device_id, second.device_id);

        // Still a single registered device.
        let devices = session.directory.list_devices(user).await.unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn initialize_for_a_different_user_registers_fresh() {
        let session = session();
        let first = ready_identity(session.initialize(UserId::new()).await.unwrap());
        let second = ready_identity(session.initialize(UserId::new()).await.unwrap());
        assert_ne!(first.device_id, second.device_id);
    }

    #[tokio::test]
    async fn remotely_revoked_device_re_registers() {
        let session = session();
        let user = UserId::new();

        let first = ready_identity(session.initialize(user).await.unwrap());
        // Revoked from another device.
        session.directory.revoke(first.device_id).await.unwrap();

        let second = ready_identity(session.initialize(user).await.unwrap());
        assert_ne!(first.device_id, second.device_id);
    }

    #[tokio::test]
    async fn corrupt_secret_store_recovers_by_re_registering() {
        let session = session();
        let user = UserId::new();
        session
            .secrets
            .lock_for_tests()
            .execute(
                "INSERT INTO e2ee_device_info
                     (id, device_id, user_id, device_name, fingerprint, public_key, last_active_at)
                 VALUES (1, 'broken', 'broken', 'n', 'f', 'k', 0)",
                [],
            )
            .unwrap();

        let identity = ready_identity(session.initialize(user).await.unwrap());
        assert_eq!(identity.user_id, user);
    }

    #[tokio::test]
    async fn unreachable_directory_reports_unavailable() {
        let directory = SqliteDirectory::from_connection(Connection::open_in_memory().unwrap());
        let session = CryptoSession::new(directory, SecretStore::open_in_memory().unwrap());

        match session.initialize(UserId::new()).await.unwrap() {
            E2eeStatus::Unavailable { name, fingerprint } => {
                assert!(!name.is_empty());
                assert!(!fingerprint.is_empty());
            }
            other => panic!("expected Unavailable, got: {other:?}"),
        }
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn operations_before_initialize_fail_cleanly() {
        let session = session();
        assert!(matches!(
            session.encrypt("hi", UserId::new()).await,
            Err(E2eeError::NotInitialized)
        ));
        assert!(matches!(
            session.decrypt("anything"),
            Err(E2eeError::NotInitialized)
        ));
        assert!(matches!(
            session.revoke_current_device().await,
            Err(E2eeError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn claim_pre_key_maps_exhaustion_to_error() {
        let session = session();
        let user = UserId::new();
        session.initialize(user).await.unwrap();

        // A user with no devices has no pre-keys to claim.
        let result = session.claim_pre_key(UserId::new(), None).await;
        assert!(matches!(result, Err(E2eeError::PreKeyExhausted)));
    }

    #[tokio::test]
    async fn revoke_clears_session_and_local_state() {
        let session = session();
        let user = UserId::new();
        let identity = ready_identity(session.initialize(user).await.unwrap());

        session.revoke_current_device().await.unwrap();
        assert!(!session.is_initialized());
        assert!(session
            .secrets
            .load_device_key(identity.device_id)
            .unwrap()
            .is_none());
        assert!(session.directory.list_devices(user).await.unwrap().is_empty());
        assert_eq!(
            session
                .directory
                .available_pre_key_count(identity.device_id)
                .await
                .unwrap(),
            0
        );
    }
}

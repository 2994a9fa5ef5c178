//! One-time pre-key pool management.
//!
//! Each device advertises a batch of single-use X25519 public keys through
//! the directory. The private halves stay in the local secret store; a
//! claimed key's private half is retrieved exactly once with
//! [`SecretStore::take_pre_key_secret`]. The pool is refilled whenever the
//! advertised count drops below the low-water mark.

use convoy_shared::constants::{PRE_KEY_BATCH_SIZE, PRE_KEY_LOW_WATER_MARK};
use convoy_shared::ids::{DeviceId, PreKeyId, UserId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::DeviceDirectory;
use crate::error::E2eeError;
use crate::identity::DeviceKeyPair;
use crate::storage::SecretStore;

/// A one-time pre-key as advertised through the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKey {
    pub key_id: PreKeyId,
    pub device_id: DeviceId,
    /// Base64 X25519 public half.
    pub public_key: String,
    pub consumed: bool,
}

/// Generate `count` pre-keys for this device and advertise them.
///
/// Private halves are persisted locally before the public halves are
/// published, so any key a peer can claim is one this device can use.
/// Returns the number of keys published.
pub async fn generate_batch(
    directory: &dyn DeviceDirectory,
    secrets: &SecretStore,
    user_id: UserId,
    device_id: DeviceId,
    count: u32,
) -> Result<u32, E2eeError> {
    let mut batch = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let pair = DeviceKeyPair::generate();
        let key_id = PreKeyId::new();
        secrets.put_pre_key_secret(key_id, device_id, pair.secret())?;
        batch.push(PreKey {
            key_id,
            device_id,
            public_key: pair.public_key_b64(),
            consumed: false,
        });
    }

    directory.publish_pre_keys(user_id, &batch).await?;
    debug!(%device_id, count, "published pre-key batch");
    Ok(count)
}

/// Refill the device's advertised pool if it has drained below
/// `PRE_KEY_LOW_WATER_MARK`. Returns the number of keys published, zero
/// when the pool was still healthy.
pub async fn replenish_if_low(
    directory: &dyn DeviceDirectory,
    secrets: &SecretStore,
    user_id: UserId,
    device_id: DeviceId,
) -> Result<u32, E2eeError> {
    let available = directory.available_pre_key_count(device_id).await?;
    if available >= PRE_KEY_LOW_WATER_MARK {
        return Ok(0);
    }

    debug!(%device_id, available, "pre-key pool below low-water mark, replenishing");
    generate_batch(directory, secrets, user_id, device_id, PRE_KEY_BATCH_SIZE).await
}

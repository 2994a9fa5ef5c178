//! Message encryption and decryption.
//!
//! Hybrid scheme: each message is encrypted once with a fresh AES-256-GCM
//! key, and that key is wrapped independently for every active device of
//! the recipient and the sender. A device whose key fails to wrap is
//! skipped (logged, surfaced in the outcome) without blocking the rest of
//! the fan-out; the envelope is only rejected when no device at all could
//! be addressed.

use std::collections::BTreeMap;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use chrono::Duration;
use convoy_shared::constants::{MAX_MESSAGE_SIZE_BYTES, PROTOCOL_VERSION};
use convoy_shared::ids::{DeviceId, UserId};
use rand::RngCore;
use tracing::warn;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::codec;
use crate::directory::{DeviceDirectory, DirectoryEntry};
use crate::envelope::{CipherAlgorithm, EncryptedEnvelope, MessagePayload};
use crate::error::E2eeError;
use crate::keywrap;

const NONCE_SIZE: usize = 12;

/// A device left out of an envelope's fan-out, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedDevice {
    pub device_id: DeviceId,
    pub reason: String,
}

/// Result of encrypting one message.
#[derive(Debug)]
pub struct EncryptOutcome {
    pub envelope: EncryptedEnvelope,
    /// Devices that could not be addressed. Empty on a clean fan-out.
    pub skipped: Vec<SkippedDevice>,
}

/// Encrypt `plaintext` for every active device of `recipient` and `sender`.
///
/// A fresh message key and nonce are drawn per call; no key material is
/// ever reused across messages. Errors: `MessageTooLarge` before any
/// crypto work, `NoActiveDevices` when the recipient has no fresh devices,
/// and `KeyWrapFailed` when devices were found but not one could be
/// addressed.
pub async fn encrypt_for_devices(
    directory: &dyn DeviceDirectory,
    plaintext: &str,
    recipient: UserId,
    sender: UserId,
    freshness_window: Duration,
) -> Result<EncryptOutcome, E2eeError> {
    if plaintext.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(E2eeError::MessageTooLarge {
            size: plaintext.len(),
            max: MAX_MESSAGE_SIZE_BYTES,
        });
    }

    let recipient_devices = directory
        .list_active_devices(recipient, freshness_window)
        .await?;
    if recipient_devices.is_empty() {
        return Err(E2eeError::NoActiveDevices);
    }

    // Sender's own devices are included so the author can read their own
    // message history everywhere. Dedupe in case sender == recipient.
    let mut targets: BTreeMap<DeviceId, DirectoryEntry> = BTreeMap::new();
    for entry in recipient_devices {
        targets.insert(entry.device_id, entry);
    }
    if sender != recipient {
        for entry in directory.list_active_devices(sender, freshness_window).await? {
            targets.insert(entry.device_id, entry);
        }
    }

    let mut message_key = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(message_key.as_mut());
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(message_key.as_ref())
        .map_err(|e| E2eeError::InvalidKey(format!("message key: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|e| E2eeError::InvalidKey(format!("message encryption failed: {e}")))?;

    let mut device_keys = BTreeMap::new();
    let mut skipped = Vec::new();
    for (device_id, entry) in &targets {
        let wrapped = codec::decode_public_key(&entry.public_key)
            .and_then(|public| keywrap::wrap_message_key(&public, &message_key));
        match wrapped {
            Ok(blob) => {
                device_keys.insert(*device_id, blob);
            }
            Err(err) => {
                warn!(%device_id, error = %err, "skipping device in encryption fan-out");
                skipped.push(SkippedDevice {
                    device_id: *device_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    if device_keys.is_empty() {
        // Unwrap safe: targets was non-empty, so every one landed in skipped.
        let first = &skipped[0];
        return Err(E2eeError::KeyWrapFailed {
            device_id: first.device_id,
            detail: first.reason.clone(),
        });
    }

    Ok(EncryptOutcome {
        envelope: EncryptedEnvelope {
            ciphertext: codec::encode_bytes(&ciphertext),
            iv: codec::encode_bytes(&nonce_bytes),
            device_keys,
            algorithm: CipherAlgorithm::AesGcm,
            version: PROTOCOL_VERSION,
        },
        skipped,
    })
}

/// Decrypt an envelope with this device's long-term private key.
pub fn decrypt(
    envelope: &EncryptedEnvelope,
    device_id: DeviceId,
    device_secret: &StaticSecret,
) -> Result<String, E2eeError> {
    if envelope.version != PROTOCOL_VERSION {
        return Err(E2eeError::UnsupportedVersion {
            version: envelope.version,
        });
    }
    if envelope.algorithm != CipherAlgorithm::AesGcm {
        return Err(E2eeError::DecryptionFailed(
            "unrecognized cipher algorithm".into(),
        ));
    }

    let wrapped = envelope
        .device_keys
        .get(&device_id)
        .ok_or(E2eeError::NotEncryptedForThisDevice)?;
    let message_key = keywrap::unwrap_message_key(device_secret, wrapped)?;

    let nonce_bytes = codec::decode_bytes(&envelope.iv)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(E2eeError::DecryptionFailed(format!(
            "iv has {} bytes, expected {NONCE_SIZE}",
            nonce_bytes.len()
        )));
    }
    let ciphertext = codec::decode_bytes(&envelope.ciphertext)?;

    let cipher = Aes256Gcm::new_from_slice(message_key.as_ref())
        .map_err(|e| E2eeError::DecryptionFailed(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| E2eeError::DecryptionFailed("ciphertext integrity check failed".into()))?;

    String::from_utf8(plaintext)
        .map_err(|e| E2eeError::DecryptionFailed(format!("plaintext is not utf-8: {e}")))
}

/// Decrypt classified message-store content. Legacy plaintext passes
/// through unchanged.
pub fn decrypt_payload(
    payload: &MessagePayload,
    device_id: DeviceId,
    device_secret: &StaticSecret,
) -> Result<String, E2eeError> {
    match payload {
        MessagePayload::Plaintext(text) => Ok(text.clone()),
        MessagePayload::Envelope(envelope) => decrypt(envelope, device_id, device_secret),
    }
}

//! Per-device wrapping of the one-time message key.
//!
//! The asymmetric transform is sized for small payloads only: an ephemeral
//! X25519 keypair performs ECDH against the device's static public key, the
//! shared secret is expanded with HKDF-SHA256 into a 32-byte wrap key, and
//! that key encrypts the message key under AES-256-GCM.
//!
//! Wire format of a wrapped key (base64 on the envelope):
//!   [ ephemeral public key (32) | nonce (12) | ciphertext + tag (48) ]

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::codec;
use crate::error::E2eeError;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const WRAPPED_LEN: usize = KEY_SIZE + NONCE_SIZE + KEY_SIZE + TAG_SIZE;

const HKDF_INFO: &[u8] = b"convoy-keywrap-v1";
const WRAP_AAD: &[u8] = b"convoy-keywrap";

/// Wrap a 32-byte message key for one device's public key.
///
/// Each call uses a fresh ephemeral keypair and nonce, so wrapping the same
/// key for the same device twice produces different blobs.
pub fn wrap_message_key(
    device_public: &PublicKey,
    message_key: &[u8; KEY_SIZE],
) -> Result<String, E2eeError> {
    let mut eph_bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut eph_bytes);
    let eph_secret = StaticSecret::from(eph_bytes);
    let eph_public = PublicKey::from(&eph_secret);

    let wrap_key = derive_wrap_key(&eph_secret, device_public, &eph_public, device_public)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(wrap_key.as_ref())
        .map_err(|e| E2eeError::InvalidKey(format!("wrap key: {e}")))?;
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: message_key,
                aad: WRAP_AAD,
            },
        )
        .map_err(|e| E2eeError::InvalidKey(format!("key wrap encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(WRAPPED_LEN);
    blob.extend_from_slice(eph_public.as_bytes());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(codec::encode_bytes(&blob))
}

/// Unwrap a message key with this device's private key.
///
/// Returns `DecryptionFailed` if the blob is malformed or the AEAD
/// integrity check fails (wrong device, tampered entry).
pub fn unwrap_message_key(
    device_secret: &StaticSecret,
    wrapped_b64: &str,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, E2eeError> {
    let blob = codec::decode_bytes(wrapped_b64)?;
    if blob.len() != WRAPPED_LEN {
        return Err(E2eeError::DecryptionFailed(format!(
            "wrapped key has {} bytes, expected {WRAPPED_LEN}",
            blob.len()
        )));
    }

    let (eph_bytes, rest) = blob.split_at(KEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut eph_arr = [0u8; KEY_SIZE];
    eph_arr.copy_from_slice(eph_bytes);
    let eph_public = PublicKey::from(eph_arr);
    let device_public = PublicKey::from(device_secret);

    let wrap_key = derive_wrap_key(device_secret, &eph_public, &eph_public, &device_public)
        .map_err(|e| E2eeError::DecryptionFailed(e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(wrap_key.as_ref())
        .map_err(|e| E2eeError::DecryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: WRAP_AAD,
            },
        )
        .map_err(|_| E2eeError::DecryptionFailed("key unwrap integrity check failed".into()))?;

    if plaintext.len() != KEY_SIZE {
        return Err(E2eeError::DecryptionFailed(format!(
            "unwrapped key has {} bytes, expected {KEY_SIZE}",
            plaintext.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

/// ECDH then HKDF-SHA256. The salt binds the ephemeral and device public
/// keys so a wrapped blob cannot be replayed against a different device.
/// Both sides compute the same salt regardless of which secret they hold.
fn derive_wrap_key(
    local_secret: &StaticSecret,
    remote_public: &PublicKey,
    eph_public: &PublicKey,
    device_public: &PublicKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, E2eeError> {
    let shared = local_secret.diffie_hellman(remote_public);
    if !shared.was_contributory() {
        return Err(E2eeError::InvalidKey("low-order public key".into()));
    }

    let mut salt = [0u8; KEY_SIZE * 2];
    salt[..KEY_SIZE].copy_from_slice(eph_public.as_bytes());
    salt[KEY_SIZE..].copy_from_slice(device_public.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(HKDF_INFO, okm.as_mut())
        .map_err(|e| E2eeError::InvalidKey(format!("hkdf expand: {e}")))?;
    Ok(okm)
}

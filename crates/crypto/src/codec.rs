//! Key and byte codecs — base64 transport encoding for key material.
//!
//! Pure and stateless. Public keys travel through the device directory and
//! envelope as base64 of the raw 32-byte X25519 representation; private
//! keys use the same encoding but only ever inside the local secret store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::E2eeError;

/// Length of raw X25519 key material in bytes.
pub const KEY_LEN: usize = 32;

/// Encode an X25519 public key for transport.
pub fn encode_public_key(key: &PublicKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Decode a base64-encoded X25519 public key.
///
/// Returns `E2eeError::InvalidKey` if the input is not base64 or does not
/// decode to exactly 32 bytes.
pub fn decode_public_key(encoded: &str) -> Result<PublicKey, E2eeError> {
    let bytes = decode_key_bytes(encoded)?;
    Ok(PublicKey::from(bytes))
}

/// Encode an X25519 private key for the local secret store.
pub fn encode_private_key(secret: &StaticSecret) -> String {
    STANDARD.encode(secret.to_bytes())
}

/// Decode a base64-encoded X25519 private key from the local secret store.
pub fn decode_private_key(encoded: &str) -> Result<StaticSecret, E2eeError> {
    let bytes = decode_key_bytes(encoded)?;
    Ok(StaticSecret::from(bytes))
}

/// Encode arbitrary bytes (ciphertext, IV, wrapped keys) for the envelope.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode envelope bytes. Malformed base64 is a decryption-path failure,
/// not an invalid-key failure.
pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>, E2eeError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| E2eeError::DecryptionFailed(format!("invalid base64: {e}")))
}

fn decode_key_bytes(encoded: &str) -> Result<[u8; KEY_LEN], E2eeError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| E2eeError::InvalidKey(format!("invalid base64: {e}")))?;
    if bytes.len() != KEY_LEN {
        return Err(E2eeError::InvalidKey(format!(
            "expected {KEY_LEN}-byte key, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn test_secret() -> StaticSecret {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        StaticSecret::from(bytes)
    }

    #[test]
    fn public_key_roundtrip() {
        let secret = test_secret();
        let public = PublicKey::from(&secret);

        let encoded = encode_public_key(&public);
        let decoded = decode_public_key(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), public.as_bytes());
    }

    #[test]
    fn private_key_roundtrip_preserves_shared_secret() {
        let secret = test_secret();
        let peer = PublicKey::from(&test_secret());

        let encoded = encode_private_key(&secret);
        let decoded = decode_private_key(&encoded).unwrap();

        assert_eq!(
            secret.diffie_hellman(&peer).as_bytes(),
            decoded.diffie_hellman(&peer).as_bytes()
        );
    }

    #[test]
    fn decode_public_key_rejects_non_base64() {
        let result = decode_public_key("not base64!!!");
        assert!(matches!(result, Err(E2eeError::InvalidKey(_))));
    }

    #[test]
    fn decode_public_key_rejects_wrong_length() {
        let encoded = encode_bytes(&[0u8; 16]);
        let result = decode_public_key(&encoded);
        assert!(matches!(result, Err(E2eeError::InvalidKey(_))));
    }

    #[test]
    fn decode_bytes_rejects_non_base64_as_decryption_failure() {
        let result = decode_bytes("%%%");
        assert!(matches!(result, Err(E2eeError::DecryptionFailed(_))));
    }

    #[test]
    fn encode_bytes_roundtrip() {
        let data = b"arbitrary ciphertext bytes \x00\xff";
        let encoded = encode_bytes(data);
        assert_eq!(decode_bytes(&encoded).unwrap(), data);
    }
}

//! Device identity key material.
//!
//! Every device owns one long-term X25519 keypair. The public half is
//! registered with the device directory; the private half never leaves the
//! local secret store. The `initialize` lifecycle that decides between
//! loading and re-registering lives in [`crate::session`].

use chrono::{DateTime, Utc};
use convoy_shared::ids::{DeviceId, UserId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::codec;
use crate::error::E2eeError;

/// An X25519 keypair for a device identity or a one-time pre-key.
pub struct DeviceKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl DeviceKeyPair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct a keypair from stored private key bytes.
    pub fn from_private_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Base64 transport encoding of the public half.
    pub fn public_key_b64(&self) -> String {
        codec::encode_public_key(&self.public)
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Consume the pair, yielding the private half for storage.
    pub fn into_secret(self) -> StaticSecret {
        self.secret
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &self.public_key_b64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// One registered device belonging to one user.
///
/// `device_id` is assigned by the device directory on registration and is
/// never invented client-side. This record is also cached locally so a
/// returning process can skip re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    pub user_id: UserId,
    /// Human-readable label derived from platform hints. Best-effort.
    pub name: String,
    /// Environment hash for human verification. Not key material.
    pub fingerprint: String,
    /// Base64-encoded X25519 public key.
    pub public_key: String,
    pub last_active_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Decode the identity's public key for key wrapping.
    pub fn decode_public_key(&self) -> Result<PublicKey, E2eeError> {
        codec::decode_public_key(&self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_unique_keypairs() {
        let a = DeviceKeyPair::generate();
        let b = DeviceKeyPair::generate();
        assert_ne!(a.public_key().as_bytes(), b.public_key().as_bytes());
    }

    #[test]
    fn from_private_bytes_restores_public_key() {
        let pair = DeviceKeyPair::generate();
        let restored = DeviceKeyPair::from_private_bytes(pair.secret().to_bytes());
        assert_eq!(pair.public_key().as_bytes(), restored.public_key().as_bytes());
    }

    #[test]
    fn public_key_b64_decodes_back() {
        let pair = DeviceKeyPair::generate();
        let decoded = codec::decode_public_key(&pair.public_key_b64()).unwrap();
        assert_eq!(decoded.as_bytes(), pair.public_key().as_bytes());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let pair = DeviceKeyPair::generate();
        let debug = format!("{pair:?}");
        assert!(debug.contains("[REDACTED]"));
        let secret_b64 = codec::encode_private_key(pair.secret());
        assert!(!debug.contains(&secret_b64));
    }

    #[test]
    fn device_identity_serde_roundtrip() {
        let pair = DeviceKeyPair::generate();
        let identity = DeviceIdentity {
            device_id: DeviceId::new(),
            user_id: UserId::new(),
            name: "Linux PC".into(),
            fingerprint: "abc123".into(),
            public_key: pair.public_key_b64(),
            last_active_at: Utc::now(),
        };

        let json = serde_json::to_string(&identity).unwrap();
        let back: DeviceIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, back);
    }

    #[test]
    fn device_identity_decode_public_key() {
        let pair = DeviceKeyPair::generate();
        let identity = DeviceIdentity {
            device_id: DeviceId::new(),
            user_id: UserId::new(),
            name: "Mac".into(),
            fingerprint: "fp".into(),
            public_key: pair.public_key_b64(),
            last_active_at: Utc::now(),
        };

        let decoded = identity.decode_public_key().unwrap();
        assert_eq!(decoded.as_bytes(), pair.public_key().as_bytes());
    }

    #[test]
    fn device_identity_rejects_malformed_public_key() {
        let identity = DeviceIdentity {
            device_id: DeviceId::new(),
            user_id: UserId::new(),
            name: "Mac".into(),
            fingerprint: "fp".into(),
            public_key: "garbage".into(),
            last_active_at: Utc::now(),
        };

        assert!(matches!(
            identity.decode_public_key(),
            Err(E2eeError::InvalidKey(_))
        ));
    }
}

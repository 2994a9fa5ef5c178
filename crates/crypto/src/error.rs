//! Error types for the convoy-crypto crate.

use convoy_shared::ids::DeviceId;
use thiserror::Error;

/// Errors that can occur in the end-to-end encryption core.
#[derive(Debug, Error)]
pub enum E2eeError {
    /// No device identity has been established yet — call `initialize` first.
    #[error("device identity not initialized")]
    NotInitialized,

    /// The recipient has no active devices; the message cannot be sent encrypted.
    #[error("recipient has no active devices")]
    NoActiveDevices,

    /// The plaintext exceeds the per-message size limit.
    #[error("message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Wrapping the message key for a specific device failed. Non-fatal for
    /// the envelope as a whole unless every wrap fails.
    #[error("key wrap failed for device {device_id}: {detail}")]
    KeyWrapFailed { device_id: DeviceId, detail: String },

    /// The envelope carries no wrapped key for this device. Benign: the
    /// device was registered after the message was sent.
    #[error("message not encrypted for this device")]
    NotEncryptedForThisDevice,

    /// Authenticated decryption failed — tampered ciphertext, wrong key, or
    /// corrupted envelope. Distinct from the benign missing-entry case.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The envelope was produced by an incompatible protocol version or an
    /// unrecognized cipher.
    #[error("unsupported envelope version: {version}")]
    UnsupportedVersion { version: u32 },

    /// The remote device directory schema or service is absent. Callers may
    /// fall back to unencrypted operation, but must decide that explicitly.
    #[error("device directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// All one-time pre-keys for the target have been consumed.
    #[error("pre-keys exhausted")]
    PreKeyExhausted,

    /// The provided key material is invalid (wrong length, malformed, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The local secret store holds an entry for this device but its
    /// contents are unreadable — triggers re-registration.
    #[error("secret store entry corrupt: {0}")]
    SecretStoreCorrupt(String),

    /// Database storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<rusqlite::Error> for E2eeError {
    fn from(err: rusqlite::Error) -> Self {
        E2eeError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for E2eeError {
    fn from(err: serde_json::Error) -> Self {
        E2eeError::SerializationError(err.to_string())
    }
}

impl From<E2eeError> for convoy_shared::error::ConvoyError {
    fn from(err: E2eeError) -> Self {
        match err {
            E2eeError::DirectoryUnavailable(detail) => {
                convoy_shared::error::ConvoyError::ServiceUnavailable(detail)
            }
            other => convoy_shared::error::ConvoyError::Crypto(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        let err = E2eeError::InvalidKey("bad key data".into());
        assert!(err.to_string().contains("bad key data"));

        let device_id = DeviceId::new();
        let err = E2eeError::KeyWrapFailed {
            device_id,
            detail: "malformed public key".into(),
        };
        assert!(err.to_string().contains(&device_id.to_string()));

        let err = E2eeError::UnsupportedVersion { version: 9 };
        assert!(err.to_string().contains('9'));

        assert!(!E2eeError::NotInitialized.to_string().is_empty());
        assert!(!E2eeError::PreKeyExhausted.to_string().is_empty());
        assert!(!E2eeError::NotEncryptedForThisDevice.to_string().is_empty());
    }

    #[test]
    fn from_rusqlite_error_converts_to_storage_error() {
        let rusqlite_err = rusqlite::Error::QueryReturnedNoRows;
        let err: E2eeError = rusqlite_err.into();
        match err {
            E2eeError::StorageError(_) => {}
            other => panic!("expected StorageError, got: {other:?}"),
        }
    }

    #[test]
    fn from_serde_json_error_converts_to_serialization_error() {
        let json_err: serde_json::Error = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: E2eeError = json_err.into();
        match err {
            E2eeError::SerializationError(_) => {}
            other => panic!("expected SerializationError, got: {other:?}"),
        }
    }

    #[test]
    fn directory_unavailable_maps_to_service_unavailable() {
        let err = E2eeError::DirectoryUnavailable("no such table: user_devices".into());
        let shared: convoy_shared::error::ConvoyError = err.into();
        match shared {
            convoy_shared::error::ConvoyError::ServiceUnavailable(_) => {}
            other => panic!("expected ServiceUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn other_variants_map_to_crypto() {
        let err = E2eeError::DecryptionFailed("tag mismatch".into());
        let shared: convoy_shared::error::ConvoyError = err.into();
        match shared {
            convoy_shared::error::ConvoyError::Crypto(_) => {}
            other => panic!("expected Crypto variant, got: {other:?}"),
        }
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(E2eeError::NotInitialized),
            Box::new(E2eeError::NoActiveDevices),
            Box::new(E2eeError::MessageTooLarge { size: 9000, max: 8192 }),
            Box::new(E2eeError::KeyWrapFailed {
                device_id: DeviceId::new(),
                detail: "d".into(),
            }),
            Box::new(E2eeError::NotEncryptedForThisDevice),
            Box::new(E2eeError::DecryptionFailed("d".into())),
            Box::new(E2eeError::UnsupportedVersion { version: 2 }),
            Box::new(E2eeError::DirectoryUnavailable("d".into())),
            Box::new(E2eeError::PreKeyExhausted),
            Box::new(E2eeError::InvalidKey("k".into())),
            Box::new(E2eeError::SecretStoreCorrupt("c".into())),
            Box::new(E2eeError::StorageError("s".into())),
            Box::new(E2eeError::SerializationError("s".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}

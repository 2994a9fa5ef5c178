//! The encrypted envelope wire shape and the message-store boundary.
//!
//! The external message store hands back either the JSON serialization of
//! an [`EncryptedEnvelope`] or a legacy plaintext string from before E2EE
//! was enabled. That decision is made exactly once, at deserialization,
//! by [`MessagePayload::from_wire`] — business logic only ever sees the
//! resulting sum type.

use std::collections::BTreeMap;

use convoy_shared::constants::PROTOCOL_VERSION;
use convoy_shared::ids::DeviceId;
use serde::{Deserialize, Serialize};

use crate::error::E2eeError;

/// Symmetric cipher tag carried in every envelope. Fixed to AES-256-GCM in
/// protocol version 1; unrecognized tags deserialize to `Unknown` and are
/// rejected at decrypt time rather than misparsed as legacy plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "aes-gcm")]
    AesGcm,
    #[serde(other)]
    Unknown,
}

/// One encrypted message, addressed to every device that was active at
/// encryption time.
///
/// Invariant: `device_keys` is never empty — an envelope no device can read
/// must not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 AES-256-GCM output over the plaintext.
    pub ciphertext: String,
    /// Base64 96-bit nonce, unique per envelope.
    pub iv: String,
    /// Per-device independently wrapped copies of the message key.
    pub device_keys: BTreeMap<DeviceId, String>,
    pub algorithm: CipherAlgorithm,
    pub version: u32,
}

impl EncryptedEnvelope {
    /// Serialize for the external message store.
    pub fn to_wire(&self) -> Result<String, E2eeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Content as handed back by the external message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// A structured envelope produced by this protocol.
    Envelope(EncryptedEnvelope),
    /// Pre-E2EE content, passed through unchanged.
    Plaintext(String),
}

impl MessagePayload {
    /// Classify raw message-store content.
    ///
    /// Anything that does not parse as a complete envelope — non-JSON, JSON
    /// of a different shape, or an envelope with an empty `device_keys`
    /// map — is treated as legacy plaintext, mirroring the migration
    /// behavior of the pre-E2EE message rows.
    pub fn from_wire(raw: &str) -> Self {
        match serde_json::from_str::<EncryptedEnvelope>(raw) {
            Ok(envelope) if !envelope.device_keys.is_empty() => {
                MessagePayload::Envelope(envelope)
            }
            _ => MessagePayload::Plaintext(raw.to_string()),
        }
    }
}

/// Current protocol version stamped on new envelopes.
pub fn current_version() -> u32 {
    PROTOCOL_VERSION
}

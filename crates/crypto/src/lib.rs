//! convoy-crypto — multi-device end-to-end encryption for Convoy.
//!
//! Each device holds its own X25519 identity keypair; message bodies are
//! encrypted once with a fresh AES-256-GCM key which is then wrapped
//! separately for every active device of the recipient and the sender.
//! One-time pre-keys cover asynchronous session bootstrap. Private key
//! material lives only in the device-local SQLite secret store; the shared
//! device directory holds public halves exclusively.

pub mod codec;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod keywrap;
pub mod message;
pub mod prekeys;
pub mod session;
pub mod storage;

//! Local persistence for device secrets.
//!
//! Everything here stays on the device: the long-term private key, the
//! cached device identity record, and the private halves of published
//! pre-keys. Nothing in this module talks to the device directory.

mod migrations;
mod secret_store;

pub use secret_store::SecretStore;

//! Device fingerprint and name derivation.
//!
//! The fingerprint is a stable hash over environment characteristics, shown
//! to users when verifying a device list out of band. It is never used as
//! cryptographic key material.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Length of the truncated, base64-encoded fingerprint.
const FINGERPRINT_LEN: usize = 32;

/// Derive a stable fingerprint for this device's environment.
///
/// Components: hostname, OS, CPU architecture, and available parallelism.
/// The same machine yields the same fingerprint across restarts.
pub fn device_fingerprint() -> String {
    let hostname = gethostname::gethostname();
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get().to_string())
        .unwrap_or_default();

    let components = [
        hostname.to_string_lossy().as_ref(),
        std::env::consts::OS,
        std::env::consts::ARCH,
        parallelism.as_str(),
    ]
    .join("|");

    let hash = Sha256::digest(components.as_bytes());
    let mut encoded = STANDARD.encode(hash);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Best-effort human-readable device label from platform hints.
pub fn device_name() -> String {
    match std::env::consts::OS {
        "macos" => "Mac".to_string(),
        "ios" => "iPhone".to_string(),
        "android" => "Android Device".to_string(),
        "windows" => "Windows PC".to_string(),
        "linux" => "Linux PC".to_string(),
        _ => {
            let hostname = gethostname::gethostname();
            let name = hostname.to_string_lossy();
            if name.is_empty() {
                "Unknown Device".to_string()
            } else {
                name.into_owned()
            }
        }
    }
}

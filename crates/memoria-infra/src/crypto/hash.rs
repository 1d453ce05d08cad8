//! SHA-256 fingerprints for stored credentials.
//!
//! The fingerprint lets operators tell credentials apart in listings
//! without the credential itself ever leaving the vault.

use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

/// Short, display-only fingerprint of a credential.
pub fn credential_fingerprint(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"memoria-credential:");
    hasher.update(credential.as_bytes());
    format!("{:x}", hasher.finalize())[..FINGERPRINT_LEN].to_string()
}

//! AES-256-GCM encryption for embedder credentials at rest.
//!
//! VaultCrypto provides symmetric encryption using AES-256-GCM with random nonces.
//! The master key can come from:
//! - A raw 32-byte key
//! - A password (Argon2id key derivation), via `MEMORIA_VAULT_PASSWORD`
//! - A hex key file in the data directory (auto-generated on first use)
//!
//! Encrypted format: `nonce (12 bytes) || ciphertext`
//!
//! SECURITY: Error types never contain plaintext or key material.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Environment variable holding the vault password.
pub const VAULT_PASSWORD_ENV: &str = "MEMORIA_VAULT_PASSWORD";

/// Key file name inside the data directory.
pub const KEY_FILE_NAME: &str = "vault.key";

/// Errors from vault encryption operations.
///
/// IMPORTANT: These errors never include plaintext, key material, or ciphertext
/// in their Display/Debug output to prevent accidental logging of secrets.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("key file error: {0}")]
    KeyFile(String),
}

/// AES-256-GCM encryption for credentials at rest.
///
/// Each encryption call generates a random 12-byte nonce, prepended to the ciphertext.
/// This means encrypting the same plaintext twice produces different output.
#[derive(Clone)]
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    /// Create a new VaultCrypto from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derive a 32-byte encryption key from a password using Argon2id.
    ///
    /// Uses OWASP recommended parameters:
    /// - 19 MiB memory (19456 KiB)
    /// - 2 iterations
    /// - 1 parallelism degree
    ///
    /// The salt is fixed so the same password always yields the same key;
    /// the password is the entropy source and nothing derived is stored.
    pub fn from_password(password: &str) -> Result<Self, VaultError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(19456, 2, 1, Some(32))
            .map_err(|_| VaultError::KeyDerivationFailed)?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = b"memoria-vault-v1";
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|_| VaultError::KeyDerivationFailed)?;

        Ok(Self::new(&key))
    }

    /// Load the master key from a hex key file, generating one if absent.
    ///
    /// New key files are written with owner-only permissions on Unix.
    pub fn from_key_file(path: &Path) -> Result<Self, VaultError> {
        match std::fs::read_to_string(path) {
            Ok(hex_key) => {
                let key_bytes = hex_decode(hex_key.trim())
                    .map_err(|_| VaultError::KeyFile("corrupted key file".to_string()))?;
                if key_bytes.len() != 32 {
                    return Err(VaultError::KeyFile("invalid key length".to_string()));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&key_bytes);
                Ok(Self::new(&key))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key: [u8; 32] = rand_bytes();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| VaultError::KeyFile(e.to_string()))?;
                }
                std::fs::write(path, hex_encode(&key))
                    .map_err(|e| VaultError::KeyFile(e.to_string()))?;
                restrict_permissions(path)?;
                tracing::info!(path = %path.display(), "generated new vault key");
                Ok(Self::new(&key))
            }
            Err(e) => Err(VaultError::KeyFile(e.to_string())),
        }
    }

    /// Resolve the vault for a data directory: the password from
    /// `MEMORIA_VAULT_PASSWORD` when set, else `{data_dir}/vault.key`.
    pub fn for_data_dir(data_dir: &Path) -> Result<Self, VaultError> {
        match std::env::var(VAULT_PASSWORD_ENV) {
            Ok(password) if !password.is_empty() => Self::from_password(&password),
            _ => Self::from_key_file(&data_dir.join(KEY_FILE_NAME)),
        }
    }

    /// Encrypt plaintext using AES-256-GCM with a random nonce.
    ///
    /// Returns `nonce (12 bytes) || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by `encrypt()`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }

    /// Decrypt into a UTF-8 string.
    pub fn decrypt_string(&self, data: &[u8]) -> Result<String, VaultError> {
        String::from_utf8(self.decrypt(data)?).map_err(|_| VaultError::DecryptionFailed)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), VaultError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| VaultError::KeyFile(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), VaultError> {
    Ok(())
}

/// Generate 32 random bytes using the OS CSPRNG.
fn rand_bytes() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .ok_or_else(|| format!("invalid hex at position {i}"))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("invalid hex at position {i}: {e}"))
                })
        })
        .collect()
}

//! Cryptographic operations for Memoria.
//!
//! - `hash`: SHA-256 fingerprints of embedder credentials
//! - `vault`: AES-256-GCM encryption for credentials at rest

pub mod hash;
pub mod vault;

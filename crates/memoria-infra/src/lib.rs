//! Infrastructure layer for Memoria.
//!
//! Contains implementations of the ports defined in `memoria-core`: SQLite
//! repositories, HTTP embedding providers, content fetchers, the credential
//! vault and the TOML config loader.

pub mod config;
pub mod crypto;
pub mod fetch;
pub mod provider;
pub mod sqlite;

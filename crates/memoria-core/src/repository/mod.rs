//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (memoria-infra) implements. The core crate never depends on any
//! specific storage technology.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

pub mod embedder;
pub mod memory;
pub mod space;

//! Shared domain types for Memoria.
//!
//! This crate contains the domain types of the ingestion pipeline:
//! Embedder, Space, Memory, MemoryChunk, their statuses, the pipeline
//! configuration and the error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod attributes;
pub mod config;
pub mod embedder;
pub mod error;
pub mod memory;
pub mod space;

//! Pipeline logic and repository trait definitions for Memoria.
//!
//! This crate defines the "ports" (repository, content fetcher and
//! embedding backend traits) that the infrastructure layer implements, plus
//! the pure pipeline logic: chunking, embedder resolution, retry policy,
//! per-embedder limiting, status aggregation, the vector writer and the
//! coordinator. It depends only on `memoria-types` -- never on
//! `memoria-infra` or any database/IO crate.

pub mod chunker;
pub mod coordinator;
pub mod embedding;
pub mod fetch;
pub mod limiter;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod status;
pub mod writer;

#[cfg(test)]
mod test_support;

//! # lib_netify
//!
//! Ingestion core for Netify deep-packet-inspection telemetry pushed by
//! router agents. The crate is split by folder:
//!
//! - **`configs`**: the `IngestConfig` value object and its JSON5 loader.
//! - **`loggers`**: `tracing` subscriber setup with file output and rotation.
//! - **`connections`**: PostgreSQL pool creation and schema bootstrap.
//! - **`store`**: repository traits plus in-memory and Postgres backends.
//! - **`ingest`**: framing, decoding, identity/device resolution, admission,
//!   persistence and the TCP acceptor.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Ingestion configuration and file loading.
pub mod configs;
/// Database connection pooling and schema management.
#[cfg(feature = "connections")]
pub mod connections;
/// The line-oriented ingestion pipeline.
pub mod ingest;
/// Structured logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// Repository traits and storage backends.
pub mod store;

pub use configs::config_ingest::{HandshakePolicy, IngestConfig, OverflowPolicy, PolicyConfig};
pub use ingest::{IngestCounters, Ingestor, LineOutcome};
pub use store::{MemoryStore, Repositories};

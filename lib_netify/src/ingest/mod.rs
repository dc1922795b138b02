//! # Ingest Module
//!
//! The line-oriented ingestion pipeline, leaf first:
//!
//! - **`framer`**: newline framing with a bounded buffer.
//! - **`decoder`**: handshake vs. JSON data classification.
//! - **`identity`**: zone identifier priority chain.
//! - **`zones`** / **`devices`**: lookup and race-tolerant auto-provisioning.
//! - **`admission`**: unknown zone/device gate.
//! - **`normalizer`** / **`stats`**: row mapping and persistence.
//! - **`pipeline`**: per-line dispatch; **`listener`**: TCP acceptor.

pub mod admission;
pub mod counters;
pub mod decoder;
pub mod devices;
pub mod framer;
pub mod identity;
pub mod listener;
pub mod normalizer;
pub mod pipeline;
pub mod stats;
mod telemetry;
pub mod zones;

pub use counters::{CounterSnapshot, IngestCounters};
pub use listener::{CloseReason, ConnectionSummary, FlowListener, ListenerError, serve_connection};
pub use pipeline::{Ingestor, LineOutcome, Session};

//! # Configs Module
//!
//! Runtime configuration for the ingest daemon. The configuration is an
//! explicit value object: it is loaded once, validated, and then handed to
//! each component at construction time.

/// The `IngestConfig` value object, its defaults and its JSON5 loader.
pub mod config_ingest;

pub use config_ingest::*;

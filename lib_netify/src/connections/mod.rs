//! # Connections Module
//!
//! This module handles persistent connections to the PostgreSQL database
//! that backs the flow, zone and device tables.

/// Module for PostgreSQL connection pooling and schema bootstrap.
pub mod db_postgres;

pub use db_postgres::{DbError, create_pool, ensure_schema};

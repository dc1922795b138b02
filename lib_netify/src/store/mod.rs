//! # Store Module
//!
//! The ingestion core talks to storage only through the traits declared
//! here. Backends:
//!
//! - **`memory`**: process-local tables, used by tests and dry runs.
//! - **`postgres`**: `deadpool-postgres` backed tables (feature `connections`).
//!
//! Every backend must reject a second zone with the same identifier and a
//! second device with the same MAC by returning [`RepoError::Duplicate`];
//! the provisioning code relies on that to recover from creation races.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// In-process repositories.
pub mod memory;
/// Row shapes.
pub mod models;
/// PostgreSQL repositories.
#[cfg(feature = "connections")]
pub mod postgres;

pub use memory::MemoryStore;
pub use models::*;

/// Errors returned by repository calls.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A uniqueness constraint rejected the write.
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The row to update does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Any other storage failure (connection, pool, SQL).
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Lookup and creation of router zones.
#[async_trait]
pub trait ZoneRepository: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Zone>, RepoError>;
    /// Inserts a zone and returns its id.
    async fn create(&self, zone: NewZone) -> Result<i64, RepoError>;
}

/// Lookup, creation and zone backfill of devices.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Device>, RepoError>;
    /// Inserts a device and returns its id.
    async fn create(&self, device: NewDevice) -> Result<i64, RepoError>;
    /// Sets the zone of a device only if it has none. Returns whether a row changed.
    async fn assign_zone_if_unset(&self, device_id: i64, zone_id: i64) -> Result<bool, RepoError>;
}

/// Writes of flow records and their optional children.
#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn create_flow(&self, flow: &NewFlowRecord) -> Result<i64, RepoError>;
    async fn create_ssl_info(&self, info: &SslInfo) -> Result<i64, RepoError>;
    async fn create_http_info(&self, info: &HttpInfo) -> Result<i64, RepoError>;
}

/// Writes of raw stats lines.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn create_stats(&self, record: &StatsRecord) -> Result<i64, RepoError>;
}

/// # Repositories
///
/// The shared storage handles every connection task works against.
#[derive(Clone)]
pub struct Repositories {
    pub zones: Arc<dyn ZoneRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub flows: Arc<dyn FlowRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Repositories {
    /// Uses one backend for all four repositories.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ZoneRepository + DeviceRepository + FlowRepository + StatsRepository + 'static,
    {
        Self {
            zones: backend.clone(),
            devices: backend.clone(),
            flows: backend.clone(),
            stats: backend,
        }
    }
}

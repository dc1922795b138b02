use std::sync::Arc;

use anyhow::{Context, Result};
use lib_netify::configs::DatabaseConfig;
use lib_netify::connections::db_postgres::{create_pool, ensure_schema};
use lib_netify::store::postgres::PgStore;
use lib_netify::store::{MemoryStore, Repositories};
use tracing::{info, warn};

use super::config::StorageKind;

/// Rows kept per flow, child and stats table in memory mode.
pub const MEMORY_RETENTION_ROWS: usize = 50_000;

/// Builds the repositories for the selected backend. For Postgres the pool is
/// created and the schema bootstrapped before anything is accepted.
pub async fn build_repositories(kind: StorageKind, database: &DatabaseConfig) -> Result<Repositories> {
    match kind {
        StorageKind::Memory => {
            warn!(
                retention = MEMORY_RETENTION_ROWS,
                "Using in-memory storage; only the newest rows are kept and everything is lost on exit"
            );
            Ok(Repositories::from_backend(Arc::new(MemoryStore::with_retention(
                MEMORY_RETENTION_ROWS,
            ))))
        }
        StorageKind::Postgres => {
            let pool = create_pool(database).context("Failed to create database pool")?;
            ensure_schema(&pool)
                .await
                .context("Failed to bootstrap database schema")?;
            info!("PostgreSQL storage ready");
            Ok(Repositories::from_backend(Arc::new(PgStore::new(pool))))
        }
    }
}

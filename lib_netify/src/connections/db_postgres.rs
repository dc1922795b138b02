//! # PostgreSQL Connection Manager
//!
//! Provides a managed connection pool for PostgreSQL using `deadpool-postgres`
//! and creates the ingestion tables when they are missing.

use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::configs::DatabaseConfig;

/// Custom error types for database setup.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database URL is not configured")]
    MissingUrl,
    #[error("Failed to create database pool: {0}")]
    PoolCreation(String),
    #[error("Failed to get connection from pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("Query execution failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

/// Tables written by the ingestion core. Identifier and MAC uniqueness are
/// enforced here; the provisioning code depends on those constraints.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS router_zones (
    id                BIGSERIAL PRIMARY KEY,
    zone_name         TEXT NOT NULL,
    router_identifier TEXT NOT NULL UNIQUE,
    router_name       TEXT,
    description       TEXT,
    is_active         BOOLEAN NOT NULL DEFAULT TRUE,
    created_by        BIGINT,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS devices (
    id                BIGSERIAL PRIMARY KEY,
    device_name       TEXT NOT NULL,
    device_identifier TEXT NOT NULL,
    mac_address       TEXT NOT NULL UNIQUE,
    device_type       TEXT NOT NULL DEFAULT 'Unknown',
    description       TEXT,
    router_zone_id    BIGINT REFERENCES router_zones(id) ON DELETE SET NULL,
    is_active         BOOLEAN NOT NULL DEFAULT TRUE,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS network_flows (
    id                        BIGSERIAL PRIMARY KEY,
    router_zone_id            BIGINT REFERENCES router_zones(id) ON DELETE SET NULL,
    device_id                 BIGINT REFERENCES devices(id) ON DELETE SET NULL,
    recv_ts                   TIMESTAMPTZ NOT NULL,
    recv_unix_ms              BIGINT NOT NULL,
    first_seen_at             BIGINT,
    first_update_at           BIGINT,
    last_seen_at              BIGINT,
    ct_id                     BIGINT,
    ct_mark                   BIGINT,
    established               BOOLEAN,
    ip_version                BIGINT,
    ip_protocol               BIGINT,
    ip_nat                    BOOLEAN,
    local_ip                  TEXT,
    local_port                BIGINT,
    local_mac                 TEXT,
    local_origin              BOOLEAN,
    other_ip                  TEXT,
    other_port                BIGINT,
    other_mac                 TEXT,
    other_type                TEXT,
    detected_protocol         BIGINT,
    detected_protocol_name    TEXT,
    detected_application      BIGINT,
    detected_application_name TEXT,
    detection_guessed         BOOLEAN,
    dhc_hit                   BOOLEAN,
    vlan_id                   BIGINT,
    interface_name            TEXT,
    host_server_name          TEXT,
    digest                    TEXT,
    bytes_len                 BIGINT NOT NULL,
    json_valid                BOOLEAN NOT NULL,
    json_error                TEXT,
    raw_json                  BYTEA NOT NULL
);
CREATE INDEX IF NOT EXISTS network_flows_recv_ts_idx ON network_flows (recv_ts);

CREATE TABLE IF NOT EXISTS ssl_info (
    id           BIGSERIAL PRIMARY KEY,
    flow_id      BIGINT NOT NULL REFERENCES network_flows(id) ON DELETE CASCADE,
    cipher_suite TEXT,
    client_ja3   TEXT,
    client_sni   TEXT,
    server_cn    TEXT,
    server_ja3   TEXT,
    version      TEXT
);

CREATE TABLE IF NOT EXISTS http_info (
    id           BIGSERIAL PRIMARY KEY,
    flow_id      BIGINT NOT NULL REFERENCES network_flows(id) ON DELETE CASCADE,
    url          TEXT,
    method       TEXT,
    user_agent   TEXT,
    referer      TEXT,
    content_type TEXT,
    status_code  BIGINT
);

CREATE TABLE IF NOT EXISTS netify_stats_raw (
    id    BIGSERIAL PRIMARY KEY,
    ts_ms BIGINT NOT NULL,
    scope TEXT NOT NULL,
    json  TEXT NOT NULL
);
"#;

/// Creates a connection pool for the configured database URL.
///
/// # Arguments
/// * `config` - The `database` section of the ingest configuration.
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, DbError> {
    let url = config.url.clone().ok_or(DbError::MissingUrl)?;

    let mut pg_pool_config = DeadpoolConfig::new();
    pg_pool_config.url = Some(url);
    pg_pool_config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pg_pool_config.pool = Some(PoolConfig::new(config.max_connections.max(1)));

    let pool = pg_pool_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| DbError::PoolCreation(e.to_string()))?;
    info!(max_connections = config.max_connections, "Database connection pool created");
    Ok(pool)
}

/// Creates the ingestion tables if they do not exist yet.
pub async fn ensure_schema(pool: &Pool) -> Result<(), DbError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA_SQL).await?;
    debug!("Schema bootstrap complete");
    Ok(())
}

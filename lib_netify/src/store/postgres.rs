//! # PostgreSQL Store
//!
//! Repository implementations on top of a `deadpool-postgres` pool. Every
//! call checks a client out of the pool, runs one parameterised statement
//! and hands the client back.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use tokio_postgres::error::SqlState;

use super::{
    Device, DeviceRepository, FlowRepository, HttpInfo, NewDevice, NewFlowRecord, NewZone,
    RepoError, SslInfo, StatsRecord, StatsRepository, Zone, ZoneRepository,
};

/// Repositories backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<Object, RepoError> {
        self.pool
            .get()
            .await
            .map_err(|e| RepoError::Storage(e.to_string()))
    }
}

/// Maps a unique violation to `Duplicate`, anything else to `Storage`.
fn map_write_error(entity: &'static str, key: &str, e: tokio_postgres::Error) -> RepoError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        RepoError::Duplicate {
            entity,
            key: key.to_string(),
        }
    } else {
        RepoError::Storage(e.to_string())
    }
}

fn storage(e: tokio_postgres::Error) -> RepoError {
    RepoError::Storage(e.to_string())
}

fn zone_from_row(row: &Row) -> Zone {
    Zone {
        id: row.get("id"),
        identifier: row.get("router_identifier"),
        zone_name: row.get("zone_name"),
        router_name: row.get("router_name"),
        description: row.get("description"),
        is_active: row.get("is_active"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn device_from_row(row: &Row) -> Device {
    Device {
        id: row.get("id"),
        mac_address: row.get("mac_address"),
        device_name: row.get("device_name"),
        device_type: row.get("device_type"),
        description: row.get("description"),
        zone_id: row.get("router_zone_id"),
        is_active: row.get("is_active"),
    }
}

#[async_trait]
impl ZoneRepository for PgStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Zone>, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, router_identifier, zone_name, router_name, description, is_active,
                        created_by, created_at, updated_at
                   FROM router_zones WHERE router_identifier = $1",
                &[&identifier],
            )
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(zone_from_row))
    }

    async fn create(&self, zone: NewZone) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO router_zones
                    (zone_name, router_identifier, router_name, description, is_active, created_by)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &zone.zone_name,
                    &zone.identifier,
                    &zone.router_name,
                    &zone.description,
                    &zone.is_active,
                    &zone.created_by,
                ],
            )
            .await
            .map_err(|e| map_write_error("zone", &zone.identifier, e))?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl DeviceRepository for PgStore {
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Device>, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, mac_address, device_name, device_type, description, router_zone_id, is_active
                   FROM devices WHERE mac_address = $1",
                &[&mac],
            )
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(device_from_row))
    }

    async fn create(&self, device: NewDevice) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO devices
                    (device_name, device_identifier, mac_address, device_type, description,
                     router_zone_id, is_active)
                 VALUES ($1, $2, $2, $3, $4, $5, $6)
                 RETURNING id",
                &[
                    &device.device_name,
                    &device.mac_address,
                    &device.device_type,
                    &device.description,
                    &device.zone_id,
                    &device.is_active,
                ],
            )
            .await
            .map_err(|e| map_write_error("device", &device.mac_address, e))?;
        Ok(row.get(0))
    }

    async fn assign_zone_if_unset(&self, device_id: i64, zone_id: i64) -> Result<bool, RepoError> {
        let client = self.client().await?;
        let changed = client
            .execute(
                "UPDATE devices SET router_zone_id = $1, updated_at = now()
                  WHERE id = $2 AND router_zone_id IS NULL",
                &[&zone_id, &device_id],
            )
            .await
            .map_err(storage)?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl FlowRepository for PgStore {
    async fn create_flow(&self, flow: &NewFlowRecord) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO network_flows (
                    router_zone_id, device_id, recv_ts, recv_unix_ms,
                    first_seen_at, first_update_at, last_seen_at, ct_id, ct_mark, established,
                    ip_version, ip_protocol, ip_nat,
                    local_ip, local_port, local_mac, local_origin,
                    other_ip, other_port, other_mac, other_type,
                    detected_protocol, detected_protocol_name,
                    detected_application, detected_application_name,
                    detection_guessed, dhc_hit, vlan_id, interface_name, host_server_name, digest,
                    bytes_len, json_valid, json_error, raw_json
                 ) VALUES (
                    $1, $2, $3, $4,
                    $5, $6, $7, $8, $9, $10,
                    $11, $12, $13,
                    $14, $15, $16, $17,
                    $18, $19, $20, $21,
                    $22, $23,
                    $24, $25,
                    $26, $27, $28, $29, $30, $31,
                    $32, $33, $34, $35
                 ) RETURNING id",
                &[
                    &flow.zone_id,
                    &flow.device_id,
                    &flow.recv_ts,
                    &flow.recv_unix_ms,
                    &flow.first_seen_at,
                    &flow.first_update_at,
                    &flow.last_seen_at,
                    &flow.ct_id,
                    &flow.ct_mark,
                    &flow.established,
                    &flow.ip_version,
                    &flow.ip_protocol,
                    &flow.ip_nat,
                    &flow.local_ip,
                    &flow.local_port,
                    &flow.local_mac,
                    &flow.local_origin,
                    &flow.other_ip,
                    &flow.other_port,
                    &flow.other_mac,
                    &flow.other_type,
                    &flow.detected_protocol,
                    &flow.detected_protocol_name,
                    &flow.detected_application,
                    &flow.detected_application_name,
                    &flow.detection_guessed,
                    &flow.dhc_hit,
                    &flow.vlan_id,
                    &flow.interface_name,
                    &flow.host_server_name,
                    &flow.digest,
                    &flow.bytes_len,
                    &flow.json_valid,
                    &flow.json_error,
                    &flow.raw_json,
                ],
            )
            .await
            .map_err(storage)?;
        Ok(row.get(0))
    }

    async fn create_ssl_info(&self, info: &SslInfo) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO ssl_info
                    (flow_id, cipher_suite, client_ja3, client_sni, server_cn, server_ja3, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
                &[
                    &info.flow_id,
                    &info.cipher_suite,
                    &info.client_ja3,
                    &info.client_sni,
                    &info.server_cn,
                    &info.server_ja3,
                    &info.version,
                ],
            )
            .await
            .map_err(storage)?;
        Ok(row.get(0))
    }

    async fn create_http_info(&self, info: &HttpInfo) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO http_info
                    (flow_id, url, method, user_agent, referer, content_type, status_code)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
                &[
                    &info.flow_id,
                    &info.url,
                    &info.method,
                    &info.user_agent,
                    &info.referer,
                    &info.content_type,
                    &info.status_code,
                ],
            )
            .await
            .map_err(storage)?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl StatsRepository for PgStore {
    async fn create_stats(&self, record: &StatsRecord) -> Result<i64, RepoError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO netify_stats_raw (ts_ms, scope, json) VALUES ($1, $2, $3) RETURNING id",
                &[&record.recv_unix_ms, &record.scope, &record.payload],
            )
            .await
            .map_err(storage)?;
        Ok(row.get(0))
    }
}

//! # In-Memory Store
//!
//! Process-local tables implementing every repository trait. Uniqueness of
//! zone identifiers and device MACs is enforced the same way the database
//! does it, so race handling behaves identically against this backend.
//!
//! Zones and devices are kept for the life of the store. Flow, child and
//! stats tables are unbounded by default; [`MemoryStore::with_retention`]
//! caps each of them to the newest rows for long-running dry runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    Device, DeviceRepository, FlowRepository, HttpInfo, NewDevice, NewFlowRecord, NewZone,
    RepoError, SslInfo, StatsRecord, StatsRepository, Zone, ZoneRepository,
};

#[derive(Default)]
struct Tables {
    zones: Vec<Zone>,
    devices: Vec<Device>,
    flows: VecDeque<(i64, NewFlowRecord)>,
    ssl: VecDeque<SslInfo>,
    http: VecDeque<HttpInfo>,
    stats: VecDeque<StatsRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Appends `row`, evicting the oldest rows beyond `limit`.
fn push_bounded<T>(table: &mut VecDeque<T>, row: T, limit: Option<usize>) {
    table.push_back(row);
    if let Some(limit) = limit {
        while table.len() > limit {
            table.pop_front();
        }
    }
}

/// Process-local implementation of all repositories.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// Row cap for the flow, child and stats tables.
    retention: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps at most `rows` entries per write-only table.
    pub fn with_retention(rows: usize) -> Self {
        Self {
            tables: Mutex::default(),
            retention: Some(rows.max(1)),
        }
    }

    pub async fn zones(&self) -> Vec<Zone> {
        self.tables.lock().await.zones.clone()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.tables.lock().await.devices.clone()
    }

    /// Flow rows paired with their ids, in insertion order.
    pub async fn flows(&self) -> Vec<(i64, NewFlowRecord)> {
        self.tables.lock().await.flows.iter().cloned().collect()
    }

    pub async fn ssl_infos(&self) -> Vec<SslInfo> {
        self.tables.lock().await.ssl.iter().cloned().collect()
    }

    pub async fn http_infos(&self) -> Vec<HttpInfo> {
        self.tables.lock().await.http.iter().cloned().collect()
    }

    pub async fn stats(&self) -> Vec<StatsRecord> {
        self.tables.lock().await.stats.iter().cloned().collect()
    }
}

#[async_trait]
impl ZoneRepository for MemoryStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Zone>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables.zones.iter().find(|z| z.identifier == identifier).cloned())
    }

    async fn create(&self, zone: NewZone) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        if tables.zones.iter().any(|z| z.identifier == zone.identifier) {
            return Err(RepoError::Duplicate {
                entity: "zone",
                key: zone.identifier,
            });
        }
        let id = tables.next_id();
        let now = Utc::now();
        tables.zones.push(Zone {
            id,
            identifier: zone.identifier,
            zone_name: zone.zone_name,
            router_name: zone.router_name,
            description: zone.description,
            is_active: zone.is_active,
            created_by: zone.created_by,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Device>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables.devices.iter().find(|d| d.mac_address == mac).cloned())
    }

    async fn create(&self, device: NewDevice) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        if tables.devices.iter().any(|d| d.mac_address == device.mac_address) {
            return Err(RepoError::Duplicate {
                entity: "device",
                key: device.mac_address,
            });
        }
        let id = tables.next_id();
        tables.devices.push(Device {
            id,
            mac_address: device.mac_address,
            device_name: device.device_name,
            device_type: device.device_type,
            description: device.description,
            zone_id: device.zone_id,
            is_active: device.is_active,
        });
        Ok(id)
    }

    async fn assign_zone_if_unset(&self, device_id: i64, zone_id: i64) -> Result<bool, RepoError> {
        let mut tables = self.tables.lock().await;
        let device = tables
            .devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or(RepoError::NotFound {
                entity: "device",
                id: device_id,
            })?;
        if device.zone_id.is_some() {
            return Ok(false);
        }
        device.zone_id = Some(zone_id);
        Ok(true)
    }
}

#[async_trait]
impl FlowRepository for MemoryStore {
    async fn create_flow(&self, flow: &NewFlowRecord) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        push_bounded(&mut tables.flows, (id, flow.clone()), self.retention);
        Ok(id)
    }

    async fn create_ssl_info(&self, info: &SslInfo) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        push_bounded(&mut tables.ssl, info.clone(), self.retention);
        Ok(id)
    }

    async fn create_http_info(&self, info: &HttpInfo) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        push_bounded(&mut tables.http, info.clone(), self.retention);
        Ok(id)
    }
}

#[async_trait]
impl StatsRepository for MemoryStore {
    async fn create_stats(&self, record: &StatsRecord) -> Result<i64, RepoError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        push_bounded(&mut tables.stats, record.clone(), self.retention);
        Ok(id)
    }
}

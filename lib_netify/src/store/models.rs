//! Row shapes written and read by the repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A router zone row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    /// Unique router identifier token.
    pub identifier: String,
    pub zone_name: String,
    pub router_name: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes of a zone about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewZone {
    pub identifier: String,
    pub zone_name: String,
    pub router_name: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: Option<i64>,
}

/// A device row. `zone_id` stays `None` until a flow supplies a resolved zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub mac_address: String,
    pub device_name: String,
    pub device_type: String,
    pub description: Option<String>,
    pub zone_id: Option<i64>,
    pub is_active: bool,
}

/// Attributes of a device about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub mac_address: String,
    pub device_name: String,
    pub device_type: String,
    pub description: Option<String>,
    pub zone_id: Option<i64>,
    pub is_active: bool,
}

/// # Flow Record
///
/// One ingested `flow` line after normalisation. Immutable once written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFlowRecord {
    pub zone_id: Option<i64>,
    pub device_id: Option<i64>,
    /// Wall clock at ingestion.
    pub recv_ts: DateTime<Utc>,
    pub recv_unix_ms: i64,
    pub first_seen_at: Option<i64>,
    pub first_update_at: Option<i64>,
    pub last_seen_at: Option<i64>,
    pub ct_id: Option<i64>,
    pub ct_mark: Option<i64>,
    pub established: Option<bool>,
    pub ip_version: Option<i64>,
    pub ip_protocol: Option<i64>,
    pub ip_nat: Option<bool>,
    pub local_ip: Option<String>,
    pub local_port: Option<i64>,
    pub local_mac: Option<String>,
    pub local_origin: Option<bool>,
    pub other_ip: Option<String>,
    pub other_port: Option<i64>,
    pub other_mac: Option<String>,
    pub other_type: Option<String>,
    pub detected_protocol: Option<i64>,
    pub detected_protocol_name: Option<String>,
    pub detected_application: Option<i64>,
    pub detected_application_name: Option<String>,
    pub detection_guessed: Option<bool>,
    pub dhc_hit: Option<bool>,
    pub vlan_id: Option<i64>,
    pub interface_name: Option<String>,
    pub host_server_name: Option<String>,
    pub digest: Option<String>,
    /// Length of the raw line in bytes.
    pub bytes_len: i64,
    pub json_valid: bool,
    pub json_error: Option<String>,
    /// The line exactly as received, kept for replay.
    pub raw_json: Vec<u8>,
}

/// TLS metadata attached to a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SslInfo {
    pub flow_id: i64,
    pub cipher_suite: Option<String>,
    pub client_ja3: Option<String>,
    pub client_sni: Option<String>,
    pub server_cn: Option<String>,
    pub server_ja3: Option<String>,
    pub version: Option<String>,
}

/// HTTP metadata attached to a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpInfo {
    pub flow_id: i64,
    pub url: Option<String>,
    pub method: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub content_type: Option<String>,
    pub status_code: Option<i64>,
}

/// A raw `stats` line kept for offline processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub scope: String,
    pub recv_unix_ms: i64,
    pub payload: String,
}

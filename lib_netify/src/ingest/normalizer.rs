//! # Flow Normalizer & Persister
//!
//! Maps an agent `flow` message onto [`NewFlowRecord`] and writes it together
//! with its optional SSL and HTTP children.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error};

use super::counters::IngestCounters;
use super::decoder::DataMessage;
use super::devices::normalize_mac;
use super::telemetry::{bool_of, i64_of, non_empty_object, str_of};
use crate::store::{FlowRepository, HttpInfo, NewFlowRecord, RepoError, SslInfo};

/// Builds the flow row for `msg`.
///
/// Missing or mistyped fields become `None`; the raw line and its length are
/// always kept.
pub fn normalize_flow(
    msg: &DataMessage,
    zone_id: Option<i64>,
    device_id: Option<i64>,
    recv_ts: DateTime<Utc>,
) -> NewFlowRecord {
    let empty = Value::Null;
    let flow = msg.flow().unwrap_or(&empty);
    let top = msg.body.as_ref().unwrap_or(&empty);

    NewFlowRecord {
        zone_id,
        device_id,
        recv_ts,
        recv_unix_ms: recv_ts.timestamp_millis(),
        first_seen_at: i64_of(flow, "first_seen_at"),
        first_update_at: i64_of(flow, "first_update_at"),
        last_seen_at: i64_of(flow, "last_seen_at"),
        ct_id: i64_of(flow, "ct_id"),
        ct_mark: i64_of(flow, "ct_mark"),
        established: bool_of(flow, "established").or_else(|| bool_of(top, "established")),
        ip_version: i64_of(flow, "ip_version"),
        ip_protocol: i64_of(flow, "ip_protocol"),
        ip_nat: bool_of(flow, "ip_nat"),
        local_ip: str_of(flow, "local_ip"),
        local_port: i64_of(flow, "local_port"),
        local_mac: str_of(flow, "local_mac").as_deref().and_then(normalize_mac),
        local_origin: bool_of(flow, "local_origin"),
        other_ip: str_of(flow, "other_ip"),
        other_port: i64_of(flow, "other_port"),
        other_mac: str_of(flow, "other_mac"),
        other_type: str_of(flow, "other_type"),
        detected_protocol: i64_of(flow, "detected_protocol"),
        detected_protocol_name: str_of(flow, "detected_protocol_name"),
        detected_application: i64_of(flow, "detected_application"),
        detected_application_name: str_of(flow, "detected_application_name"),
        detection_guessed: bool_of(flow, "detection_guessed"),
        dhc_hit: bool_of(flow, "dhc_hit"),
        vlan_id: i64_of(flow, "vlan_id"),
        interface_name: str_of(top, "interface"),
        host_server_name: str_of(flow, "host_server_name"),
        digest: str_of(flow, "digest"),
        bytes_len: msg.raw.len() as i64,
        json_valid: msg.json_valid,
        json_error: msg.json_error.clone(),
        raw_json: msg.raw.to_vec(),
    }
}

/// The `ssl` child, when the flow carries a non-empty `ssl` object.
pub fn ssl_info(msg: &DataMessage, flow_id: i64) -> Option<SslInfo> {
    let ssl = non_empty_object(msg.flow()?, "ssl")?;
    Some(SslInfo {
        flow_id,
        cipher_suite: str_of(ssl, "cipher_suite"),
        client_ja3: str_of(ssl, "client_ja3"),
        client_sni: str_of(ssl, "client_sni"),
        server_cn: str_of(ssl, "server_cn"),
        server_ja3: str_of(ssl, "server_ja3"),
        version: str_of(ssl, "version"),
    })
}

/// The `http` child, when the flow carries a non-empty `http` object.
pub fn http_info(msg: &DataMessage, flow_id: i64) -> Option<HttpInfo> {
    let http = non_empty_object(msg.flow()?, "http")?;
    Some(HttpInfo {
        flow_id,
        url: str_of(http, "url"),
        method: str_of(http, "method"),
        user_agent: str_of(http, "user_agent"),
        referer: str_of(http, "referer"),
        content_type: str_of(http, "content_type"),
        status_code: i64_of(http, "status_code"),
    })
}

/// Writes flows and their children.
pub struct FlowPersister {
    flows: Arc<dyn FlowRepository>,
    counters: Arc<IngestCounters>,
}

impl FlowPersister {
    pub fn new(flows: Arc<dyn FlowRepository>, counters: Arc<IngestCounters>) -> Self {
        Self { flows, counters }
    }

    /// Writes the flow row, then any children. A failed child write is logged
    /// and counted but leaves the flow in place.
    pub async fn persist(&self, msg: &DataMessage, record: &NewFlowRecord) -> Result<i64, RepoError> {
        let flow_id = self.flows.create_flow(record).await?;
        IngestCounters::bump(&self.counters.flows_persisted);
        debug!(
            flow_id,
            zone_id = ?record.zone_id,
            device_id = ?record.device_id,
            proto = record.detected_protocol_name.as_deref().unwrap_or("Unknown"),
            app = record.detected_application_name.as_deref().unwrap_or("Unknown"),
            len = record.bytes_len,
            "Flow stored"
        );

        if let Some(ssl) = ssl_info(msg, flow_id) {
            if let Err(e) = self.flows.create_ssl_info(&ssl).await {
                IngestCounters::bump(&self.counters.child_failures);
                error!(flow_id, error = %e, "Failed to insert SSL info");
            }
        }
        if let Some(http) = http_info(msg, flow_id) {
            if let Err(e) = self.flows.create_http_info(&http).await {
                IngestCounters::bump(&self.counters.child_failures);
                error!(flow_id, error = %e, "Failed to insert HTTP info");
            }
        }
        Ok(flow_id)
    }
}

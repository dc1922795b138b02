//! # Ingest Pipeline
//!
//! Per-line dispatch shared by every connection. A line is decoded, then
//! either updates the connection's declared identity, goes down the flow path
//! (identity → zone → device → admission → persist) or the stats path.
//!
//! Nothing in here returns an error to the connection loop. Every failure is
//! logged, counted and turned into a [`LineOutcome`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::admission::{Admission, AdmissionPolicy, DropReason};
use super::counters::IngestCounters;
use super::decoder::{DataMessage, Frame, MessageKind, decode};
use super::devices::DeviceResolver;
use super::framer::LineFramer;
use super::identity::IdentityResolver;
use super::normalizer::{FlowPersister, normalize_flow};
use super::stats::StatsSink;
use super::zones::{ZoneProvisioner, ZoneRef};
use crate::configs::{HandshakePolicy, IngestConfig, OverflowPolicy};
use crate::store::{RepoError, Repositories};

/// Per-connection state carried between lines.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub peer: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    /// Identity declared with `ROUTER_ID:`, if any.
    pub declared: Option<String>,
}

impl Session {
    pub fn new(peer: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        Self {
            peer,
            local,
            declared: None,
        }
    }

    /// Records a handshake token. Returns `false` when the policy keeps an
    /// earlier declaration.
    pub fn declare(&mut self, token: String, policy: HandshakePolicy) -> bool {
        match (&self.declared, policy) {
            (Some(current), _) if *current == token => true,
            (Some(_), HandshakePolicy::FirstDeclared) => false,
            _ => {
                self.declared = Some(token);
                true
            }
        }
    }

    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer.map(|a| a.ip().to_canonical())
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local.map(|a| a.ip().to_canonical())
    }
}

/// What happened to one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Handshake { identifier: String, accepted: bool },
    FlowPersisted { flow_id: i64 },
    FlowDropped(DropReason),
    FlowFailed,
    StatsPersisted { stats_id: i64 },
    StatsFailed,
    /// Not persisted: unknown `type` or unparsable JSON.
    Ignored { kind: String, json_valid: bool },
}

/// # Ingestor
///
/// The shared, immutable half of the pipeline. Build one per process and hand
/// an `Arc` to every connection task.
pub struct Ingestor {
    resolver: IdentityResolver,
    zones: ZoneProvisioner,
    devices: DeviceResolver,
    admission: AdmissionPolicy,
    flows: FlowPersister,
    stats: StatsSink,
    counters: Arc<IngestCounters>,
    handshake_policy: HandshakePolicy,
    overflow_policy: OverflowPolicy,
    read_chunk_size: usize,
    max_line_bytes: usize,
    default_zone_fallback: bool,
}

impl Ingestor {
    pub fn new(config: &IngestConfig, repos: Repositories, counters: Arc<IngestCounters>) -> Self {
        Self {
            resolver: IdentityResolver::from_config(config),
            zones: ZoneProvisioner::new(repos.zones, &config.policy),
            devices: DeviceResolver::new(repos.devices, config.policy.auto_create_devices, counters.clone()),
            admission: AdmissionPolicy::new(&config.policy),
            flows: FlowPersister::new(repos.flows, counters.clone()),
            stats: StatsSink::new(repos.stats),
            counters,
            handshake_policy: config.handshake_policy,
            overflow_policy: config.overflow_policy,
            read_chunk_size: config.read_chunk_size.max(1),
            max_line_bytes: config.max_line_bytes,
            default_zone_fallback: config.policy.default_zone_fallback,
        }
    }

    pub fn counters(&self) -> &Arc<IngestCounters> {
        &self.counters
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    /// A fresh framer for a new connection.
    pub fn framer(&self) -> LineFramer {
        LineFramer::new(self.max_line_bytes, self.overflow_policy)
    }

    /// Provisions the `default` zone when the default fallback is enabled.
    pub async fn bootstrap(&self) -> Result<Option<ZoneRef>, RepoError> {
        if !self.default_zone_fallback {
            return Ok(None);
        }
        let zone = self.zones.ensure_default_zone().await?;
        info!(zone_id = zone.id, "Default zone ready");
        Ok(Some(zone))
    }

    /// Processes one framed line.
    pub async fn handle_line(&self, session: &mut Session, line: Bytes) -> LineOutcome {
        IngestCounters::bump(&self.counters.lines);
        let recv_ts = Utc::now();

        match decode(line) {
            Frame::Handshake(token) => self.on_handshake(session, token),
            Frame::Data(msg) => match msg.kind {
                MessageKind::Flow => self.on_flow(session, &msg, recv_ts).await,
                MessageKind::Stats => self.on_stats(&msg, recv_ts).await,
                MessageKind::Other(ref kind) => {
                    if msg.json_valid {
                        IngestCounters::bump(&self.counters.ignored_types);
                        debug!(peer = ?session.peer, kind = %kind, len = msg.raw.len(), "Ignoring message type");
                    } else {
                        IngestCounters::bump(&self.counters.parse_errors);
                        warn!(
                            peer = ?session.peer,
                            error = msg.json_error.as_deref().unwrap_or(""),
                            len = msg.raw.len(),
                            "Discarding malformed line"
                        );
                    }
                    LineOutcome::Ignored {
                        kind: kind.clone(),
                        json_valid: msg.json_valid,
                    }
                }
            },
        }
    }

    fn on_handshake(&self, session: &mut Session, token: String) -> LineOutcome {
        let accepted = session.declare(token.clone(), self.handshake_policy);
        if accepted {
            IngestCounters::bump(&self.counters.handshakes_accepted);
            info!(peer = ?session.peer, identifier = %token, "Router identity declared");
        } else {
            IngestCounters::bump(&self.counters.handshakes_ignored);
            warn!(
                peer = ?session.peer,
                identifier = %token,
                current = session.declared.as_deref().unwrap_or(""),
                "Ignoring repeated router identity"
            );
        }
        LineOutcome::Handshake {
            identifier: token,
            accepted,
        }
    }

    async fn on_flow(&self, session: &Session, msg: &DataMessage, recv_ts: DateTime<Utc>) -> LineOutcome {
        let remote = session.peer_ip();
        let flow = msg.flow();
        let interface = msg.str_field("interface");
        let mac = flow.and_then(|f| f.get("local_mac")).and_then(|v| v.as_str());

        let zone = match self
            .resolver
            .resolve(session.declared.as_deref(), remote, session.local_ip(), interface)
        {
            Some(identity) => match self.zones.resolve(&identity, remote).await {
                Ok(zone) => zone,
                Err(e) => {
                    IngestCounters::bump(&self.counters.resolution_failures);
                    error!(identifier = %identity.identifier, error = %e, "Zone resolution failed");
                    None
                }
            },
            None => None,
        };

        let device_id = match self.devices.resolve(mac, zone.as_ref()).await {
            Ok(id) => id,
            Err(e) => {
                IngestCounters::bump(&self.counters.resolution_failures);
                error!(mac = mac.unwrap_or(""), error = %e, "Device resolution failed");
                None
            }
        };

        if let Admission::Drop(reason) = self.admission.evaluate(device_id.is_some(), zone.is_some()) {
            let counter = match reason {
                DropReason::UnknownDevice => &self.counters.flows_dropped_unknown_device,
                DropReason::UnknownZone => &self.counters.flows_dropped_unknown_zone,
            };
            IngestCounters::bump(counter);
            warn!(
                peer = ?session.peer,
                mac = mac.unwrap_or(""),
                zone = zone.as_ref().map(|z| z.identifier.as_str()).unwrap_or(""),
                reason = %reason,
                "Dropping flow"
            );
            return LineOutcome::FlowDropped(reason);
        }

        let record = normalize_flow(msg, zone.as_ref().map(|z| z.id), device_id, recv_ts);
        match self.flows.persist(msg, &record).await {
            Ok(flow_id) => LineOutcome::FlowPersisted { flow_id },
            Err(e) => {
                IngestCounters::bump(&self.counters.flow_failures);
                error!(peer = ?session.peer, error = %e, "Failed to insert flow data");
                LineOutcome::FlowFailed
            }
        }
    }

    async fn on_stats(&self, msg: &DataMessage, recv_ts: DateTime<Utc>) -> LineOutcome {
        match self.stats.persist(msg, recv_ts).await {
            Ok(stats_id) => {
                IngestCounters::bump(&self.counters.stats_persisted);
                LineOutcome::StatsPersisted { stats_id }
            }
            Err(e) => {
                IngestCounters::bump(&self.counters.stats_failures);
                error!(error = %e, "Failed to insert stats data");
                LineOutcome::StatsFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ingestor(config: &IngestConfig, store: Arc<MemoryStore>) -> Ingestor {
        Ingestor::new(
            config,
            Repositories::from_backend(store),
            Arc::new(IngestCounters::new()),
        )
    }

    fn line(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn first_declared_keeps_identity() {
        let mut s = Session::default();
        assert!(s.declare("a".into(), HandshakePolicy::FirstDeclared));
        assert!(!s.declare("b".into(), HandshakePolicy::FirstDeclared));
        assert!(s.declare("a".into(), HandshakePolicy::FirstDeclared));
        assert_eq!(s.declared.as_deref(), Some("a"));
    }

    #[test]
    fn latest_declared_overwrites_identity() {
        let mut s = Session::default();
        assert!(s.declare("a".into(), HandshakePolicy::LatestDeclared));
        assert!(s.declare("b".into(), HandshakePolicy::LatestDeclared));
        assert_eq!(s.declared.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn unknown_type_is_counted_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&IngestConfig::default(), store.clone());
        let mut s = Session::default();

        let out = ing.handle_line(&mut s, line(r#"{"type":"agent_status"}"#)).await;
        assert_eq!(
            out,
            LineOutcome::Ignored {
                kind: "agent_status".into(),
                json_valid: true
            }
        );
        let out = ing.handle_line(&mut s, line("{not json")).await;
        assert!(matches!(out, LineOutcome::Ignored { json_valid: false, .. }));

        let snap = ing.counters().snapshot();
        assert_eq!(snap.lines, 2);
        assert_eq!(snap.ignored_types, 1);
        assert_eq!(snap.parse_errors, 1);
        assert!(store.flows().await.is_empty());
    }

    #[tokio::test]
    async fn flow_without_mac_is_dropped_by_default() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&IngestConfig::default(), store.clone());
        let mut s = Session::default();
        let out = ing
            .handle_line(&mut s, line(r#"{"type":"flow","flow":{"local_ip":"10.0.0.5"}}"#))
            .await;
        assert_eq!(out, LineOutcome::FlowDropped(DropReason::UnknownDevice));
        assert_eq!(ing.counters().snapshot().flows_dropped_unknown_device, 1);
        assert!(store.flows().await.is_empty());
    }

    #[tokio::test]
    async fn unresolved_zone_is_dropped_when_fallbacks_are_off() {
        let mut config = IngestConfig::default();
        config.policy.default_zone_fallback = false;
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&config, store.clone());
        let mut s = Session::default();
        let out = ing
            .handle_line(
                &mut s,
                line(r#"{"type":"flow","flow":{"local_mac":"aa:bb:cc:dd:ee:01"}}"#),
            )
            .await;
        assert_eq!(out, LineOutcome::FlowDropped(DropReason::UnknownZone));
        // The device is still provisioned; only the flow is discarded.
        assert_eq!(store.devices().await.len(), 1);
        assert!(store.zones().await.is_empty());
    }

    #[tokio::test]
    async fn permissive_policy_stores_unresolved_flow() {
        let mut config = IngestConfig::default();
        config.policy.default_zone_fallback = false;
        config.policy.allow_unknown_devices = true;
        config.policy.allow_unknown_zones = true;
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&config, store.clone());
        let mut s = Session::default();
        let out = ing
            .handle_line(&mut s, line(r#"{"type":"flow","flow":{"other_ip":"1.1.1.1"}}"#))
            .await;
        assert!(matches!(out, LineOutcome::FlowPersisted { .. }));
        let flows = store.flows().await;
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].1.zone_id, None);
        assert_eq!(flows[0].1.device_id, None);
    }

    #[tokio::test]
    async fn stats_go_to_the_sink() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&IngestConfig::default(), store.clone());
        let mut s = Session::default();
        let out = ing
            .handle_line(&mut s, line(r#"{"type":"stats","scope":"global"}"#))
            .await;
        assert!(matches!(out, LineOutcome::StatsPersisted { .. }));
        assert_eq!(store.stats().await[0].scope, "global");
        assert!(store.zones().await.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_respects_fallback_flag() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(&IngestConfig::default(), store.clone());
        assert!(ing.bootstrap().await.unwrap().is_some());
        assert_eq!(store.zones().await[0].identifier, "default");

        let mut config = IngestConfig::default();
        config.policy.default_zone_fallback = false;
        let store = Arc::new(MemoryStore::new());
        assert!(ingestor(&config, store.clone()).bootstrap().await.unwrap().is_none());
        assert!(store.zones().await.is_empty());
    }
}

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::*;
use futures_util::future::join_all;
use lib_netify::configs::{IngestConfig, PolicyConfig};
use lib_netify::ingest::devices::{DeviceResolver, describe_device};
use lib_netify::ingest::identity::{IdentitySource, ResolvedIdentity};
use lib_netify::ingest::zones::ZoneProvisioner;
use lib_netify::ingest::{CloseReason, IngestCounters, Ingestor};
use lib_netify::store::{
    Device, DeviceRepository, FlowRepository, HttpInfo, MemoryStore, NewDevice, NewFlowRecord,
    NewZone, RepoError, Repositories, SslInfo, StatsRecord, StatsRepository, Zone, ZoneRepository,
};

/// Flow writes fail for lines containing `fail-me`; SSL child writes always fail.
struct FlakyFlows {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl FlowRepository for FlakyFlows {
    async fn create_flow(&self, flow: &NewFlowRecord) -> Result<i64, RepoError> {
        if String::from_utf8_lossy(&flow.raw_json).contains("fail-me") {
            return Err(RepoError::Storage("connection reset".to_string()));
        }
        self.inner.create_flow(flow).await
    }

    async fn create_ssl_info(&self, _info: &SslInfo) -> Result<i64, RepoError> {
        Err(RepoError::Storage("ssl_info unavailable".to_string()))
    }

    async fn create_http_info(&self, info: &HttpInfo) -> Result<i64, RepoError> {
        self.inner.create_http_info(info).await
    }
}

struct DownStats;

#[async_trait]
impl StatsRepository for DownStats {
    async fn create_stats(&self, _record: &StatsRecord) -> Result<i64, RepoError> {
        Err(RepoError::Storage("stats table locked".to_string()))
    }
}

/// Reports "not found" for the first `blind` lookups so that every racer goes
/// on to create.
struct BlindLookups {
    inner: Arc<MemoryStore>,
    blind: usize,
    lookups: AtomicUsize,
}

impl BlindLookups {
    fn new(inner: Arc<MemoryStore>, blind: usize) -> Self {
        Self {
            inner,
            blind,
            lookups: AtomicUsize::new(0),
        }
    }

    fn is_blind(&self) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst) < self.blind
    }
}

#[async_trait]
impl ZoneRepository for BlindLookups {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Zone>, RepoError> {
        if self.is_blind() {
            tokio::task::yield_now().await;
            return Ok(None);
        }
        self.inner.find_by_identifier(identifier).await
    }

    async fn create(&self, zone: NewZone) -> Result<i64, RepoError> {
        ZoneRepository::create(self.inner.as_ref(), zone).await
    }
}

#[async_trait]
impl DeviceRepository for BlindLookups {
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Device>, RepoError> {
        if self.is_blind() {
            tokio::task::yield_now().await;
            return Ok(None);
        }
        self.inner.find_by_mac(mac).await
    }

    async fn create(&self, device: NewDevice) -> Result<i64, RepoError> {
        DeviceRepository::create(self.inner.as_ref(), device).await
    }

    async fn assign_zone_if_unset(&self, device_id: i64, zone_id: i64) -> Result<bool, RepoError> {
        self.inner.assign_zone_if_unset(device_id, zone_id).await
    }
}

/// Zone backfill always fails; lookups and inserts pass through.
struct StuckBackfill {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl DeviceRepository for StuckBackfill {
    async fn find_by_mac(&self, mac: &str) -> Result<Option<Device>, RepoError> {
        self.inner.find_by_mac(mac).await
    }

    async fn create(&self, device: NewDevice) -> Result<i64, RepoError> {
        DeviceRepository::create(self.inner.as_ref(), device).await
    }

    async fn assign_zone_if_unset(&self, _device_id: i64, _zone_id: i64) -> Result<bool, RepoError> {
        Err(RepoError::Storage("transient".to_string()))
    }
}

#[tokio::test]
async fn failed_zone_backfill_keeps_known_device() {
    let store = Arc::new(MemoryStore::new());
    let device_id = DeviceRepository::create(store.as_ref(), describe_device("aa:bb:cc:dd:ee:01", None))
        .await
        .unwrap();
    let repos = Repositories {
        zones: store.clone(),
        devices: Arc::new(StuckBackfill { inner: store.clone() }),
        flows: store.clone(),
        stats: store.clone(),
    };
    let ingestor = Ingestor::new(&IngestConfig::default(), repos, Arc::new(IngestCounters::new()));

    let summary = feed(&ingestor, lines(&["ROUTER_ID:edge-7", FLOW_EDGE_7])).await;

    assert_eq!(summary.reason, CloseReason::Eof);
    let flows = store.flows().await;
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].1.device_id, Some(device_id));
    assert_eq!(store.devices().await[0].zone_id, None);
    let snap = ingestor.counters().snapshot();
    assert_eq!(snap.flows_persisted, 1);
    assert_eq!(snap.flows_dropped_unknown_device, 0);
    assert_eq!(snap.resolution_failures, 1);
}

#[tokio::test]
async fn failed_flow_write_does_not_affect_next_record() {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories {
        zones: store.clone(),
        devices: store.clone(),
        flows: Arc::new(FlakyFlows { inner: store.clone() }),
        stats: store.clone(),
    };
    let ingestor = Ingestor::new(&IngestConfig::default(), repos, Arc::new(IngestCounters::new()));

    let failing = flow_line("aa:bb:cc:dd:ee:01", "fail-me");
    let good = flow_line("aa:bb:cc:dd:ee:01", "1.1.1.1");
    let summary = feed(&ingestor, lines(&["ROUTER_ID:edge-7", &failing, &good])).await;

    assert_eq!(summary.reason, CloseReason::Eof);
    assert_eq!(summary.lines, 3);
    let flows = store.flows().await;
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].1.other_ip.as_deref(), Some("1.1.1.1"));

    let snap = ingestor.counters().snapshot();
    assert_eq!(snap.flow_failures, 1);
    assert_eq!(snap.flows_persisted, 1);
}

#[tokio::test]
async fn failed_child_write_keeps_the_flow() {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories {
        zones: store.clone(),
        devices: store.clone(),
        flows: Arc::new(FlakyFlows { inner: store.clone() }),
        stats: store.clone(),
    };
    let ingestor = Ingestor::new(&IngestConfig::default(), repos, Arc::new(IngestCounters::new()));

    let line = r#"{"type":"flow","flow":{"local_mac":"aa:bb:cc:dd:ee:01","ssl":{"client_sni":"example.com"},"http":{"url":"/"}}}"#;
    feed(&ingestor, lines(&["ROUTER_ID:edge-7", line])).await;

    let flows = store.flows().await;
    assert_eq!(flows.len(), 1);
    let http = store.http_infos().await;
    assert_eq!(http.len(), 1);
    assert_eq!(http[0].flow_id, flows[0].0);
    assert!(store.ssl_infos().await.is_empty());
    assert_eq!(ingestor.counters().snapshot().child_failures, 1);
}

#[tokio::test]
async fn failed_stats_write_is_counted() {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories {
        zones: store.clone(),
        devices: store.clone(),
        flows: store.clone(),
        stats: Arc::new(DownStats),
    };
    let ingestor = Ingestor::new(&IngestConfig::default(), repos, Arc::new(IngestCounters::new()));
    let summary = feed(
        &ingestor,
        lines(&[r#"{"type":"stats","scope":"global"}"#, "ROUTER_ID:edge-7", FLOW_EDGE_7]),
    )
    .await;

    assert_eq!(summary.reason, CloseReason::Eof);
    assert_eq!(store.flows().await.len(), 1);
    let snap = ingestor.counters().snapshot();
    assert_eq!(snap.stats_failures, 1);
    assert_eq!(snap.failures(), 1);
}

#[tokio::test]
async fn concurrent_zone_provisioning_converges_to_one_row() {
    const RACERS: usize = 16;
    let store = Arc::new(MemoryStore::new());
    let blind = Arc::new(BlindLookups::new(store.clone(), RACERS));
    let provisioner = Arc::new(ZoneProvisioner::new(blind, &PolicyConfig::default()));
    let identity = ResolvedIdentity {
        identifier: "edge-race".to_string(),
        source: IdentitySource::Handshake,
    };

    let tasks = (0..RACERS).map(|_| {
        let provisioner = provisioner.clone();
        let identity = identity.clone();
        tokio::spawn(async move { provisioner.resolve(&identity, None).await })
    });
    let results = join_all(tasks).await;

    let ids: Vec<i64> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().unwrap().id)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let zones = store.zones().await;
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].id, ids[0]);
}

#[tokio::test]
async fn concurrent_device_provisioning_converges_to_one_row() {
    const RACERS: usize = 8;
    let store = Arc::new(MemoryStore::new());
    let blind = Arc::new(BlindLookups::new(store.clone(), RACERS));
    let resolver = Arc::new(DeviceResolver::new(blind, true, Arc::new(IngestCounters::new())));

    let tasks = (0..RACERS).map(|_| {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(Some("AA:BB:CC:DD:EE:09"), None).await })
    });
    let ids: Vec<Option<i64>> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert!(ids.iter().all(|id| id.is_some() && *id == ids[0]));
    assert_eq!(store.devices().await.len(), 1);
}

#[tokio::test]
async fn concurrent_connections_share_one_zone() {
    let (store, ingestor) = memory_ingestor(&IngestConfig::default());
    let ingestor = Arc::new(ingestor);

    let tasks = (0..8u8).map(|i| {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let mac = format!("aa:bb:cc:dd:ee:{:02x}", i);
            let flow = flow_line(&mac, "9.9.9.9");
            feed(&ingestor, lines(&["ROUTER_ID:edge-shared", &flow])).await
        })
    });
    for summary in join_all(tasks).await {
        assert_eq!(summary.unwrap().reason, CloseReason::Eof);
    }

    let zones = store.zones().await;
    assert_eq!(zones.len(), 1);
    assert_eq!(store.devices().await.len(), 8);
    let flows = store.flows().await;
    assert_eq!(flows.len(), 8);
    assert!(flows.iter().all(|(_, f)| f.zone_id == Some(zones[0].id)));
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lib_netify::configs::IngestConfig;
use lib_netify::ingest::{ConnectionSummary, IngestCounters, Ingestor, Session, serve_connection};
use lib_netify::store::{MemoryStore, Repositories};
use tokio::io::AsyncWriteExt;

pub const FLOW_EDGE_7: &str = r#"{"type":"flow","flow":{"local_mac":"aa:bb:cc:dd:ee:01","local_ip":"10.0.0.5","other_ip":"93.184.216.34","detected_protocol_name":"TLS"}}"#;

pub fn flow_line(mac: &str, other_ip: &str) -> String {
    format!(
        r#"{{"type":"flow","interface":"eth0","flow":{{"local_mac":"{}","local_ip":"10.0.0.5","other_ip":"{}","other_port":443,"ip_version":4}}}}"#,
        mac, other_ip
    )
}

pub fn peer() -> Option<SocketAddr> {
    Some("198.51.100.7:40000".parse().unwrap())
}

pub fn local() -> Option<SocketAddr> {
    Some("10.0.0.1:7150".parse().unwrap())
}

pub fn memory_ingestor(config: &IngestConfig) -> (Arc<MemoryStore>, Ingestor) {
    let store = Arc::new(MemoryStore::new());
    let ingestor = Ingestor::new(
        config,
        Repositories::from_backend(store.clone()),
        Arc::new(IngestCounters::new()),
    );
    (store, ingestor)
}

/// Feeds `chunks` through an in-memory duplex, one write per chunk, and runs
/// the connection to EOF.
pub async fn feed(ingestor: &Ingestor, chunks: Vec<Vec<u8>>) -> ConnectionSummary {
    let (mut client, server) = tokio::io::duplex(256);
    // The server side may hang up early (line overflow), so write errors end
    // the writer quietly.
    let writer = async move {
        for chunk in chunks {
            if client.write_all(&chunk).await.is_err() {
                return;
            }
            let _ = client.flush().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let _ = client.shutdown().await;
    };
    let (_, summary) = tokio::join!(writer, serve_connection(server, Session::new(peer(), local()), ingestor));
    summary
}

/// One chunk per line, each terminated with `\n`.
pub fn lines(lines: &[&str]) -> Vec<Vec<u8>> {
    lines.iter().map(|l| format!("{}\n", l).into_bytes()).collect()
}

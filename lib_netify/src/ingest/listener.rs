//! # Connection Acceptor
//!
//! Owns the listening socket and runs one tokio task per agent connection.
//! Lines inside a connection are handled strictly in arrival order; different
//! connections interleave freely and share only the [`Ingestor`].

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::counters::IngestCounters;
use super::pipeline::{Ingestor, Session};

/// Pause before retrying a read that would block or was interrupted.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);
/// Pause after a failed `accept`.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Eof,
    ReadError,
    LineTooLong,
}

/// Totals for one finished connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub lines: u64,
    pub overflows: u64,
    pub reason: CloseReason,
}

pub struct FlowListener {
    listener: TcpListener,
    ingestor: Arc<Ingestor>,
}

impl FlowListener {
    pub async fn bind(addr: SocketAddr, ingestor: Arc<Ingestor>) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Ok(Self { listener, ingestor })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` fires. Running connections are not
    /// waited for.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Netify ingest listening on {}", addr),
            Err(_) => info!("Netify ingest listening"),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let local = stream.local_addr().ok();
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let ingestor = self.ingestor.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, Session::new(Some(peer), local), &ingestor).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Ingest listener shutting down.");
                    break;
                }
            }
        }
    }
}

/// Reads `reader` to completion, dispatching every complete line in order.
///
/// Works on any `AsyncRead`, so tests can drive it with an in-memory duplex.
/// A trailing unterminated line at EOF is discarded.
pub async fn serve_connection<R>(mut reader: R, mut session: Session, ingestor: &Ingestor) -> ConnectionSummary
where
    R: AsyncRead + Unpin,
{
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let counters = ingestor.counters().clone();
    IngestCounters::bump(&counters.connections_opened);
    info!(conn_id, peer = ?session.peer, "Client connected");

    let mut framer = ingestor.framer();
    let mut chunk = vec![0u8; ingestor.read_chunk_size()];
    let mut lines = 0u64;
    let mut seen_overflows = 0u64;

    let reason = 'read: loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break CloseReason::Eof,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                tokio::time::sleep(READ_RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                warn!(conn_id, peer = ?session.peer, error = %e, "Read failed");
                break CloseReason::ReadError;
            }
        };
        framer.extend(&chunk[..n]);

        loop {
            let next = framer.next_line();
            if framer.overflows() > seen_overflows {
                let fresh = framer.overflows() - seen_overflows;
                seen_overflows = framer.overflows();
                IngestCounters::add(&counters.line_overflows, fresh);
                warn!(conn_id, peer = ?session.peer, "Discarded line longer than the configured limit");
            }
            match next {
                Ok(Some(line)) => {
                    lines += 1;
                    let outcome = ingestor.handle_line(&mut session, line).await;
                    debug!(conn_id, ?outcome, "Line handled");
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(conn_id, peer = ?session.peer, error = %e, "Closing connection");
                    break 'read CloseReason::LineTooLong;
                }
            }
        }
    };

    if framer.buffered() > 0 {
        debug!(conn_id, bytes = framer.buffered(), "Discarding unterminated trailing line");
    }
    IngestCounters::bump(&counters.connections_closed);
    info!(conn_id, peer = ?session.peer, lines, ?reason, "Client disconnected");

    ConnectionSummary {
        lines,
        overflows: seen_overflows,
        reason,
    }
}

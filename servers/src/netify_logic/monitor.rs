use std::sync::Arc;
use std::time::Duration;

use lib_netify::ingest::{CounterSnapshot, IngestCounters};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

/// Logs the ingest counters every `period_secs` until shutdown. Warns when any
/// failure counter grew since the previous report.
pub async fn run(counters: Arc<IngestCounters>, period_secs: u64, mut shutdown: broadcast::Receiver<()>) {
    if period_secs == 0 {
        return;
    }
    let mut ticker = interval(Duration::from_secs(period_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;
    let mut previous = counters.snapshot();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(counters = %render(&counters.snapshot()), "Monitor stopping.");
                break;
            }
            _ = ticker.tick() => {
                let current = counters.snapshot();
                report(&previous, &current);
                previous = current;
            }
        }
    }
}

fn report(previous: &CounterSnapshot, current: &CounterSnapshot) {
    info!(
        active = current.active_connections(),
        lines = current.lines - previous.lines,
        flows = current.flows_persisted - previous.flows_persisted,
        counters = %render(current),
        "Ingest report"
    );
    let new_failures = current.failures().saturating_sub(previous.failures());
    if new_failures > 0 {
        warn!(
            new_failures,
            flow = current.flow_failures,
            child = current.child_failures,
            stats = current.stats_failures,
            resolution = current.resolution_failures,
            "Persistence failures since last report"
        );
    }
}

fn render(snapshot: &CounterSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_else(|e| format!("<unserialisable: {}>", e))
}

//! Stats sink: `stats` messages are stored verbatim, without resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::decoder::DataMessage;
use crate::store::{RepoError, StatsRecord, StatsRepository};

pub struct StatsSink {
    stats: Arc<dyn StatsRepository>,
}

impl StatsSink {
    pub fn new(stats: Arc<dyn StatsRepository>) -> Self {
        Self { stats }
    }

    pub async fn persist(&self, msg: &DataMessage, recv_ts: DateTime<Utc>) -> Result<i64, RepoError> {
        let record = stats_record(msg, recv_ts);
        let id = self.stats.create_stats(&record).await?;
        debug!(stats_id = id, scope = %record.scope, len = record.payload.len(), "Stats stored");
        Ok(id)
    }
}

/// Scope (empty when absent), receive time and the raw line.
pub fn stats_record(msg: &DataMessage, recv_ts: DateTime<Utc>) -> StatsRecord {
    StatsRecord {
        scope: msg.str_field("scope").unwrap_or_default().to_string(),
        recv_unix_ms: recv_ts.timestamp_millis(),
        payload: String::from_utf8_lossy(&msg.raw).into_owned(),
    }
}

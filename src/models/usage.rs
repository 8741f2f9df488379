//! Usage counter snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One absolute counter reading for a key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub id: i64,
    pub key_id: String,
    /// Absolute remote counter at capture time
    pub value: u64,
    /// Bytes attributed to the interval since the previous snapshot
    pub delta: u64,
    pub captured_at: DateTime<Utc>,
}

/// Bytes used since the previous reading.
///
/// The first reading counts as usage since creation. A counter lower than the
/// previous reading means the remote side was reset, so the new reading is
/// itself the delta.
pub fn usage_delta(previous: Option<u64>, current: u64) -> u64 {
    match previous {
        None => current,
        Some(last) => current.checked_sub(last).unwrap_or(current),
    }
}

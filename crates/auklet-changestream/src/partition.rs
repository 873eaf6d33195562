use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The genesis partition covers the whole change stream until the source
/// first splits it. Its token is the empty string.
pub const GENESIS_TOKEN: &str = "";

/// Finished partitions are kept this long for debugging, then removed by the
/// metadata table's row-retention policy on `finished_at`.
pub const FINISHED_RETENTION_DAYS: i64 = 7;

/// Lifecycle of one change-stream partition.
///
/// Transitions: `Created → Scheduled → Running → Finished`. The only
/// reversal is the in-memory failure requeue, which never reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Created = 0,
    Scheduled = 1,
    Running = 2,
    Finished = 3,
}

impl PartitionState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(PartitionState::Created),
            1 => Some(PartitionState::Scheduled),
            2 => Some(PartitionState::Running),
            3 => Some(PartitionState::Finished),
            _ => None,
        }
    }
}

impl std::fmt::Display for PartitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartitionState::Created => "created",
            PartitionState::Scheduled => "scheduled",
            PartitionState::Running => "running",
            PartitionState::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// One partition metadata row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Opaque source token; empty string for genesis.
    pub token: String,
    /// Empty for genesis and for children of genesis.
    pub parent_tokens: Vec<String>,
    pub start_timestamp: DateTime<Utc>,
    /// Highest commit timestamp processed. Never decreases and never drops
    /// below `start_timestamp`.
    pub watermark: DateTime<Utc>,
    pub state: PartitionState,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub running_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

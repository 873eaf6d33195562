use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One batch of records read from a partition. Any of the three lists may be
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(default)]
    pub data_change_records: Vec<DataChangeRecord>,
    #[serde(default)]
    pub heartbeat_records: Vec<HeartbeatRecord>,
    #[serde(default)]
    pub child_partitions_records: Vec<ChildPartitionsRecord>,
}

impl ChangeRecord {
    /// Highest commit timestamp carried by this record; drives the
    /// partition watermark.
    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        let data = self.data_change_records.iter().map(|r| r.commit_timestamp);
        let heartbeats = self.heartbeat_records.iter().map(|r| r.timestamp);
        let children = self
            .child_partitions_records
            .iter()
            .map(|r| r.start_timestamp);
        data.chain(heartbeats).chain(children).max()
    }
}

/// Row mutations committed at one timestamp within a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeRecord {
    pub commit_timestamp: DateTime<Utc>,
    /// Orders records sharing a commit timestamp within the partition.
    pub record_sequence: String,
    pub table: String,
    pub mods: Vec<RowMod>,
}

/// One mutated row. Values are the source DB's JSON representation; the
/// consumer picks out the columns it cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMod {
    pub keys: Value,
    pub new_values: Value,
    pub old_values: Value,
}

/// Liveness marker on an otherwise idle partition; advances the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
}

/// Split/merge event: this partition stops at `start_timestamp` and the
/// listed children continue from there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPartitionsRecord {
    pub start_timestamp: DateTime<Utc>,
    pub record_sequence: String,
    pub children: Vec<ChildPartition>,
}

/// On a merge the same child appears in several parents' records, each
/// listing all of its parent tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPartition {
    pub token: String,
    pub parent_tokens: Vec<String>,
}

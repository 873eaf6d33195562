use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StreamError;
use crate::record::ChangeRecord;

/// A single partition's record stream, in commit-timestamp order.
///
/// Not restartable: once it errors or ends, callers reopen through
/// [`ChangeSource::read`] from the current watermark.
#[async_trait]
pub trait ChangeStream: Send {
    /// `None` when the source closed the partition (all further records will
    /// arrive through its children).
    async fn next(&mut self) -> Result<Option<ChangeRecord>, StreamError>;
}

/// Opens streaming reads against the source database.
#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// `partition_token` of `None` reads the genesis partition.
    async fn read(
        &self,
        feed: &str,
        partition_token: Option<&str>,
        from: DateTime<Utc>,
        heartbeat_interval: Duration,
    ) -> Result<Box<dyn ChangeStream>, StreamError>;
}

// ── In-memory scripted source ─────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    records: Vec<ChangeRecord>,
    /// Number of reads that should fail before the script plays.
    fail_first: usize,
}

/// Scripted [`ChangeSource`] for tests and local runs: each partition token
/// maps to a fixed list of records, played once per read. The `from`
/// timestamp is ignored; scripts are authored per-read.
#[derive(Clone, Default)]
pub struct MemoryChangeSource {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
}

impl MemoryChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, token: &str, records: Vec<ChangeRecord>) {
        let mut guard = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(token.to_string()).or_default().records = records;
    }

    /// Make the next `n` reads of `token` fail with a read error.
    pub fn fail_reads(&self, token: &str, n: usize) {
        let mut guard = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(token.to_string()).or_default().fail_first = n;
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeSource {
    async fn read(
        &self,
        _feed: &str,
        partition_token: Option<&str>,
        _from: DateTime<Utc>,
        _heartbeat_interval: Duration,
    ) -> Result<Box<dyn ChangeStream>, StreamError> {
        let token = partition_token.unwrap_or_default();
        let mut guard = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let script = guard
            .get_mut(token)
            .ok_or_else(|| StreamError::Read(format!("no script for partition {token:?}")))?;
        if script.fail_first > 0 {
            script.fail_first -= 1;
            return Err(StreamError::Read(format!(
                "scripted read failure for partition {token:?}"
            )));
        }
        Ok(Box::new(MemoryStream {
            records: script.records.clone().into(),
        }))
    }
}

struct MemoryStream {
    records: VecDeque<ChangeRecord>,
}

#[async_trait]
impl ChangeStream for MemoryStream {
    async fn next(&mut self) -> Result<Option<ChangeRecord>, StreamError> {
        Ok(self.records.pop_front())
    }
}

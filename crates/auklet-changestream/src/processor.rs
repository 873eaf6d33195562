use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ProcessError, StreamError};
use crate::partition::{PartitionState, GENESIS_TOKEN};
use crate::record::DataChangeRecord;
use crate::source::ChangeSource;
use crate::store::PartitionStore;

/// Result of the caller's per-record callback. An error fails the partition,
/// which is requeued and retried from its watermark.
pub type RecordResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Invoked for every data-change record, in commit-timestamp order within a
/// partition.
pub type RecordFn =
    Arc<dyn Fn(DataChangeRecord) -> BoxFuture<'static, RecordResult> + Send + Sync>;

/// A partition awaiting dispatch or in progress.
#[derive(Debug, Clone)]
pub struct TodoItem {
    pub token: String,
    pub parent_tokens: Vec<String>,
    pub start_timestamp: DateTime<Utc>,
    pub record_sequence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionStatus {
    Received,
    Running,
    Finished,
}

// `status` is retained for the whole run: finished entries are consulted
// whenever a later child lists them as parents.
#[derive(Default)]
struct TrackerState {
    todo: HashMap<String, TodoItem>,
    status: HashMap<String, PartitionStatus>,
    /// Tokens whose scheduling precondition the store has confirmed.
    scheduled: std::collections::HashSet<String>,
    tx: Option<mpsc::Sender<TodoItem>>,
}

impl TrackerState {
    /// A partition may be dispatched when the store confirmed its
    /// precondition, or when local bookkeeping proves it: all listed parents
    /// finished, or — for children of genesis, which carry no parent
    /// tokens — the genesis stream itself finished.
    fn ready(&self, item: &TodoItem) -> bool {
        if self.scheduled.contains(&item.token) {
            return true;
        }
        if item.parent_tokens.is_empty() {
            return item.token == GENESIS_TOKEN
                || self.status.get(GENESIS_TOKEN) == Some(&PartitionStatus::Finished);
        }
        item.parent_tokens
            .iter()
            .all(|p| self.status.get(p) == Some(&PartitionStatus::Finished))
    }
}

/// Drives the DAG of change-stream partitions to completion.
///
/// Each partition's records are processed exactly once per successful run.
/// Children are dispatched strictly after every parent finished; partitions
/// that fail with a transient error are requeued and retried from their
/// watermark. The first fatal error (metadata store failure) cancels all
/// sibling partition tasks.
pub struct PartitionProcessor {
    store: Arc<dyn PartitionStore>,
    source: Arc<dyn ChangeSource>,
    feed: String,
    heartbeat_interval: Duration,
    on_record: RecordFn,
    retry_delay: Duration,
    state: Mutex<TrackerState>,
}

fn log_token(token: &str) -> &str {
    if token.is_empty() {
        "(genesis)"
    } else {
        token
    }
}

impl PartitionProcessor {
    pub fn new(
        store: Arc<dyn PartitionStore>,
        source: Arc<dyn ChangeSource>,
        feed: impl Into<String>,
        heartbeat_interval: Duration,
        on_record: RecordFn,
    ) -> Arc<Self> {
        Arc::new(PartitionProcessor {
            store,
            source,
            feed: feed.into(),
            heartbeat_interval,
            on_record,
            retry_delay: Duration::from_secs(1),
            state: Mutex::new(TrackerState::default()),
        })
    }

    /// Process the feed until every known partition is finished, or `cancel`
    /// fires. `start_from` seeds the genesis partition on first run.
    pub async fn run(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        start_from: DateTime<Utc>,
    ) -> Result<(), ProcessError> {
        let (tx, mut rx) = mpsc::channel::<TodoItem>(1);
        {
            let mut st = self.state.lock().await;
            st.tx = Some(tx);
        }

        if self.store.has_no_partitions(&self.feed).await? {
            self.store
                .add_child_partition(&self.feed, GENESIS_TOKEN, &[], start_from)
                .await?;
            info!(feed = %self.feed, start = %start_from, "created genesis partition");
        }

        // Crash recovery: partitions left Running resume from their watermark.
        let running = self
            .store
            .get_partitions_by_state(&self.feed, PartitionState::Running)
            .await?;
        {
            let mut st = self.state.lock().await;
            for (token, watermark) in running {
                debug!(feed = %self.feed, partition = log_token(&token), "recovering running partition");
                st.todo.insert(
                    token.clone(),
                    TodoItem {
                        token: token.clone(),
                        parent_tokens: Vec::new(),
                        start_timestamp: watermark,
                        record_sequence: String::new(),
                    },
                );
                // A Running row passed its scheduling precondition before.
                st.scheduled.insert(token.clone());
                st.status.insert(token, PartitionStatus::Received);
            }
        }

        let mut tasks: JoinSet<Result<(), ProcessError>> = JoinSet::new();
        let worker_cancel = cancel.child_token();

        // The initial readiness scan runs as a sibling task so its channel
        // sends pair up with the dispatch loop below.
        {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                this.notify_ready().await?;
                this.maybe_complete().await;
                Ok(())
            });
        }

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                maybe_item = rx.recv() => match maybe_item {
                    Some(item) => {
                        let this = Arc::clone(self);
                        let c = worker_cancel.clone();
                        tasks.spawn(async move { this.run_partition(item, c).await });
                    }
                    // Channel closed: todo drained, all partitions finished.
                    None => break Ok(()),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => break Err(err),
                        Err(join_err) => break Err(ProcessError::Panic(join_err.to_string())),
                    }
                }
            }
        };

        // First fatal error (or outer cancellation) tears the whole group
        // down. Dropping the receiver first unblocks any worker mid-send.
        drop(rx);
        worker_cancel.cancel();
        while tasks.join_next().await.is_some() {}

        if result.is_ok() && !cancel.is_cancelled() {
            info!(feed = %self.feed, "change stream fully processed");
        }
        result
    }

    /// Register a child partition observed in a parent's stream. Idempotent
    /// on known tokens.
    async fn add_child(
        &self,
        token: String,
        parent_tokens: Vec<String>,
        start_timestamp: DateTime<Utc>,
        record_sequence: String,
    ) {
        let mut st = self.state.lock().await;
        if st.status.contains_key(&token) {
            return;
        }
        debug!(partition = log_token(&token), parents = ?parent_tokens, "tracking child partition");
        st.todo.insert(
            token.clone(),
            TodoItem { token: token.clone(), parent_tokens, start_timestamp, record_sequence },
        );
        st.status.insert(token, PartitionStatus::Received);
    }

    async fn finish(&self, token: &str) {
        let mut st = self.state.lock().await;
        st.status.insert(token.to_string(), PartitionStatus::Finished);
        st.todo.remove(token);
    }

    async fn failed(&self, token: &str) {
        let mut st = self.state.lock().await;
        st.status.insert(token.to_string(), PartitionStatus::Received);
    }

    /// Promote and dispatch every partition that became ready.
    ///
    /// The persistent layer is driven first — `schedule_partitions` promotes
    /// Created rows whose parents finished, and newly Scheduled rows are
    /// folded into `todo` (this is also the crash-recovery path for children
    /// whose parents completed in an earlier process). Then the local scan
    /// dispatches every Received partition whose parents are all Finished.
    async fn notify_ready(&self) -> Result<(), ProcessError> {
        let promoted = self.store.schedule_partitions(&self.feed).await?;
        if promoted > 0 {
            debug!(feed = %self.feed, promoted, "scheduled partitions");
        }
        let scheduled = self
            .store
            .get_partitions_by_state(&self.feed, PartitionState::Scheduled)
            .await?;

        let (tx, ready) = {
            let mut st = self.state.lock().await;
            for (token, watermark) in scheduled {
                st.scheduled.insert(token.clone());
                if !st.status.contains_key(&token) {
                    // Crash recovery: this row was scheduled by an earlier
                    // process and its parents are long gone.
                    st.todo.insert(
                        token.clone(),
                        TodoItem {
                            token: token.clone(),
                            parent_tokens: Vec::new(),
                            start_timestamp: watermark,
                            record_sequence: String::new(),
                        },
                    );
                    st.status.insert(token, PartitionStatus::Received);
                }
            }

            let tokens: Vec<String> = st.todo.keys().cloned().collect();
            let mut ready = Vec::new();
            for token in tokens {
                if st.status.get(&token) != Some(&PartitionStatus::Received) {
                    continue;
                }
                if st.ready(&st.todo[&token]) {
                    st.status.insert(token.clone(), PartitionStatus::Running);
                    ready.push(st.todo[&token].clone());
                }
            }
            (st.tx.clone(), ready)
        };

        if let Some(tx) = tx {
            for item in ready {
                // A closed channel means the dispatch loop is gone (shutdown).
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Running partitions stay in `todo` until finished, so an empty `todo`
    /// means the whole DAG completed. Closing the dispatch channel ends
    /// [`PartitionProcessor::run`].
    async fn maybe_complete(&self) {
        let mut st = self.state.lock().await;
        if st.todo.is_empty() {
            st.tx.take();
        }
    }

    async fn run_partition(
        self: Arc<Self>,
        item: TodoItem,
        cancel: CancellationToken,
    ) -> Result<(), ProcessError> {
        let token = item.token.clone();
        match self.process_partition(&item, &cancel).await {
            Ok(()) => {
                self.store
                    .update_state(&self.feed, &token, PartitionState::Finished)
                    .await?;
                info!(feed = %self.feed, partition = log_token(&token), "partition finished");
                self.finish(&token).await;
                self.notify_ready().await?;
                self.maybe_complete().await;
                Ok(())
            }
            Err(_) if cancel.is_cancelled() => {
                // Outer teardown in progress; not a partition failure.
                trace!(partition = log_token(&token), "partition cancelled");
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(
                    feed = %self.feed,
                    partition = log_token(&token),
                    error = %err,
                    "partition failed, requeueing"
                );
                self.failed(&token).await;
                tokio::time::sleep(self.retry_delay).await;
                self.notify_ready().await?;
                Ok(())
            }
        }
    }

    async fn process_partition(
        &self,
        item: &TodoItem,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let token = item.token.as_str();
        self.store
            .update_state(&self.feed, token, PartitionState::Running)
            .await?;

        let token_param = if token.is_empty() { None } else { Some(token) };
        let mut stream = self
            .source
            .read(&self.feed, token_param, item.start_timestamp, self.heartbeat_interval)
            .await?;

        let mut watermark = item.start_timestamp;
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return Err(StreamError::Cancelled.into()),
                r = stream.next() => r?,
            };
            let Some(record) = record else { break };

            for data in &record.data_change_records {
                (self.on_record)(data.clone())
                    .await
                    .map_err(|e| ProcessError::Callback(e.to_string()))?;
            }

            for children_record in &record.child_partitions_records {
                for child in &children_record.children {
                    self.store
                        .add_child_partition(
                            &self.feed,
                            &child.token,
                            &child.parent_tokens,
                            children_record.start_timestamp,
                        )
                        .await?;
                    self.add_child(
                        child.token.clone(),
                        child.parent_tokens.clone(),
                        children_record.start_timestamp,
                        children_record.record_sequence.clone(),
                    )
                    .await;
                }
            }

            for heartbeat in &record.heartbeat_records {
                trace!(
                    feed = %self.feed,
                    partition = log_token(token),
                    timestamp = %heartbeat.timestamp,
                    "heartbeat"
                );
            }

            if let Some(ts) = record.max_timestamp() {
                if ts > watermark {
                    watermark = ts;
                    self.store.update_watermark(&self.feed, token, ts).await?;
                }
            }
        }
        Ok(())
    }
}

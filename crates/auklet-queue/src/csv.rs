use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use auklet_domain::{InjuredSegment, Position, StreamId};

use crate::error::QueueError;
use crate::queue::{QueueStat, RepairQueue};

const HEADER: [&str; 2] = ["stream-id", "position"];

/// CSV-backed [`RepairQueue`] for one-shot operational repairs.
///
/// Reads a flat file of `stream-id,position` rows; `select` consumes them
/// sequentially and `release` appends to `<input>.success` /
/// `<input>.failed` sibling files. No deduplication and no health ordering;
/// the operator's input file is consumed verbatim. Insert, clean and stat
/// are unsupported.
pub struct CsvQueue {
    pending: Mutex<VecDeque<InjuredSegment>>,
    success: StdMutex<csv::Writer<File>>,
    failed: StdMutex<csv::Writer<File>>,
    /// Rows that could not be parsed, reported instead of aborting the run.
    skipped: usize,
}

impl CsvQueue {
    pub fn open(input: &Path) -> Result<Self, QueueError> {
        let io_err = |source| QueueError::Io {
            path: input.display().to_string(),
            source,
        };

        let mut reader = csv::Reader::from_path(input).map_err(|e| QueueError::Malformed {
            path: input.display().to_string(),
            message: e.to_string(),
        })?;

        let mut pending = VecDeque::new();
        let mut skipped = 0usize;
        let now = Utc::now();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| QueueError::Malformed {
                path: input.display().to_string(),
                message: e.to_string(),
            })?;
            match parse_row(&record, now) {
                Ok(segment) => pending.push_back(segment),
                Err(message) => {
                    warn!(path = %input.display(), line = line + 2, %message, "skipping malformed row");
                    skipped += 1;
                }
            }
        }

        let success = Self::open_output(&sibling(input, "success")).map_err(io_err)?;
        let failed = Self::open_output(&sibling(input, "failed")).map_err(io_err)?;

        Ok(CsvQueue {
            pending: Mutex::new(pending),
            success: StdMutex::new(success),
            failed: StdMutex::new(failed),
            skipped,
        })
    }

    fn open_output(path: &Path) -> Result<csv::Writer<File>, std::io::Error> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(writer)
    }

    /// Rows dropped during parsing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn append(
        writer: &StdMutex<csv::Writer<File>>,
        segment: &InjuredSegment,
    ) -> Result<(), QueueError> {
        let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .write_record([
                segment.stream_id.to_string(),
                segment.position.encode().to_string(),
            ])
            .and_then(|()| guard.flush().map_err(csv::Error::from))
            .map_err(|e| QueueError::Internal(format!("csv append: {e}")))
    }
}

fn sibling(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn parse_row(record: &csv::StringRecord, now: DateTime<Utc>) -> Result<InjuredSegment, String> {
    let stream_field = record.get(0).ok_or("missing stream-id column")?;
    let position_field = record.get(1).ok_or("missing position column")?;

    let stream_id: StreamId = stream_field
        .trim()
        .parse()
        .map_err(|e| format!("bad stream-id: {e}"))?;
    let encoded: u64 = position_field
        .trim()
        .parse()
        .map_err(|e| format!("bad position: {e}"))?;

    Ok(InjuredSegment {
        stream_id,
        position: Position::decode(encoded),
        segment_health: 0.0,
        placement: 0,
        attempted_at: None,
        updated_at: now,
        inserted_at: now,
        num_normalized_healthy: 0,
        num_normalized_retrievable: 0,
        num_out_of_placement: 0,
    })
}

#[async_trait]
impl RepairQueue for CsvQueue {
    async fn insert(&self, _segment: &InjuredSegment) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("insert"))
    }

    async fn insert_batch(
        &self,
        _segments: &[InjuredSegment],
    ) -> Result<Vec<InjuredSegment>, QueueError> {
        Err(QueueError::Unsupported("insert_batch"))
    }

    /// Sequential consumption in file order; placement filters are ignored.
    async fn select(
        &self,
        limit: usize,
        _included_placements: &[u16],
        _excluded_placements: &[u16],
    ) -> Result<Vec<InjuredSegment>, QueueError> {
        let mut pending = self.pending.lock().await;
        let now = Utc::now();
        let take = limit.min(pending.len());
        let mut selected = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(mut segment) = pending.pop_front() {
                segment.attempted_at = Some(now);
                selected.push(segment);
            }
        }
        Ok(selected)
    }

    async fn release(&self, segment: &InjuredSegment, repaired: bool) -> Result<(), QueueError> {
        if repaired {
            Self::append(&self.success, segment)
        } else {
            Self::append(&self.failed, segment)
        }
    }

    async fn clean(&self, _before: DateTime<Utc>) -> Result<u64, QueueError> {
        Err(QueueError::Unsupported("clean"))
    }

    async fn count(&self) -> Result<usize, QueueError> {
        let pending = self.pending.lock().await;
        Ok(pending.len())
    }

    async fn stat(&self) -> Result<Vec<QueueStat>, QueueError> {
        Err(QueueError::Unsupported("stat"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_input(dir: &Path, rows: &[(StreamId, Position)]) -> PathBuf {
        let path = dir.join("segments.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "stream-id,position").unwrap();
        for (stream_id, position) in rows {
            writeln!(file, "{},{}", stream_id, position.encode()).unwrap();
        }
        path
    }

    fn read_ids(path: &Path) -> Vec<String> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().get(0).unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn consumes_rows_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            (StreamId::random(), Position::new(0, 1)),
            (StreamId::random(), Position::new(0, 2)),
            (StreamId::random(), Position::new(1, 0)),
        ];
        let input = write_input(dir.path(), &rows);

        let queue = CsvQueue::open(&input).unwrap();
        assert_eq!(queue.count().await.unwrap(), 3);

        let first = queue.select(2, &[], &[]).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].stream_id, rows[0].0);
        assert_eq!(first[1].stream_id, rows[1].0);

        let rest = queue.select(10, &[], &[]).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(queue.select(10, &[], &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_routes_to_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            (StreamId::random(), Position::new(0, 1)),
            (StreamId::random(), Position::new(0, 2)),
        ];
        let input = write_input(dir.path(), &rows);

        let queue = CsvQueue::open(&input).unwrap();
        let selected = queue.select(2, &[], &[]).await.unwrap();
        queue.release(&selected[0], true).await.unwrap();
        queue.release(&selected[1], false).await.unwrap();

        let successes = read_ids(&sibling(&input, "success"));
        let failures = read_ids(&sibling(&input, "failed"));
        assert_eq!(successes, vec![rows[0].0.to_string()]);
        assert_eq!(failures, vec![rows[1].0.to_string()]);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segments.csv");
        let good = StreamId::random();
        let mut file = File::create(&path).unwrap();
        writeln!(file, "stream-id,position").unwrap();
        writeln!(file, "not-a-uuid,42").unwrap();
        writeln!(file, "{},7", good).unwrap();

        let queue = CsvQueue::open(&path).unwrap();
        assert_eq!(queue.skipped(), 1);
        let selected = queue.select(10, &[], &[]).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].stream_id, good);
    }

    #[tokio::test]
    async fn mutating_operations_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), &[]);
        let queue = CsvQueue::open(&input).unwrap();

        let segment = InjuredSegment {
            stream_id: StreamId::random(),
            position: Position::new(0, 0),
            segment_health: 0.0,
            placement: 0,
            attempted_at: None,
            updated_at: Utc::now(),
            inserted_at: Utc::now(),
            num_normalized_healthy: 0,
            num_normalized_retrievable: 0,
            num_out_of_placement: 0,
        };
        assert!(matches!(
            queue.insert(&segment).await,
            Err(QueueError::Unsupported(_))
        ));
        assert!(matches!(
            queue.clean(Utc::now()).await,
            Err(QueueError::Unsupported(_))
        ));
        assert!(matches!(queue.stat().await, Err(QueueError::Unsupported(_))));
    }
}

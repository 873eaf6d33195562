pub mod error;
pub mod memory;
pub mod partition;
pub mod postgres;
pub mod processor;
pub mod record;
pub mod source;
pub mod store;

pub use error::{PartitionStoreError, ProcessError, StreamError};
pub use memory::MemoryPartitionStore;
pub use partition::{Partition, PartitionState, FINISHED_RETENTION_DAYS, GENESIS_TOKEN};
pub use postgres::PostgresPartitionStore;
pub use processor::{PartitionProcessor, RecordFn, RecordResult, TodoItem};
pub use record::{
    ChangeRecord, ChildPartition, ChildPartitionsRecord, DataChangeRecord, HeartbeatRecord,
    RowMod,
};
pub use source::{ChangeSource, ChangeStream, MemoryChangeSource};
pub use store::PartitionStore;

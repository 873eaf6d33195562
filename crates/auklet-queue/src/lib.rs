pub mod buffer;
pub mod csv;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod queue;

pub use buffer::{InsertBuffer, NewItemCallback};
pub use error::QueueError;
pub use self::csv::CsvQueue;
pub use memory::MemoryQueue;
pub use postgres::PostgresQueue;
pub use queue::{QueueStat, RepairQueue};

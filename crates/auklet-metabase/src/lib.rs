pub mod error;
pub mod memory;
pub mod store;

pub use error::MetabaseError;
pub use memory::MemorySegmentStore;
pub use store::{SegmentStore, UpdateSegmentPieces};

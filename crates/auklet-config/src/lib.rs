mod loader;
pub mod config;
pub mod error;

pub use config::{
    CacheConfig, ChangeStreamConfig, Config, QueueConfig, RepairConfig, StatsConfig,
};
pub use error::ConfigError;
pub use loader::load;

pub mod broker;
mod dispatch;
pub mod error;
pub mod memory;
pub mod redis;

pub use broker::{Consumer, JobHandler, JobOutcome, Publisher};
pub use error::MqError;
pub use memory::{BrokerStats, DEFAULT_DEAD_LETTER_CAPACITY, MemoryBroker};
pub use redis::RedisBroker;

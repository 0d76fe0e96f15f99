//! MuxQ Broker - Connection seam and broker backends
//!
//! The traits here are the capability MuxQ consumes from an underlying
//! broker client: open a channel, declare/delete queues, query depth,
//! create consumers. Currently ships:
//! - In-memory broker (default, for development/testing)

pub mod traits;

#[cfg(feature = "memory")]
pub mod memory;

// Re-exports
pub use traits::{BrokerChannel, BrokerConnection, Consumer, Delivery};

#[cfg(feature = "memory")]
pub use memory::MemoryBroker;

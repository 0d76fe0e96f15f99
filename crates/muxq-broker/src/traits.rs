//! Broker connection trait definitions
//!
//! Defines the interface that all broker backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use muxq_types::Result;
use tokio::sync::mpsc;

/// One payload delivered by a broker-level consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw wire payload, exactly as handed over by the broker
    pub payload: Bytes,
}

/// Connection to a broker - all backends implement this.
///
/// The connection is shared; each channel opened from it is exclusively
/// owned by the operation (or consumer) that opened it.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a new channel (model/session) on this connection
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    /// Close the connection. Idempotent; every consumer becomes invalid and
    /// its delivery stream ends.
    async fn close(&self) -> Result<()>;
}

/// A channel opened on a [`BrokerConnection`]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a queue. Idempotent.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<()>;

    /// Delete a queue. Deleting a missing queue is not an error.
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Number of messages currently waiting on a queue
    async fn message_count(&self, name: &str) -> Result<u64>;

    /// Create a broker-level consumer bound to `queue`.
    ///
    /// Deliveries arrive on the returned receiver in broker order, one at a
    /// time per consumer. Fails with `ChannelNotFound` if the queue was
    /// never declared.
    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>>;
}

/// A broker-level consumer: the channel it was created on plus its delivery
/// stream. Dropping the consumer releases both.
pub struct Consumer {
    channel: Box<dyn BrokerChannel>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Consumer {
    /// Bind a delivery stream to the channel that produced it
    pub fn new(
        channel: Box<dyn BrokerChannel>,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            channel,
            deliveries,
        }
    }

    /// The channel this consumer was created on
    pub fn channel(&self) -> &dyn BrokerChannel {
        self.channel.as_ref()
    }

    /// Receive the next delivery; `None` once the consumer is cancelled or
    /// the connection is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }
}

//! In-memory broker
//!
//! Fast, non-persistent broker backend for development and testing. Queues
//! live in process memory and are lost when the process exits.
//!
//! Delivery semantics follow what a real broker does: payloads published
//! with no consumer attached are buffered until one appears, and multiple
//! broker-level consumers on the same queue split deliveries round-robin,
//! each message going to exactly one of them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use muxq_types::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::traits::{BrokerChannel, BrokerConnection, Delivery};

/// Internal queue data structure
#[derive(Default)]
struct QueueState {
    /// Payloads waiting for a consumer
    buffered: VecDeque<Bytes>,
    /// Attached broker-level consumers
    consumers: Vec<mpsc::UnboundedSender<Delivery>>,
    /// Round-robin cursor over `consumers`
    cursor: usize,
}

/// State shared between the connection and every channel opened on it
struct Shared {
    /// Queues stored by name
    queues: DashMap<String, Arc<Mutex<QueueState>>>,
    closed: AtomicBool,
    opened_channels: AtomicU64,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn queue(&self, name: &str) -> Result<Arc<Mutex<QueueState>>> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| Error::ChannelNotFound(name.to_string()))
    }
}

/// In-memory broker implementation
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create a new in-memory broker
    pub fn new() -> Self {
        info!("Initializing in-memory broker");
        Self {
            shared: Arc::new(Shared {
                queues: DashMap::new(),
                closed: AtomicBool::new(false),
                opened_channels: AtomicU64::new(0),
            }),
        }
    }

    /// Number of channels opened on this connection so far
    pub fn opened_channels(&self) -> u64 {
        self.shared.opened_channels.load(Ordering::Relaxed)
    }

    /// Publish a payload to a queue (the producer side, for tests and
    /// development).
    pub fn publish(&self, queue: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.shared.ensure_open()?;
        let state = self.shared.queue(queue)?;
        let payload = payload.into();

        let mut q = state.lock();
        loop {
            if q.consumers.is_empty() {
                q.buffered.push_back(payload);
                debug!(channel = %queue, "Payload buffered, no consumer attached");
                return Ok(());
            }
            let index = q.cursor % q.consumers.len();
            q.cursor = q.cursor.wrapping_add(1);
            match q.consumers[index].send(Delivery {
                payload: payload.clone(),
            }) {
                Ok(()) => {
                    debug!(channel = %queue, "Payload delivered");
                    return Ok(());
                }
                Err(_) => {
                    // consumer stream dropped, forget it and pick another
                    q.consumers.remove(index);
                }
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnection for MemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        self.shared.ensure_open()?;
        self.shared.opened_channels.fetch_add(1, Ordering::Relaxed);
        debug!("Channel opened");
        Ok(Box::new(MemoryChannel {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping queue state drops every consumer sender, which ends the
        // delivery streams.
        self.shared.queues.clear();
        info!("In-memory broker closed");
        Ok(())
    }
}

/// A channel opened on a [`MemoryBroker`]
struct MemoryChannel {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.queues.entry(name.to_string()).or_insert_with(|| {
            info!(channel = %name, durable, "Queue declared");
            Arc::new(Mutex::new(QueueState::default()))
        });
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.shared.ensure_open()?;
        if self.shared.queues.remove(name).is_some() {
            info!(channel = %name, "Queue deleted");
        }
        Ok(())
    }

    async fn message_count(&self, name: &str) -> Result<u64> {
        self.shared.ensure_open()?;
        let state = self.shared.queue(name)?;
        let count = state.lock().buffered.len() as u64;
        Ok(count)
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>> {
        self.shared.ensure_open()?;
        let state = self.shared.queue(queue)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut q = state.lock();
        while let Some(payload) = q.buffered.pop_front() {
            // receiver is in hand, sends cannot fail here
            let _ = tx.send(Delivery { payload });
        }
        q.consumers.push(tx);
        debug!(channel = %queue, consumers = q.consumers.len(), "Consumer attached");
        Ok(rx)
    }
}

//! Subscription registry and per-channel delivery fan-out
//!
//! Every channel with at least one processor is owned by a single actor
//! task holding the channel's broker-level consumer. Registrations are
//! commands on the actor's mailbox, so consumer creation and processor-set
//! changes are serialized per channel while unrelated channels proceed in
//! parallel. The processor set is an immutable snapshot replaced wholesale
//! on each registration; the actor task itself is the only delivery
//! callback a consumer ever has, so a message can never fan out through two
//! generations of callbacks.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use muxq_broker::{BrokerConnection, Consumer, Delivery};
use muxq_types::{Error, Message, Processor, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const MAILBOX_CAPACITY: usize = 16;

enum Command {
    Register {
        processor: Arc<dyn Processor>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Mailbox of a channel's owning actor
struct ChannelHandle {
    commands: mpsc::Sender<Command>,
}

/// Concurrent map from channel name to the channel's owning actor.
///
/// Entries are created on first registration and live until the channel's
/// delivery stream ends (connection closed, or the queue deleted at the
/// broker), at which point the actor removes its own entry on the way out.
pub struct SubscriptionRegistry {
    connection: Arc<dyn BrokerConnection>,
    channels: Arc<DashMap<String, ChannelHandle>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry over the given connection
    pub fn new(connection: Arc<dyn BrokerConnection>) -> Self {
        Self {
            connection,
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Register a processor on a channel.
    ///
    /// The first registration for a channel creates its broker-level
    /// consumer; later ones reuse it and extend the processor set.
    /// Registering an `Arc` that is already present is a no-op.
    pub async fn register(&self, channel: &str, processor: Arc<dyn Processor>) -> Result<()> {
        let commands = self.mailbox_for(channel);
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(Command::Register {
                processor,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        reply_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Get the mailbox for a channel, spawning its actor on first use.
    ///
    /// Goes through the map's entry API so two racing registrations for the
    /// same channel can never both spawn an actor, while registrations for
    /// different channels share no lock beyond the sharded map.
    fn mailbox_for(&self, channel: &str) -> mpsc::Sender<Command> {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(entry) => entry.get().commands.clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
                let actor = ChannelActor {
                    channel: channel.to_string(),
                    connection: Arc::clone(&self.connection),
                    registry: Arc::clone(&self.channels),
                    handle: tx.clone(),
                    mailbox: rx,
                    consumer: None,
                    processors: Vec::new().into(),
                };
                entry.insert(ChannelHandle {
                    commands: tx.clone(),
                });
                debug!(channel = %channel, "Channel actor spawned");
                tokio::spawn(actor.run());
                tx
            }
        }
    }
}

enum Wake {
    Command(Option<Command>),
    Delivery(Option<Delivery>),
}

/// Exclusive owner of one channel's consumption state
struct ChannelActor {
    channel: String,
    connection: Arc<dyn BrokerConnection>,
    registry: Arc<DashMap<String, ChannelHandle>>,
    /// Own mailbox sender, kept to recognize our registry entry on retire
    handle: mpsc::Sender<Command>,
    mailbox: mpsc::Receiver<Command>,
    /// Broker-level consumer, created by the first successful registration
    consumer: Option<Consumer>,
    /// Immutable snapshot of the processors fanned out to
    processors: Arc<[Arc<dyn Processor>]>,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            let wake = match self.consumer.as_mut() {
                Some(consumer) => tokio::select! {
                    command = self.mailbox.recv() => Wake::Command(command),
                    delivery = consumer.recv() => Wake::Delivery(delivery),
                },
                None => Wake::Command(self.mailbox.recv().await),
            };

            match wake {
                Wake::Command(Some(command)) => self.handle(command).await,
                // registry gone, the messenger was dropped
                Wake::Command(None) => break,
                Wake::Delivery(Some(delivery)) => self.dispatch(delivery).await,
                Wake::Delivery(None) => {
                    warn!(channel = %self.channel, "Delivery stream ended, shutting down channel");
                    break;
                }
            }
        }
        self.retire();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { processor, reply } => {
                let result = self.register(processor).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Apply one registration: create the consumer if this is the first,
    /// then swap in a snapshot extended with the processor.
    ///
    /// On failure nothing is committed - no consumer is retained and the
    /// snapshot is untouched, so a later registration can succeed cleanly.
    async fn register(&mut self, processor: Arc<dyn Processor>) -> Result<()> {
        if self.consumer.is_none() {
            let channel = self.connection.open_channel().await?;
            let deliveries = channel.consume(&self.channel).await?;
            self.consumer = Some(Consumer::new(channel, deliveries));
            debug!(channel = %self.channel, "Consumer created");
        }

        if self
            .processors
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &processor))
        {
            debug!(channel = %self.channel, "Processor already registered");
            return Ok(());
        }

        let mut next: Vec<Arc<dyn Processor>> = self.processors.to_vec();
        next.push(processor);
        self.processors = next.into();
        debug!(
            channel = %self.channel,
            processors = self.processors.len(),
            "Processor registered"
        );
        Ok(())
    }

    /// Fan one delivery out to every processor in the current snapshot,
    /// sequentially, as a single-message batch.
    ///
    /// A failing processor is logged and skipped so it cannot starve its
    /// siblings of the delivery.
    async fn dispatch(&self, delivery: Delivery) {
        let batch = [Message::from_wire(delivery.payload)];
        for processor in self.processors.iter() {
            if let Err(error) = processor.process_messages(&batch).await {
                warn!(channel = %self.channel, %error, "Processor failed, continuing fan-out");
            }
        }
    }

    /// Drop our registry entry, unless a newer actor already replaced it
    fn retire(&self) {
        self.registry
            .remove_if(&self.channel, |_, entry| {
                entry.commands.same_channel(&self.handle)
            });
    }
}

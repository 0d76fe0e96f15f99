//! Messenger - public facade over a broker connection
//!
//! Exposes processor registration with per-channel fan-out, channel
//! lifecycle passthrough, and fail-fast stubs for the operations this
//! broker model cannot express.

use std::sync::Arc;

use muxq_broker::BrokerConnection;
use muxq_types::{Error, Message, Processor, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::subscription::SubscriptionRegistry;

/// Messaging facade over a [`BrokerConnection`]
pub struct Messenger {
    connection: Arc<dyn BrokerConnection>,
    registry: SubscriptionRegistry,
}

impl Messenger {
    /// Create a new messenger over the given connection
    pub fn new(connection: impl BrokerConnection + 'static) -> Self {
        Self::with_connection(Arc::new(connection))
    }

    /// Create a new messenger over an Arc connection
    pub fn with_connection(connection: Arc<dyn BrokerConnection>) -> Self {
        info!("Initializing messenger");
        Self {
            registry: SubscriptionRegistry::new(Arc::clone(&connection)),
            connection,
        }
    }

    // ==================== Processor Registration ====================

    /// Start `processor` on `channel_name`.
    ///
    /// The first registration for a channel creates its broker-level
    /// consumer; later registrations reuse it, so every processor ever
    /// registered on the channel receives each subsequent delivery exactly
    /// once, as a single-message batch. Registering the same `Arc` again is
    /// a no-op.
    ///
    /// Fails with [`Error::InvalidArgument`] on an empty channel name
    /// before any broker interaction, and with [`Error::ChannelNotFound`]
    /// if the channel was never declared.
    pub async fn start_message_processor(
        &self,
        channel_name: &str,
        processor: Arc<dyn Processor>,
    ) -> Result<()> {
        if channel_name.trim().is_empty() {
            return Err(Error::InvalidArgument("channel_name must not be empty"));
        }
        self.registry.register(channel_name, processor).await
    }

    // ==================== Channel Lifecycle ====================

    /// Declare a single channel as a durable queue. Idempotent.
    pub async fn create_channel(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.create_channels([name], cancel).await
    }

    /// Declare every named channel as a durable queue. Idempotent, and safe
    /// to call while the channels are being consumed.
    pub async fn create_channels<I, S>(&self, names: I, cancel: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let channel = self.connection.open_channel().await?;
        for name in names {
            channel.declare_queue(name.as_ref(), true).await?;
        }
        Ok(())
    }

    /// Delete the named channels. Deleting a missing channel is silent;
    /// deleting a channel with an active consumer is not guarded.
    pub async fn delete_channels<I, S>(&self, names: I, cancel: &CancellationToken) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let channel = self.connection.open_channel().await?;
        for name in names {
            channel.delete_queue(name.as_ref()).await?;
        }
        Ok(())
    }

    /// Number of messages currently waiting on a channel
    pub async fn message_count(&self, name: &str) -> Result<u64> {
        let channel = self.connection.open_channel().await?;
        channel.message_count(name).await
    }

    // ==================== Unsupported Operations ====================
    // Part of the messaging surface, but the broker model behind this
    // messenger cannot express them. They fail fast instead of silently
    // returning defaults.

    /// Sending through the messenger is not supported; publish through the
    /// broker's producer surface instead.
    pub async fn send(&self, _channel_name: &str, _messages: &[Message]) -> Result<()> {
        Err(Error::NotSupported(
            "sending messages through the messenger is not supported",
        ))
    }

    /// Pull-style receive is not supported; register a processor instead.
    pub async fn receive(&self, _channel_name: &str, _count: usize) -> Result<Vec<Message>> {
        Err(Error::NotSupported(
            "receiving messages on demand is not supported, register a processor instead",
        ))
    }

    /// Peeking messages without consuming them is not supported.
    pub async fn peek(&self, _channel_name: &str, _count: usize) -> Result<Vec<Message>> {
        Err(Error::NotSupported("peeking messages is not supported"))
    }

    /// Deleting individual messages from a channel is not supported.
    pub async fn delete_messages(&self, _channel_name: &str, _messages: &[Message]) -> Result<()> {
        Err(Error::NotSupported(
            "deleting messages from a channel is not supported",
        ))
    }

    /// Listing channels is not supported.
    pub async fn list_channels(&self) -> Result<Vec<String>> {
        Err(Error::NotSupported("listing channels is not supported"))
    }

    // ==================== Disposal ====================

    /// Close the underlying broker connection. Idempotent.
    ///
    /// Every consumer is invalidated and later registrations fail with
    /// [`Error::ConnectionClosed`]. Channel actors shut down as their
    /// delivery streams end; dropping the messenger without closing leaves
    /// them parked until the runtime itself shuts down.
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muxq_broker::MemoryBroker;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct CollectingProcessor {
        batches: Mutex<Vec<Vec<Message>>>,
    }

    impl CollectingProcessor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().len()
        }

        fn bodies(&self) -> Vec<String> {
            self.batches
                .lock()
                .iter()
                .flatten()
                .map(|m| m.body_as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Processor for CollectingProcessor {
        async fn process_messages(&self, messages: &[Message]) -> Result<()> {
            self.batches.lock().push(messages.to_vec());
            Ok(())
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl Processor for FailingProcessor {
        async fn process_messages(&self, _messages: &[Message]) -> Result<()> {
            Err(Error::Processor("intentional failure".to_string()))
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("muxq=debug")
            .with_test_writer()
            .try_init();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    fn create_test_messenger() -> (Arc<MemoryBroker>, Messenger) {
        init_tracing();
        let broker = Arc::new(MemoryBroker::new());
        let messenger = Messenger::with_connection(broker.clone() as Arc<dyn BrokerConnection>);
        (broker, messenger)
    }

    #[tokio::test]
    async fn test_single_processor_receives_sent_message() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        let processor = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", processor.clone())
            .await
            .unwrap();

        broker.publish("orders", "m1").unwrap();

        {
            let processor = Arc::clone(&processor);
            wait_until(move || processor.batch_count() == 1).await;
        }
        assert_eq!(processor.bodies(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_every_processor_receives_the_message_exactly_once() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        let processors = [
            CollectingProcessor::new(),
            CollectingProcessor::new(),
            CollectingProcessor::new(),
        ];
        for processor in &processors {
            messenger
                .start_message_processor("orders", processor.clone())
                .await
                .unwrap();
        }

        broker.publish("orders", "m1").unwrap();

        for processor in &processors {
            {
                let processor = Arc::clone(processor);
                wait_until(move || processor.batch_count() == 1).await;
            }
            assert_eq!(processor.bodies(), vec!["m1"]);
        }

        // no late duplicate deliveries
        tokio::time::sleep(Duration::from_millis(50)).await;
        for processor in &processors {
            assert_eq!(processor.batch_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_re_registration_keeps_earlier_processors() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        let first = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", first.clone())
            .await
            .unwrap();
        broker.publish("orders", "m1").unwrap();
        {
            let first = Arc::clone(&first);
            wait_until(move || first.batch_count() == 1).await;
        }

        let second = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", second.clone())
            .await
            .unwrap();
        broker.publish("orders", "m2").unwrap();

        {
            let first = Arc::clone(&first);
            wait_until(move || first.batch_count() == 2).await;
        }
        {
            let second = Arc::clone(&second);
            wait_until(move || second.batch_count() == 1).await;
        }

        // two separate single-message batches for the first processor
        assert_eq!(first.bodies(), vec!["m1", "m2"]);
        assert_eq!(second.bodies(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger
            .create_channels(["orders", "billing"], &cancel)
            .await
            .unwrap();

        let orders = CollectingProcessor::new();
        let billing = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", orders.clone())
            .await
            .unwrap();
        messenger
            .start_message_processor("billing", billing.clone())
            .await
            .unwrap();

        broker.publish("orders", "m1").unwrap();

        {
            let orders = Arc::clone(&orders);
            wait_until(move || orders.batch_count() == 1).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(billing.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_channel_name_fails_before_broker_io() {
        let (broker, messenger) = create_test_messenger();

        for name in ["", "   "] {
            let err = messenger
                .start_message_processor(name, CollectingProcessor::new())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }

        assert_eq!(broker.opened_channels(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_channel_is_rejected() {
        let (_broker, messenger) = create_test_messenger();

        let err = messenger
            .start_message_processor("nowhere", CollectingProcessor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn test_unsupported_operations_fail_fast() {
        let (_broker, messenger) = create_test_messenger();

        assert!(matches!(
            messenger.send("orders", &[]).await.unwrap_err(),
            Error::NotSupported(_)
        ));
        assert!(matches!(
            messenger.receive("orders", 10).await.unwrap_err(),
            Error::NotSupported(_)
        ));
        assert!(matches!(
            messenger.peek("orders", 10).await.unwrap_err(),
            Error::NotSupported(_)
        ));
        assert!(matches!(
            messenger.delete_messages("orders", &[]).await.unwrap_err(),
            Error::NotSupported(_)
        ));
        assert!(matches!(
            messenger.list_channels().await.unwrap_err(),
            Error::NotSupported(_)
        ));
    }

    #[tokio::test]
    async fn test_message_count() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        broker.publish("orders", "m1").unwrap();
        broker.publish("orders", "m2").unwrap();
        assert_eq!(messenger.message_count("orders").await.unwrap(), 2);

        let err = messenger.message_count("missing").await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_broker_call() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = messenger
            .create_channels(["orders"], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let err = messenger
            .delete_channels(["orders"], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        assert_eq!(broker.opened_channels(), 0);
    }

    #[tokio::test]
    async fn test_failing_processor_does_not_block_siblings() {
        let (broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        messenger
            .start_message_processor("orders", Arc::new(FailingProcessor))
            .await
            .unwrap();
        let sibling = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", sibling.clone())
            .await
            .unwrap();

        broker.publish("orders", "m1").unwrap();

        {
            let sibling = Arc::clone(&sibling);
            wait_until(move || sibling.batch_count() == 1).await;
        }
        assert_eq!(sibling.bodies(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_later_registrations() {
        let (_broker, messenger) = create_test_messenger();
        let cancel = CancellationToken::new();
        messenger.create_channel("orders", &cancel).await.unwrap();

        let processor = CollectingProcessor::new();
        messenger
            .start_message_processor("orders", processor.clone())
            .await
            .unwrap();

        messenger.close().await.unwrap();
        messenger.close().await.unwrap();

        // a channel that never had an actor fails straight away
        let err = messenger
            .start_message_processor("elsewhere", CollectingProcessor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));

        // the existing channel's actor notices its stream ended and every
        // later registration fails too, rather than hanging
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let attempt = messenger
                    .start_message_processor("orders", processor.clone())
                    .await;
                if attempt.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registrations kept succeeding after close");

        // lifecycle passthrough fails as well
        let err = messenger.create_channel("orders", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}

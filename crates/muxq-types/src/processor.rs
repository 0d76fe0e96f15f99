//! Processor contract
//!
//! A processor is a consumer-side callback that handles delivered message
//! batches for one channel.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Consumer-side handler for delivered message batches.
///
/// Implementations are registered per channel as `Arc<dyn Processor>`, and
/// registry membership is by `Arc` identity: registering the same instance
/// twice does not duplicate delivery.
///
/// Batches are ordered and non-empty. The current delivery path always
/// passes a single-message batch, but the contract stays batch-shaped so a
/// broker with native batch delivery can be plugged in without changing
/// implementations.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Consume an ordered batch of messages.
    async fn process_messages(&self, messages: &[Message]) -> Result<()>;
}

//! Inventory-changed notifications.
//!
//! Publishing is best effort: the engine publishes only after a transaction
//! commits and logs any failure instead of surfacing it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::InventoryUpdate;

/// Errors raised by a publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload could not be encoded.
    #[error("Failed to encode inventory update: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport rejected the message.
    #[error("Failed to deliver inventory update: {0}")]
    Transport(String),
}

/// Sink for inventory-changed notifications.
#[async_trait]
pub trait InventoryPublisher: Send + Sync {
    /// Publishes one update on its product channel.
    async fn publish(&self, update: &InventoryUpdate) -> Result<(), PublishError>;
}

/// In-process publisher backed by a `tokio::sync::broadcast` channel.
///
/// Every subscriber sees every product; filter on `product_id` or
/// [`InventoryUpdate::channel`] to follow one product.
#[derive(Clone)]
pub struct BroadcastInventoryPublisher {
    sender: broadcast::Sender<InventoryUpdate>,
}

impl BroadcastInventoryPublisher {
    /// Creates a publisher buffering up to `capacity` updates per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all future updates.
    pub fn subscribe(&self) -> broadcast::Receiver<InventoryUpdate> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastInventoryPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl InventoryPublisher for BroadcastInventoryPublisher {
    async fn publish(&self, update: &InventoryUpdate) -> Result<(), PublishError> {
        // No subscribers is not a failure.
        let _ = self.sender.send(update.clone());
        Ok(())
    }
}

/// Publisher that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInventoryPublisher;

#[async_trait]
impl InventoryPublisher for NoopInventoryPublisher {
    async fn publish(&self, _update: &InventoryUpdate) -> Result<(), PublishError> {
        Ok(())
    }
}

#[async_trait]
impl<P: InventoryPublisher + ?Sized> InventoryPublisher for std::sync::Arc<P> {
    async fn publish(&self, update: &InventoryUpdate) -> Result<(), PublishError> {
        (**self).publish(update).await
    }
}

//! Characteristic push notifications.
//!
//! Whenever the engine learns a new value for a characteristic it pushes a
//! [`CharacteristicEvent`] into a [`CharacteristicSink`]. The service fans
//! these out to WebSocket clients through an [`EventDispatcher`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use sesame_types::Characteristic;

/// An updated characteristic value for one lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicEvent {
    /// Remote device identifier.
    pub device_id: String,
    /// The characteristic that changed.
    pub characteristic: Characteristic,
    /// The new value.
    pub value: u32,
}

impl CharacteristicEvent {
    /// Create a new event.
    pub fn new(device_id: impl Into<String>, characteristic: Characteristic, value: u32) -> Self {
        Self {
            device_id: device_id.into(),
            characteristic,
            value,
        }
    }
}

/// Receiver of characteristic pushes.
pub trait CharacteristicSink: Send + Sync {
    /// Publish an updated value.
    fn push(&self, event: CharacteristicEvent);
}

/// Sender for characteristic events.
pub type EventSender = broadcast::Sender<CharacteristicEvent>;

/// Receiver for characteristic events.
pub type EventReceiver = broadcast::Receiver<CharacteristicEvent>;

/// Broadcasts characteristic events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Wrap an existing sender.
    pub fn from_sender(sender: EventSender) -> Self {
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the sender for direct use.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CharacteristicSink for EventDispatcher {
    fn push(&self, event: CharacteristicEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }
}

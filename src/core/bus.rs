//! Typed publish/subscribe channels shared by otherwise unrelated consumers.
//!
//! The bus is constructed once and handed to each consumer; cloning shares
//! the same channels.

use tokio::sync::{broadcast, watch};

use crate::core::message::ChatMessage;

const CHAT_BROADCAST_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct NotificationBus {
    history_complete: watch::Sender<bool>,
    chat: broadcast::Sender<ChatMessage>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (history_complete, _) = watch::channel(false);
        let (chat, _) = broadcast::channel(CHAT_BROADCAST_CAPACITY);
        Self {
            history_complete,
            chat,
        }
    }

    /// Latest-value cell: a new subscriber sees the current value at once.
    pub fn subscribe_history_complete(&self) -> watch::Receiver<bool> {
        self.history_complete.subscribe()
    }

    pub fn history_complete(&self) -> bool {
        *self.history_complete.borrow()
    }

    /// Stores the value even when nobody is subscribed.
    pub fn set_history_complete(&self, done: bool) {
        self.history_complete.send_if_modified(|current| {
            let changed = *current != done;
            *current = done;
            changed
        });
    }

    /// Event stream of injected messages. Subscribers only observe messages
    /// published after they attach.
    pub fn subscribe_chat(&self) -> broadcast::Receiver<ChatMessage> {
        self.chat.subscribe()
    }

    /// Publishing with zero subscribers is a no-op.
    pub fn publish_chat(&self, message: ChatMessage) {
        let _ = self.chat.send(message);
    }

    pub fn chat_subscriber_count(&self) -> usize {
        self.chat.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Observability events.
//!
//! Every broker owns one `EventBus`. Observers call `Broker::events()` to get
//! a receiver; emitting with no observers is a no-op.

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::frame::Headers;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A transport connection was opened; no CONNECT seen yet.
    Connecting { session_id: String },
    Connected { session_id: String, headers: Headers },
    Disconnected { session_id: String },
    Subscribed {
        session_id: String,
        subscription_id: String,
        destination: String,
    },
    Unsubscribed {
        session_id: String,
        subscription_id: String,
        destination: String,
    },
    /// A message was accepted for fan-out.
    Sent {
        session_id: String,
        destination: String,
        headers: Headers,
        body: Bytes,
    },
    Error {
        session_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: BrokerEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

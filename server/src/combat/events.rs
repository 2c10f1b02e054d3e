//! Outbound combat events.

use log::warn;
use tokio::sync::mpsc;

use idle_shared::ServerMessage;

use super::ConnectionId;

/// Delivers a message to one connection. Must not block.
pub trait EventSink: Send + Sync {
    fn send(&self, connection: ConnectionId, message: ServerMessage);
}

/// Pushes events into the network layer's outgoing queue
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<(ConnectionId, ServerMessage)>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(ConnectionId, ServerMessage)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, connection: ConnectionId, message: ServerMessage) {
        if self.sender.send((connection, message)).is_err() {
            warn!("Dropping event for connection {}: network layer is gone", connection);
        }
    }
}

/// Keeps every event in memory, in send order
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<(ConnectionId, ServerMessage)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<(ConnectionId, ServerMessage)> {
        self.events.lock().clone()
    }

    pub fn messages_for(&self, connection: ConnectionId) -> Vec<ServerMessage> {
        self.events
            .lock()
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn send(&self, connection: ConnectionId, message: ServerMessage) {
        self.events.lock().push((connection, message));
    }
}

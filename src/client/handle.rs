use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::frame::Frame;

/// Items written to a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized frame.
    Frame(Bytes),
    /// A heart-beat (a single EOL).
    Ping,
    /// Close the connection after everything queued before it.
    Close,
}

/// Cloneable write handle for one connection.
///
/// Writes never block; the transport buffers. A write to a connection whose
/// transport has gone away returns `false`.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    sender: UnboundedSender<Outbound>,
}

impl ClientHandle {
    pub fn new(sender: UnboundedSender<Outbound>) -> Self {
        Self { sender }
    }

    /// Convenience for transports and tests: a handle plus its receiving end.
    pub fn channel() -> (Self, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_bytes(frame.to_bytes())
    }

    pub fn send_bytes(&self, bytes: Bytes) -> bool {
        self.sender.send(Outbound::Frame(bytes)).is_ok()
    }

    pub fn ping(&self) -> bool {
        self.sender.send(Outbound::Ping).is_ok()
    }

    pub fn close(&self) -> bool {
        self.sender.send(Outbound::Close).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

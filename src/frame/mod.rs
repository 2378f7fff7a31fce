//! The `frame` module defines the STOMP protocol unit and its codec.
//!
//! - `Command`: the fixed set of STOMP commands.
//! - `Headers`: ordered, unique-key header map.
//! - `Frame`: command + headers + raw body, with builders for the frames the
//!   server emits (CONNECTED, MESSAGE, RECEIPT, ERROR).
//! - `Body`: typed payload used by local publishers and subscribers.
//! - `codec`: `parse` / `serialize`.

pub mod body;
pub mod codec;
pub mod command;
pub mod headers;
mod server;

pub use body::Body;
pub use command::Command;
pub use headers::Headers;

use bytes::Bytes;

use crate::utils::error::FrameError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn parse(data: &[u8]) -> Result<Frame, FrameError> {
        codec::parse(data)
    }

    pub fn to_bytes(&self) -> Bytes {
        codec::serialize(self)
    }
}

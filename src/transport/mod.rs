//! The `transport` module is responsible for handling network communication
//! with clients via WebSockets.
//!
//! It accepts connections on the configured path, opens a broker `Session`
//! per connection, feeds inbound payloads to it and drains the session's
//! `ClientHandle` channel back onto the socket.

pub mod websocket;

pub use websocket::{serve, start_websocket_server};

#[cfg(test)]
mod tests;

//! The `client` module defines the broker's handle on a connected client.
//!
//! A `ClientHandle` is the write side of a per-connection channel. The
//! session, the fan-out path and the heartbeat monitor all push `Outbound`
//! items into it; the transport drains the channel and writes to the socket.

pub mod handle;
pub use handle::{ClientHandle, Outbound};

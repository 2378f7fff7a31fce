//! The `session` module holds per-connection protocol state.
//!
//! A `Session` is created by `Broker::open_session` when the transport
//! accepts a connection, is fed every inbound payload through
//! `Session::handle_data`, and is torn down by `Session::close` (or by a
//! DISCONNECT frame). Heart-beat timers live in `heartbeat`.

pub mod dispatcher;
pub mod heartbeat;
pub mod state;

pub use dispatcher::Session;
pub use heartbeat::{Activity, HeartbeatMonitor, NegotiatedHeartbeat, parse_heart_beat};
pub use state::ConnectionState;

#[cfg(test)]
mod tests;

//! # stomp-broker
//!
//! `stomp_broker` is an in-memory STOMP message broker served over
//! WebSockets. Clients connect, subscribe to hierarchical destinations
//! (with `*` / `**` wildcards) and send messages that fan out to every
//! matching subscriber. Embedding code can publish and subscribe in-process
//! through the same `Broker`.
//!
//! ## Core Modules
//!
//! - `frame`: the STOMP frame type, headers, bodies and the wire codec.
//! - `broker`: destination matching, the subscription registry and fan-out.
//! - `session`: per-connection state machine and heart-beating.
//! - `client`: the write handle a session uses to reach its connection.
//! - `config`: configuration loading (file + `STOMP__*` environment).
//! - `transport`: the WebSocket server.
//! - `utils`: errors, ids and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod frame;
pub mod session;
pub mod transport;
pub mod utils;

pub use broker::{Broker, BrokerEvent, BrokerHooks};
pub use config::{Settings, load_config};
pub use frame::{Body, Command, Frame, Headers};
pub use utils::error::{BrokerError, Result};

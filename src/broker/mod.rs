//! The `broker` module is the routing core.
//!
//! - `topic`: destination tokenizing and wildcard matching.
//! - `registry`: the live set of subscriptions and their delivery targets.
//! - `engine`: the `Broker` façade used by sessions and embedding code.
//! - `events` / `hooks`: observability and application accept hooks.

pub mod engine;
pub mod events;
pub mod hooks;
pub mod registry;
pub mod topic;

pub use engine::Broker;
pub use events::{BrokerEvent, EventBus};
pub use hooks::{AcceptAll, BrokerHooks, ConnectRequest};
pub use registry::{
    DeliveryTarget, LOCAL_SESSION_ID, LocalCallback, Registry, SessionId, Subscription,
    SubscriptionId,
};

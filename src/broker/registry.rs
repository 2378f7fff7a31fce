//! Subscription registry
//!
//! The live set of subscriptions for one broker, kept in registration order.
//! The registry itself is not synchronized: the broker keeps it behind a
//! single mutex so mutations and fan-out lookups never interleave.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::broker::events::{BrokerEvent, EventBus};
use crate::broker::topic::{matches, tokenize};
use crate::client::ClientHandle;
use crate::frame::{Body, Headers};
use crate::utils::error::ProtocolError;

pub type SessionId = String;
pub type SubscriptionId = String;

/// Session id shared by every subscription made through the broker's
/// programmatic API.
pub const LOCAL_SESSION_ID: &str = "local";

/// In-process subscriber callback: receives the message body and headers.
pub type LocalCallback = Arc<dyn Fn(&Body, &Headers) + Send + Sync>;

/// Where matching messages go.
#[derive(Clone)]
pub enum DeliveryTarget {
    /// A connected client; messages are serialized and written.
    Remote(ClientHandle),
    /// An in-process callback; invoked directly.
    Local(LocalCallback),
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryTarget::Remote(client) => f.debug_tuple("Remote").field(client).finish(),
            DeliveryTarget::Local(_) => f.write_str("Local(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub session_id: SessionId,
    pub destination: String,
    pub tokens: Vec<String>,
    pub target: DeliveryTarget,
}

impl Subscription {
    pub fn new(
        id: impl Into<SubscriptionId>,
        session_id: impl Into<SessionId>,
        destination: &str,
        target: DeliveryTarget,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            destination: destination.to_string(),
            tokens: tokenize(destination),
            target,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    subscriptions: Vec<Subscription>,
    keys: HashSet<(SessionId, SubscriptionId)>,
    events: EventBus,
}

impl Registry {
    pub fn new(events: EventBus) -> Self {
        Self {
            subscriptions: Vec::new(),
            keys: HashSet::new(),
            events,
        }
    }

    /// Register a subscription. Ids only have to be unique within a session.
    pub fn add(&mut self, subscription: Subscription) -> Result<(), ProtocolError> {
        let key = (subscription.session_id.clone(), subscription.id.clone());
        if !self.keys.insert(key) {
            return Err(ProtocolError::DuplicateSubscription(subscription.id));
        }
        debug!(
            "{} subscribed to {} as {}",
            subscription.session_id, subscription.destination, subscription.id
        );
        self.events.emit(BrokerEvent::Subscribed {
            session_id: subscription.session_id.clone(),
            subscription_id: subscription.id.clone(),
            destination: subscription.destination.clone(),
        });
        self.subscriptions.push(subscription);
        Ok(())
    }

    /// Remove a session's subscription. `None` when there is nothing to
    /// remove; racing unsubscribes are expected and not an error.
    pub fn remove(&mut self, session_id: &str, subscription_id: &str) -> Option<Subscription> {
        let idx = self
            .subscriptions
            .iter()
            .position(|s| s.session_id == session_id && s.id == subscription_id)?;
        let removed = self.subscriptions.remove(idx);
        self.forget(&removed);
        Some(removed)
    }

    /// Drop every subscription owned by a session; returns how many went.
    pub fn remove_all_for_session(&mut self, session_id: &str) -> usize {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|s| s.session_id == session_id);
        self.subscriptions = kept;
        for subscription in &removed {
            self.forget(subscription);
        }
        removed.len()
    }

    /// Subscriptions matching `destination`, in registration order, skipping
    /// those owned by `exclude_session`.
    pub fn matching_for<'a>(
        &'a self,
        destination: &'a str,
        exclude_session: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Subscription> + 'a {
        let tokens = tokenize(destination);
        self.subscriptions.iter().filter(move |s| {
            exclude_session != Some(s.session_id.as_str()) && matches(&s.tokens, &tokens)
        })
    }

    pub fn get(&self, session_id: &str, subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.session_id == session_id && s.id == subscription_id)
    }

    pub fn count_for_session(&self, session_id: &str) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| s.session_id == session_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn forget(&mut self, subscription: &Subscription) {
        self.keys
            .remove(&(subscription.session_id.clone(), subscription.id.clone()));
        debug!(
            "{} unsubscribed {} from {}",
            subscription.session_id, subscription.id, subscription.destination
        );
        self.events.emit(BrokerEvent::Unsubscribed {
            session_id: subscription.session_id.clone(),
            subscription_id: subscription.id.clone(),
            destination: subscription.destination.clone(),
        });
    }
}

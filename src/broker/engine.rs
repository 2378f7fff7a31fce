//! Broker engine
//!
//! `Broker` owns the subscription registry, the event bus and the
//! application hooks. It is the single fan-out implementation: SEND frames
//! from sessions and `Broker::send` from embedding code both end up in
//! `Broker::publish`.
//!
//! Concurrency and usage notes:
//! - `Broker` is a cheap handle (`Arc` inside); clone it into every
//!   connection task.
//! - The registry sits behind one mutex. Publishing snapshots the matching
//!   targets under the lock and delivers after releasing it, so local
//!   callbacks may call back into the broker (for example to unsubscribe).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::broker::events::{BrokerEvent, EventBus};
use crate::broker::hooks::{AcceptAll, BrokerHooks};
use crate::broker::registry::{
    DeliveryTarget, LOCAL_SESSION_ID, Registry, Subscription, SubscriptionId,
};
use crate::client::ClientHandle;
use crate::config::BrokerSettings;
use crate::frame::body::{JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE};
use crate::frame::{Body, Command, Frame, Headers};
use crate::session::Session;
use crate::utils::error::{BrokerError, ProtocolError, Result};
use crate::utils::id::{IdKind, new_id};

/// Headers of a SEND frame that never make it onto the MESSAGE.
const DROPPED_SEND_HEADERS: [&str; 3] = ["receipt", "transaction", "subscription"];

struct Inner {
    settings: BrokerSettings,
    registry: Mutex<Registry>,
    events: EventBus,
    hooks: Arc<dyn BrokerHooks>,
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("settings", &self.inner.settings)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    /// Creates a broker with the given settings that accepts every
    /// connection, subscription and message.
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_hooks(settings, Arc::new(AcceptAll))
    }

    /// Creates a broker whose connect, subscribe and send decisions are
    /// delegated to `hooks`.
    pub fn with_hooks(settings: BrokerSettings, hooks: Arc<dyn BrokerHooks>) -> Self {
        let events = EventBus::default();
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: Mutex::new(Registry::new(events.clone())),
                events,
                hooks,
            }),
        }
    }

    /// Settings the broker was created with; sessions read the heart-beat
    /// configuration and server name from here.
    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    /// The application hooks consulted before accepting anything.
    pub fn hooks(&self) -> &dyn BrokerHooks {
        self.inner.hooks.as_ref()
    }

    /// Receive every `BrokerEvent` emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    pub(crate) fn emit(&self, event: BrokerEvent) {
        self.inner.events.emit(event);
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // a panicking callback must not take the whole broker down
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session for a freshly opened transport connection.
    pub fn open_session(&self, client: ClientHandle) -> Session {
        Session::new(self.clone(), client)
    }

    /// Subscribe an in-process callback. Returns the subscription id, taken
    /// from `headers["id"]` when given.
    pub fn subscribe<F>(
        &self,
        destination: &str,
        callback: F,
        headers: Option<&Headers>,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&Body, &Headers) + Send + Sync + 'static,
    {
        let empty = Headers::new();
        check_encodable(destination, headers.unwrap_or(&empty))?;
        self.add_subscription(
            LOCAL_SESSION_ID,
            destination,
            headers.unwrap_or(&empty),
            DeliveryTarget::Local(Arc::new(callback)),
        )
    }

    /// Removes an in-process subscription by id.
    /// Returns `false` when no such subscription exists, which is the case
    /// after a second unsubscribe of the same id.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.remove_subscription(LOCAL_SESSION_ID, id)
    }

    /// Publish from embedding code. Local subscribers receive `body` as is.
    pub fn send(&self, destination: &str, headers: Headers, body: impl Into<Body>) -> Result<()> {
        check_encodable(destination, &headers)?;
        let body = body.into();
        let mut headers = headers;
        if matches!(body, Body::Json(_)) && !headers.contains("content-type") {
            headers.insert("content-type", JSON_CONTENT_TYPE);
        }
        let payload = body.encode(headers.get("content-type"))?;
        self.publish(LOCAL_SESSION_ID, destination, &headers, payload, Some(body))?;
        Ok(())
    }

    /// Number of live subscriptions across every session, the local one
    /// included.
    pub fn subscription_count(&self) -> usize {
        self.registry().len()
    }

    /// Number of live subscriptions owned by one session.
    pub fn session_subscription_count(&self, session_id: &str) -> usize {
        self.registry().count_for_session(session_id)
    }

    pub(crate) fn add_subscription(
        &self,
        session_id: &str,
        destination: &str,
        headers: &Headers,
        target: DeliveryTarget,
    ) -> Result<SubscriptionId> {
        // only auto acknowledgement is implemented
        if let Some(ack) = headers.get("ack") {
            if ack != "auto" {
                return Err(ProtocolError::UnsupportedAckMode(ack.to_string()).into());
            }
        }
        self.inner
            .hooks
            .on_subscribe(session_id, destination, headers)?;

        let id = match headers.get("id") {
            Some(id) => id.to_string(),
            None if session_id == LOCAL_SESSION_ID => new_id(IdKind::LocalSubscription),
            None => new_id(IdKind::Subscription),
        };
        let subscription = Subscription::new(id.clone(), session_id, destination, target);
        self.registry().add(subscription)?;
        Ok(id)
    }

    pub(crate) fn remove_subscription(&self, session_id: &str, id: &str) -> bool {
        self.registry().remove(session_id, id).is_some()
    }

    pub(crate) fn remove_session(&self, session_id: &str) -> usize {
        self.registry().remove_all_for_session(session_id)
    }

    /// Fan a message out to every matching subscription except the
    /// publisher's own. Returns the number of deliveries attempted.
    ///
    /// `payload` is the wire body. `body` is what local subscribers get; when
    /// absent it is decoded from `payload` on first use.
    pub(crate) fn publish(
        &self,
        publisher: &str,
        destination: &str,
        headers: &Headers,
        payload: Bytes,
        body: Option<Body>,
    ) -> Result<usize> {
        self.inner.hooks.on_send(publisher, destination, headers)?;

        let message_headers = build_message_headers(destination, headers, payload.len());
        self.emit(BrokerEvent::Sent {
            session_id: publisher.to_string(),
            destination: destination.to_string(),
            headers: message_headers.clone(),
            body: payload.clone(),
        });

        // the local session may receive its own messages, wire sessions may not
        let exclude = (publisher != LOCAL_SESSION_ID).then_some(publisher);
        let targets: Vec<(SubscriptionId, DeliveryTarget)> = self
            .registry()
            .matching_for(destination, exclude)
            .map(|s| (s.id.clone(), s.target.clone()))
            .collect();

        let mut local_body = body;
        for (subscription_id, target) in &targets {
            let mut headers = message_headers.clone();
            headers.insert("subscription", subscription_id.as_str());
            match target {
                DeliveryTarget::Remote(client) => {
                    let frame = Frame {
                        command: Command::Message,
                        headers,
                        body: payload.clone(),
                    };
                    if !client.send_frame(&frame) {
                        warn!("Failed to deliver to subscription {subscription_id}: connection closed");
                    }
                }
                DeliveryTarget::Local(callback) => {
                    let body: &Body = local_body.get_or_insert_with(|| {
                        Body::decode(&payload, message_headers.get("content-type"))
                    });
                    callback(body, &headers);
                }
            }
        }

        debug!(
            "{publisher} published to {destination}: {} subscriber(s)",
            targets.len()
        );
        Ok(targets.len())
    }
}

/// Reject programmatic input that would corrupt the serialized MESSAGE.
/// Parsed frames cannot carry EOLs in headers and skip this.
fn check_encodable(destination: &str, headers: &Headers) -> Result<()> {
    if destination.is_empty() || destination.contains(['\n', '\r']) {
        return Err(BrokerError::InvalidHeader(format!(
            "destination {destination:?}"
        )));
    }
    if let Some((key, value)) = headers.first_unencodable() {
        return Err(BrokerError::InvalidHeader(format!("{key:?}: {value:?}")));
    }
    Ok(())
}

/// Build MESSAGE headers: broker stamps first, then the sender's own headers.
fn build_message_headers(destination: &str, incoming: &Headers, content_length: usize) -> Headers {
    let content_type = incoming.get("content-type").unwrap_or(TEXT_CONTENT_TYPE);
    let mut headers = Headers::new()
        .with("destination", destination)
        .with("message-id", new_id(IdKind::Message))
        .with("content-type", content_type)
        .with("content-length", content_length.to_string())
        .with("timestamp", Utc::now().timestamp_millis().to_string());
    for (key, value) in incoming.iter() {
        if !headers.contains(key) && !DROPPED_SEND_HEADERS.contains(&key) {
            headers.insert(key, value);
        }
    }
    headers
}

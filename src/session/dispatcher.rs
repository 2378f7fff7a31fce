//! Command dispatch
//!
//! Interprets inbound frames for one session. Until a CONNECT has been
//! accepted every other command is answered with an ERROR frame and
//! otherwise ignored; the connection stays open.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::events::BrokerEvent;
use crate::broker::hooks::ConnectRequest;
use crate::broker::registry::DeliveryTarget;
use crate::broker::Broker;
use crate::client::ClientHandle;
use crate::frame::codec::is_heartbeat;
use crate::frame::{Command, Frame};
use crate::session::heartbeat::{Activity, HeartbeatMonitor, NegotiatedHeartbeat, parse_heart_beat};
use crate::session::state::{ConnectionState, negotiate_version};
use crate::utils::error::{BrokerError, ProtocolError, Result};
use crate::utils::id::{IdKind, new_id};

pub struct Session {
    id: String,
    state: ConnectionState,
    heartbeat: NegotiatedHeartbeat,
    version: Option<&'static str>,
    broker: Broker,
    client: ClientHandle,
    activity: Arc<Activity>,
    monitor: HeartbeatMonitor,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("heartbeat", &self.heartbeat)
            .field("version", &self.version)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(broker: Broker, client: ClientHandle) -> Self {
        let id = new_id(IdKind::Session);
        info!("{id} connecting");
        broker.emit(BrokerEvent::Connecting {
            session_id: id.clone(),
        });
        Self {
            id,
            state: ConnectionState::New,
            heartbeat: NegotiatedHeartbeat::default(),
            version: None,
            broker,
            client,
            activity: Arc::new(Activity::new()),
            monitor: HeartbeatMonitor::new(),
        }
    }

    /// Server-assigned session id, also sent in the CONNECTED frame's
    /// `session` header.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the session is in its `New → Connected → Closed` lifecycle.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Heart-beat cadence agreed on CONNECT; `0,0` until then.
    pub fn heartbeat(&self) -> NegotiatedHeartbeat {
        self.heartbeat
    }

    /// Negotiated protocol version, once connected.
    pub fn version(&self) -> Option<&'static str> {
        self.version
    }

    /// Write handle of the connection this session talks to.
    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Record inbound activity that carries no frame (transport-level pings).
    pub fn touch(&self) {
        self.activity.touch();
    }

    /// Handle one inbound transport payload.
    ///
    /// Errors have already been reported to the client as ERROR frames; the
    /// caller only has to close the connection when `is_fatal()` says so.
    pub fn handle_data(&mut self, data: &[u8]) -> Result<()> {
        self.activity.touch();
        if is_heartbeat(data) {
            debug!("PONG {}", self.id);
            return Ok(());
        }

        match Frame::parse(data) {
            Ok(frame) => self.handle_frame(frame),
            Err(err) => {
                let err = BrokerError::from(err);
                self.report(&err, None);
                Err(err)
            }
        }
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        debug!("{} <- {}", self.id, frame.command);
        let result = match frame.command {
            Command::Connect => self.on_connect(&frame),
            Command::Subscribe => self.require_connected().and_then(|_| self.on_subscribe(&frame)),
            Command::Unsubscribe => self
                .require_connected()
                .and_then(|_| self.on_unsubscribe(&frame)),
            Command::Send => self.require_connected().and_then(|_| self.on_send(&frame)),
            Command::Disconnect => self
                .require_connected()
                .and_then(|_| self.on_disconnect(&frame)),
            other => Err(BrokerError::CommandNotFound(other.to_string())),
        };

        if let Err(err) = &result {
            self.report(err, frame.get_header("receipt"));
        }
        result
    }

    /// Tear the session down: drop its subscriptions and stop heart-beats.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.monitor.turn_off();
        let removed = self.broker.remove_session(&self.id);
        info!("{} disconnected, {removed} subscription(s) removed", self.id);
        self.broker.emit(BrokerEvent::Disconnected {
            session_id: self.id.clone(),
        });
    }

    fn require_connected(&self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(ProtocolError::SessionClosed.into()),
            _ => Err(ProtocolError::NotConnected.into()),
        }
    }

    fn on_connect(&mut self, frame: &Frame) -> Result<()> {
        match self.state {
            ConnectionState::Connected => return Err(ProtocolError::AlreadyConnected.into()),
            ConnectionState::Closed => return Err(ProtocolError::SessionClosed.into()),
            _ => {}
        }
        self.state = ConnectionState::Negotiating;

        let accept_version = frame.get_header("accept-version");
        let Some(version) = negotiate_version(accept_version) else {
            self.state = ConnectionState::New;
            return Err(
                ProtocolError::UnsupportedVersion(accept_version.unwrap_or_default().to_string())
                    .into(),
            );
        };

        let settings = self.broker.settings();
        let heartbeat = NegotiatedHeartbeat::negotiate(
            settings.heartbeat,
            parse_heart_beat(frame.get_header("heart-beat")),
        );

        let request = ConnectRequest {
            session_id: &self.id,
            headers: &frame.headers,
            heartbeat,
        };
        if let Err(rejection) = self.broker.hooks().on_connect(&request) {
            self.state = ConnectionState::New;
            return Err(rejection.into());
        }

        self.state = ConnectionState::Connected;
        self.heartbeat = heartbeat;
        self.version = Some(version);
        if !heartbeat.is_disabled() {
            self.monitor.start(
                &self.id,
                heartbeat,
                settings.heartbeat_error_margin(),
                self.client.clone(),
                self.activity.clone(),
                self.broker.event_bus().clone(),
            );
        }

        self.client.send_frame(&Frame::connected(
            version,
            &self.id,
            &settings.server_name,
            &heartbeat.to_header(),
        ));
        info!(
            "{} connected (version {version}, heart-beat {})",
            self.id,
            heartbeat.to_header()
        );
        self.broker.emit(BrokerEvent::Connected {
            session_id: self.id.clone(),
            headers: frame.headers.clone(),
        });
        Ok(())
    }

    fn on_subscribe(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame
            .get_header("destination")
            .ok_or(ProtocolError::MissingHeader("destination"))?;
        let id = self.broker.add_subscription(
            &self.id,
            destination,
            &frame.headers,
            DeliveryTarget::Remote(self.client.clone()),
        )?;
        info!("{} subscribed to {destination} ({id})", self.id);
        self.send_receipt(frame);
        Ok(())
    }

    fn on_unsubscribe(&mut self, frame: &Frame) -> Result<()> {
        let id = frame
            .get_header("id")
            .ok_or(ProtocolError::MissingHeader("id"))?;
        if !self.broker.remove_subscription(&self.id, id) {
            return Err(ProtocolError::UnknownSubscription(id.to_string()).into());
        }
        info!("{} unsubscribed {id}", self.id);
        self.send_receipt(frame);
        Ok(())
    }

    fn on_send(&mut self, frame: &Frame) -> Result<()> {
        let destination = frame
            .get_header("destination")
            .ok_or(ProtocolError::MissingHeader("destination"))?;
        let delivered = self.broker.publish(
            &self.id,
            destination,
            &frame.headers,
            frame.body.clone(),
            None,
        )?;
        debug!("{} sent to {destination}, {delivered} delivery(ies)", self.id);
        self.send_receipt(frame);
        Ok(())
    }

    fn on_disconnect(&mut self, frame: &Frame) -> Result<()> {
        self.close();
        self.send_receipt(frame);
        // the receipt is queued ahead of the close
        self.client.close();
        Ok(())
    }

    fn send_receipt(&self, frame: &Frame) {
        if let Some(receipt) = frame.get_header("receipt") {
            self.client.send_frame(&Frame::receipt(receipt));
        }
    }

    fn report(&self, err: &BrokerError, receipt: Option<&str>) {
        warn!("{}: {err}", self.id);
        self.broker.emit(BrokerEvent::Error {
            session_id: Some(self.id.clone()),
            message: err.to_string(),
        });
        self.client.send_frame(&Frame::error(
            &err.error_message(),
            err.error_description().as_deref(),
            receipt,
        ));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

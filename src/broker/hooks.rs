//! Application hooks.
//!
//! The broker asks its `BrokerHooks` before accepting a connection, a
//! subscription or a message. Returning a `Rejection` turns into an ERROR
//! frame for remote sessions and an `Err` for local callers. Credential
//! checking, if any, lives in the embedding application's implementation.

use crate::frame::Headers;
use crate::session::NegotiatedHeartbeat;
use crate::utils::error::Rejection;

/// What a client asked for in its CONNECT frame, after heart-beat
/// negotiation.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub session_id: &'a str,
    pub headers: &'a Headers,
    pub heartbeat: NegotiatedHeartbeat,
}

pub trait BrokerHooks: Send + Sync {
    fn on_connect(&self, _request: &ConnectRequest<'_>) -> Result<(), Rejection> {
        Ok(())
    }

    fn on_subscribe(
        &self,
        _session_id: &str,
        _destination: &str,
        _headers: &Headers,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    fn on_send(
        &self,
        _session_id: &str,
        _destination: &str,
        _headers: &Headers,
    ) -> Result<(), Rejection> {
        Ok(())
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl BrokerHooks for AcceptAll {}

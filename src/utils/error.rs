//! Error types used throughout the broker.
//!
//! Codec failures are `FrameError`, state machine violations are
//! `ProtocolError`, and hook refusals are a `Rejection`. `BrokerError` wraps
//! all of them and tells the transport whether the connection must be closed.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while turning raw bytes into a `Frame`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("truncated body: content-length {declared}, {available} bytes available")]
    Truncated { declared: usize, available: usize },
}

/// A well-formed frame that is not valid for the session's current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("session closed")]
    SessionClosed,

    #[error("missing required header '{0}'")]
    MissingHeader(&'static str),

    #[error("subscription id '{0}' already in use")]
    DuplicateSubscription(String),

    #[error("no subscription with id '{0}'")]
    UnknownSubscription(String),

    #[error("unsupported ack mode '{0}'")]
    UnsupportedAckMode(String),

    #[error("unsupported protocol version '{0}'")]
    UnsupportedVersion(String),
}

/// Refusal returned by an application hook (connect, subscribe or send).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Rejection {
    pub message: String,
    pub description: Option<String>,
}

impl Rejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Main error type for the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    MalformedFrame(FrameError),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("heartbeat liveness timeout after {0:?}")]
    LivenessTimeout(Duration),

    #[error("body type error: {0}")]
    BodyType(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<FrameError> for BrokerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnknownCommand(command) => BrokerError::CommandNotFound(command),
            other => BrokerError::MalformedFrame(other),
        }
    }
}

impl BrokerError {
    /// Whether the connection that produced this error has to be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::MalformedFrame(_)
                | BrokerError::LivenessTimeout(_)
                | BrokerError::Transport(_)
                | BrokerError::Io(_)
        )
    }

    /// Text used for the `message` header of an ERROR frame.
    pub fn error_message(&self) -> String {
        match self {
            BrokerError::MalformedFrame(_) => "malformed frame".to_string(),
            BrokerError::CommandNotFound(_) => "command not found".to_string(),
            BrokerError::Protocol(err) => err.to_string(),
            BrokerError::Rejected(rejection) => rejection.message.clone(),
            BrokerError::BodyType(_) => "invalid body".to_string(),
            BrokerError::InvalidHeader(_) => "invalid header".to_string(),
            other => other.to_string(),
        }
    }

    /// Optional longer description carried in the ERROR frame body.
    pub fn error_description(&self) -> Option<String> {
        match self {
            BrokerError::MalformedFrame(err) => Some(err.to_string()),
            BrokerError::CommandNotFound(command) => Some(command.clone()),
            BrokerError::Rejected(rejection) => rejection.description.clone(),
            BrokerError::BodyType(detail) | BrokerError::InvalidHeader(detail) => {
                Some(detail.clone())
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

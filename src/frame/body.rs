//! Message bodies as seen by embedding code.
//!
//! On the wire a body is always raw bytes. Local publishers and subscribers
//! work with `Body`, which keeps text, binary and JSON payloads apart so the
//! broker can encode them once and local callbacks skip the byte round trip.

use bytes::Bytes;
use serde_json::Value;

use crate::utils::error::BrokerError;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
    Json(Value),
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.trim_start().starts_with(JSON_CONTENT_TYPE))
}

impl Body {
    /// Interpret raw frame bytes according to the frame's content type.
    pub fn decode(bytes: &Bytes, content_type: Option<&str>) -> Body {
        if bytes.is_empty() {
            return Body::Empty;
        }
        if is_json(content_type) {
            if let Ok(value) = serde_json::from_slice(bytes) {
                return Body::Json(value);
            }
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Body::Text(text.to_string()),
            Err(_) => Body::Binary(bytes.clone()),
        }
    }

    /// Encode for the wire. JSON values are only accepted when the content
    /// type is JSON (or not given).
    pub fn encode(&self, content_type: Option<&str>) -> Result<Bytes, BrokerError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Text(text) => Ok(Bytes::from(text.clone())),
            Body::Binary(bytes) => Ok(bytes.clone()),
            Body::Json(value) => {
                if content_type.is_some() && !is_json(content_type) {
                    return Err(BrokerError::BodyType(format!(
                        "JSON body cannot be sent as '{}'",
                        content_type.unwrap_or_default()
                    )));
                }
                serde_json::to_vec(value)
                    .map(Bytes::from)
                    .map_err(|e| BrokerError::BodyType(e.to_string()))
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Binary(bytes)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

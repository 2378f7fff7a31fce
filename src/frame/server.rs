//! Frames the broker sends to clients.

use super::{Command, Frame};
use super::body::TEXT_CONTENT_TYPE;

impl Frame {
    pub fn connected(version: &str, session: &str, server: &str, heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .header("version", version)
            .header("session", session)
            .header("server", server)
            .header("heart-beat", heart_beat)
    }

    pub fn receipt(receipt_id: &str) -> Frame {
        Frame::new(Command::Receipt).header("receipt-id", receipt_id)
    }

    /// ERROR frame; the description travels in a length-prefixed body.
    pub fn error(message: &str, description: Option<&str>, receipt_id: Option<&str>) -> Frame {
        let body = description.unwrap_or_default().to_string();
        let mut frame = Frame::new(Command::Error)
            .header("message", message)
            .header("content-type", TEXT_CONTENT_TYPE)
            .header("content-length", body.len().to_string());
        if let Some(receipt_id) = receipt_id {
            frame.headers.insert("receipt-id", receipt_id);
        }
        frame.with_body(body)
    }
}

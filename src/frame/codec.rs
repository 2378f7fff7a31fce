//! STOMP wire codec.
//!
//! Wire format: `COMMAND\n(key:value\n)*\nBODY\0`. A `content-length` header
//! makes the body exact-length and binary safe; without it the body ends at
//! the first NUL (or at the end of the buffer when the NUL is missing).

use bytes::{BufMut, Bytes, BytesMut};

use super::{Command, Frame, Headers};
use crate::utils::error::FrameError;

/// Parse one complete frame.
pub fn parse(data: &[u8]) -> Result<Frame, FrameError> {
    // EOLs ahead of a frame are heart-beats that arrived glued to it
    let start = data
        .iter()
        .position(|&b| b != b'\n' && b != b'\r')
        .ok_or(FrameError::Malformed("empty frame"))?;

    let (command_line, mut pos) =
        next_line(data, start).ok_or(FrameError::Malformed("missing command line"))?;
    let command_text = std::str::from_utf8(command_line)
        .map_err(|_| FrameError::Malformed("command is not valid UTF-8"))?
        .trim();
    let command: Command = command_text.parse()?;

    let mut headers = Headers::new();
    loop {
        let (line, next) =
            next_line(data, pos).ok_or(FrameError::Malformed("header block is not terminated"))?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| FrameError::Malformed("header is not valid UTF-8"))?;
        // only the first colon separates key from value
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                headers.insert(key, value.trim());
            }
        }
    }

    let rest = &data[pos..];
    let declared = headers
        .get("content-length")
        .and_then(|len| len.parse::<usize>().ok());
    let body = match declared {
        Some(len) => {
            if rest.len() < len {
                return Err(FrameError::Truncated {
                    declared: len,
                    available: rest.len(),
                });
            }
            Bytes::copy_from_slice(&rest[..len])
        }
        None => {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            Bytes::copy_from_slice(&rest[..end])
        }
    };

    Ok(Frame {
        command,
        headers,
        body,
    })
}

/// Serialize a frame. Headers go out as a text prefix, the body is appended
/// as raw bytes so binary payloads are never re-encoded.
///
/// A body containing NUL is only recoverable with an explicit length, so
/// `content-length` is added when the caller did not set one.
pub fn serialize(frame: &Frame) -> Bytes {
    let implied_length = (!frame.headers.contains("content-length")
        && frame.body.contains(&0))
    .then(|| frame.body.len().to_string());

    let header_len: usize = frame
        .headers
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    let mut buf = BytesMut::with_capacity(
        frame.command.as_str().len() + header_len + frame.body.len() + 40,
    );

    buf.put_slice(frame.command.as_str().as_bytes());
    buf.put_u8(b'\n');
    for (key, value) in frame.headers.iter() {
        buf.put_slice(key.as_bytes());
        buf.put_u8(b':');
        buf.put_slice(value.as_bytes());
        buf.put_u8(b'\n');
    }
    if let Some(length) = &implied_length {
        buf.put_slice(b"content-length:");
        buf.put_slice(length.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.put_slice(&frame.body);
    buf.put_u8(0);
    buf.freeze()
}

/// True for a heart-beat payload: nothing but EOLs (or nothing at all).
pub fn is_heartbeat(data: &[u8]) -> bool {
    data.iter().all(|&b| b == b'\n' || b == b'\r')
}

fn next_line(data: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let offset = data.get(from..)?.iter().position(|&b| b == b'\n')?;
    let end = from + offset;
    let line = &data[from..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, end + 1))
}

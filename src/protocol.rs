// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Handshake control tokens.
//!
//! Two tokens precede any replication bytes on a session:
//!
//! | Token | Sent by | Wire bytes |
//! |-------|---------|------------|
//! | `CONNECT` | active side | `b"CONNECT"` |
//! | `OK` | passive side | `b"OK"` |
//!
//! A message is a control token only if it matches one of these byte strings
//! exactly. Anything else received during the handshake is a protocol
//! violation.

use bytes::Bytes;
use std::fmt;

const CONNECT_TOKEN: &[u8] = b"CONNECT";
const OK_TOKEN: &[u8] = b"OK";

/// A handshake control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Active side opening the channel.
    Connect,
    /// Passive side acknowledging.
    Ok,
}

impl ControlMessage {
    /// Wire encoding of this token.
    pub fn encode(self) -> Bytes {
        Bytes::from_static(self.as_bytes())
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            ControlMessage::Connect => CONNECT_TOKEN,
            ControlMessage::Ok => OK_TOKEN,
        }
    }

    /// Decode a received message. Returns `None` for anything that is not an
    /// exact control token.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            CONNECT_TOKEN => Some(ControlMessage::Connect),
            OK_TOKEN => Some(ControlMessage::Ok),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Connect => write!(f, "CONNECT"),
            ControlMessage::Ok => write!(f, "OK"),
        }
    }
}

/// Short printable description of a received message, for protocol
/// violation reports.
pub fn describe(bytes: &[u8]) -> String {
    match ControlMessage::decode(bytes) {
        Some(token) => token.to_string(),
        None => format!("{} payload bytes", bytes.len()),
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mesh link.
//!
//! Errors are categorized by where they arise (session transport, handshake,
//! replication engine, configuration) and carry the peer handle when one is
//! involved.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Session send failed after the handshake |
//! | `Handshake` | No | Control message could not be sent, open failed |
//! | `ProtocolViolation` | No | Unexpected control token during the handshake |
//! | `NotConnected` | No | Send attempted before the handshake completed |
//! | `ConnectionClosed` | No | Operation on a closed connection |
//! | `Replication` | Yes | Replication engine refused to start a session |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Coordinator lifecycle violation |
//!
//! # Retry Behavior
//!
//! Nothing inside this crate retries. A failed connection is closed and the
//! next discovery cycle produces a fresh attempt, so every error handed to an
//! `open` completion reports [`MeshError::is_retryable()`] as `false`.

use thiserror::Error;

/// Result type alias for mesh link operations.
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors that can occur while managing peer connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// The session transport rejected a payload send.
    #[error("Transport error ({peer}): {message}")]
    Transport { peer: String, message: String },

    /// The handshake could not be carried out (initial control message
    /// failed to send).
    #[error("Handshake failed ({peer}): {message}")]
    Handshake { peer: String, message: String },

    /// The peer sent a control token that is not valid in the current
    /// handshake state.
    #[error("Protocol violation ({peer}): expected {expected}, got {actual}")]
    ProtocolViolation {
        peer: String,
        expected: String,
        actual: String,
    },

    /// Payload send attempted before the connection became usable.
    #[error("Peer not connected: {peer}")]
    NotConnected { peer: String },

    /// The connection has been closed.
    #[error("Connection closed: {peer}")]
    ConnectionClosed { peer: String },

    /// The replication engine failed to start a session.
    #[error("Replication error: {0}")]
    Replication(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordinator lifecycle violation (e.g. `start()` while running).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl MeshError {
    /// Create a transport error for a peer.
    pub fn transport(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a handshake error for a peer.
    pub fn handshake(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Replication(_) => true,
            Self::Handshake { .. } => false,
            Self::ProtocolViolation { .. } => false,
            Self::NotConnected { .. } => false,
            Self::ConnectionClosed { .. } => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
        }
    }
}

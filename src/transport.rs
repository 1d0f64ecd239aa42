// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Discovery and session transport boundary.
//!
//! The mesh link does not open sockets or advertise services itself. A
//! platform adapter implements [`DiscoveryService`] and [`SessionTransport`]
//! and feeds [`DiscoveryEvent`]s back into the
//! [`MeshCoordinator`](crate::coordinator::MeshCoordinator).
//!
//! # Event Flow
//!
//! ```text
//! adapter ──PeerFound──────────────► coordinator ──invite()──► adapter
//! adapter ──InvitationReceived─────► coordinator ──reply(bool)
//! adapter ──SessionStateChanged────► peer manager (start/stop connection)
//! adapter ──DataReceived───────────► peer manager ──► Connection::receive
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::Result;

/// Externally visible name/address of a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerHandle(String);

impl PeerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Small out-of-band key/value map exchanged during discovery.
pub type DiscoveryMetadata = HashMap<String, String>;

/// Transport-level session state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Events delivered by the discovery/transport adapter.
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// Browsing found a peer advertising our service.
    PeerFound {
        peer: PeerHandle,
        metadata: DiscoveryMetadata,
    },
    /// A previously found peer stopped advertising.
    PeerLost { peer: PeerHandle },
    /// A remote peer invited us into a session. The adapter waits on `reply`
    /// for the accept (`true`) / reject (`false`) decision.
    InvitationReceived {
        peer: PeerHandle,
        reply: oneshot::Sender<bool>,
    },
    /// The session with a peer changed state.
    SessionStateChanged {
        peer: PeerHandle,
        state: SessionState,
    },
    /// Bytes arrived on the session with a peer.
    DataReceived { peer: PeerHandle, bytes: Bytes },
}

impl DiscoveryEvent {
    /// The peer this event concerns.
    pub fn peer(&self) -> &PeerHandle {
        match self {
            DiscoveryEvent::PeerFound { peer, .. }
            | DiscoveryEvent::PeerLost { peer }
            | DiscoveryEvent::InvitationReceived { peer, .. }
            | DiscoveryEvent::SessionStateChanged { peer, .. }
            | DiscoveryEvent::DataReceived { peer, .. } => peer,
        }
    }
}

/// Raw reliable message channel between this process and its peers.
///
/// Implementations must be non-blocking: `send` queues the bytes and returns.
pub trait SessionTransport: Send + Sync + 'static {
    /// Queue `bytes` for delivery to `peer`.
    fn send(&self, peer: &PeerHandle, bytes: Bytes) -> Result<()>;

    /// Tear down the session with `peer`. Must tolerate unknown peers.
    fn disconnect(&self, peer: &PeerHandle);
}

/// Advertise/browse lifecycle and outbound invitations.
pub trait DiscoveryService: Send + Sync + 'static {
    fn start_advertising(&self, service_id: &str, metadata: DiscoveryMetadata) -> Result<()>;

    fn stop_advertising(&self);

    fn start_browsing(&self, service_id: &str) -> Result<()>;

    fn stop_browsing(&self);

    /// Invite `peer` into a session. If the session does not reach
    /// [`SessionState::Connected`] within `timeout` the adapter reports
    /// [`SessionState::Disconnected`].
    fn invite(&self, peer: &PeerHandle, timeout: Duration) -> Result<()>;
}

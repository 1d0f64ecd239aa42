// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine integration traits.
//!
//! The mesh link never speaks the replication protocol itself. It hands each
//! established [`Connection`] to a replication engine as an opaque message
//! channel:
//!
//! - **Active** connections: [`ReplicationEngine::start_session`] is called
//!   with a [`ReplicationTarget`]; the engine opens the channel, binds a
//!   [`MessageReceiver`] and runs a continuous push/pull session until
//!   [`ReplicationSession::stop`].
//! - **Passive** connections: once the peer's `CONNECT` arrives the
//!   connection is passed to [`InboundListener::accept`] so the engine can
//!   serve the session from the listening side.
//!
//! # Example
//!
//! ```rust,no_run
//! use mesh_link::replicator::{ReplicationEngine, ReplicationSession, ReplicationTarget};
//! use mesh_link::error::Result;
//!
//! struct MyEngine;
//! struct MySession;
//!
//! impl ReplicationSession for MySession {
//!     fn stop(&self) {}
//! }
//!
//! impl ReplicationEngine for MyEngine {
//!     fn start_session(&self, target: ReplicationTarget) -> Result<Box<dyn ReplicationSession>> {
//!         target.channel.open(|result| {
//!             if let Err(e) = result {
//!                 eprintln!("open failed: {e}");
//!             }
//!         });
//!         Ok(Box::new(MySession))
//!     }
//! }
//! ```

use bytes::Bytes;
use std::sync::Arc;

use crate::config::ReplicationMode;
use crate::connection::Connection;
use crate::error::{MeshError, Result};
use crate::identity::PeerIdentity;
use crate::transport::PeerHandle;

/// Receiving half the replication engine binds onto a [`Connection`].
pub trait MessageReceiver: Send + Sync + 'static {
    /// Post-handshake bytes from the peer, in arrival order.
    fn on_message(&self, bytes: Bytes);

    /// The connection closed. `error` is `None` for a clean close.
    fn on_closed(&self, error: Option<&MeshError>);
}

/// Everything the engine needs to run one session against a peer.
pub struct ReplicationTarget {
    /// Logical target id. Checkpoints are keyed by identity, not by
    /// transport handle, so a reconnect to the same peer resumes.
    pub target_id: PeerIdentity,
    pub peer: PeerHandle,
    pub channel: Arc<Connection>,
    pub collections: Vec<String>,
    pub mode: ReplicationMode,
    pub continuous: bool,
}

impl std::fmt::Debug for ReplicationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationTarget")
            .field("target_id", &self.target_id)
            .field("peer", &self.peer)
            .field("collections", &self.collections)
            .field("mode", &self.mode)
            .field("continuous", &self.continuous)
            .finish()
    }
}

/// Handle to one running replication session.
pub trait ReplicationSession: Send + Sync {
    /// Stop the session. Called at most once by the coordinator.
    fn stop(&self);
}

/// Starts replication sessions for active connections.
pub trait ReplicationEngine: Send + Sync + 'static {
    fn start_session(&self, target: ReplicationTarget) -> Result<Box<dyn ReplicationSession>>;
}

/// Accepts passive connections once their handshake completes.
pub trait InboundListener: Send + Sync + 'static {
    fn accept(&self, connection: Arc<Connection>);

    /// Detach a previously accepted connection.
    fn close(&self, connection: &Arc<Connection>);
}

/// A no-op engine for standalone mode.
///
/// Logs session starts but never opens the channel.
#[derive(Clone, Debug, Default)]
pub struct NoOpReplicationEngine;

#[derive(Debug)]
struct NoOpSession {
    peer: PeerHandle,
}

impl ReplicationSession for NoOpSession {
    fn stop(&self) {
        tracing::debug!(peer = %self.peer, "NoOp: would stop replication session");
    }
}

impl ReplicationEngine for NoOpReplicationEngine {
    fn start_session(&self, target: ReplicationTarget) -> Result<Box<dyn ReplicationSession>> {
        tracing::debug!(
            peer = %target.peer,
            target_id = %target.target_id,
            collections = ?target.collections,
            "NoOp: would start replication session"
        );
        Ok(Box::new(NoOpSession { peer: target.peer }))
    }
}

/// A no-op listener for standalone mode.
#[derive(Clone, Debug, Default)]
pub struct NoOpInboundListener;

impl InboundListener for NoOpInboundListener {
    fn accept(&self, connection: Arc<Connection>) {
        tracing::debug!(peer = %connection.peer(), "NoOp: would accept inbound connection");
    }

    fn close(&self, connection: &Arc<Connection>) {
        tracing::debug!(peer = %connection.peer(), "NoOp: would close inbound connection");
    }
}

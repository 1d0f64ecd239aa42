// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-peer replication sessions.
//!
//! One session runs per active connection, keyed by peer handle. The session
//! targets the peer's identity so checkpoints survive reconnects.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ReplicationSettings;
use crate::connection::Connection;
use crate::error::{MeshError, Result};
use crate::metrics;
use crate::replicator::{ReplicationEngine, ReplicationSession, ReplicationTarget};
use crate::transport::PeerHandle;

struct RunningSession {
    connection: Arc<Connection>,
    session: Box<dyn ReplicationSession>,
}

/// Registry of running replication sessions.
pub struct Replicators {
    engine: Arc<dyn ReplicationEngine>,
    settings: ReplicationSettings,
    sessions: DashMap<PeerHandle, RunningSession>,
}

impl Replicators {
    pub fn new(engine: Arc<dyn ReplicationEngine>, settings: ReplicationSettings) -> Self {
        Self {
            engine,
            settings,
            sessions: DashMap::new(),
        }
    }

    /// Start a continuous session for an active connection.
    ///
    /// If the engine refuses, the connection is closed and the error
    /// returned. A session already running for the same peer is stopped and
    /// replaced. If the connection is torn down while the engine is starting,
    /// the new session is stopped and `ConnectionClosed` returned.
    pub fn start_replicator(&self, connection: &Arc<Connection>) -> Result<()> {
        let peer = connection.peer().clone();
        let target_id = connection.identity().cloned().ok_or_else(|| MeshError::InvalidState {
            expected: "active connection".to_string(),
            actual: "passive connection".to_string(),
        })?;

        let target = ReplicationTarget {
            target_id: target_id.clone(),
            peer: peer.clone(),
            channel: Arc::clone(connection),
            collections: self.settings.collections.clone(),
            mode: self.settings.mode,
            continuous: self.settings.continuous,
        };

        let session = match self.engine.start_session(target) {
            Ok(session) => session,
            Err(e) => {
                error!(peer = %peer, target_id = %target_id, error = %e, "Failed to start replicator");
                metrics::record_replicator("start_failed");
                connection.close(Some(e.clone()), || {});
                return Err(MeshError::Replication(format!(
                    "failed to start replicator for {}: {}",
                    peer, e
                )));
            }
        };

        let previous = self.sessions.insert(
            peer.clone(),
            RunningSession {
                connection: Arc::clone(connection),
                session,
            },
        );
        if let Some(previous) = previous {
            debug!(peer = %peer, "Replacing existing replicator");
            previous.session.stop();
            metrics::record_replicator("stopped");
        }

        // Teardown closes the connection before stopping its replicator, so a
        // session inserted after that stop sees the connection closed here.
        if connection.is_closed() {
            debug!(peer = %peer, "Connection closed while replicator was starting");
            self.stop_replicator_for(connection);
            return Err(MeshError::ConnectionClosed { peer: peer.to_string() });
        }

        info!(peer = %peer, target_id = %target_id, "Replicator started");
        metrics::record_replicator("started");
        Ok(())
    }

    /// Stop the session for `peer`, if any.
    pub fn stop_replicator(&self, peer: &PeerHandle) {
        if let Some((_, running)) = self.sessions.remove(peer) {
            Self::stop_session(peer, running);
        }
    }

    /// Stop the session only if it belongs to `connection`. A newer
    /// connection for the same handle keeps its session.
    pub fn stop_replicator_for(&self, connection: &Arc<Connection>) {
        let peer = connection.peer();
        if let Some((_, running)) = self
            .sessions
            .remove_if(peer, |_, running| Arc::ptr_eq(&running.connection, connection))
        {
            Self::stop_session(peer, running);
        }
    }

    fn stop_session(peer: &PeerHandle, running: RunningSession) {
        running.session.stop();
        info!(peer = %peer, "Replicator stopped");
        metrics::record_replicator("stopped");
    }

    pub fn is_running(&self, peer: &PeerHandle) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

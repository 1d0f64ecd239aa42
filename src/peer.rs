// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer registry and connection lifecycle.
//!
//! The [`PeerManager`] owns one [`Connection`] per peer handle and drives it
//! through the session lifecycle reported by the transport adapter:
//!
//! ```text
//! register_peer ──► start_connection ──► (handshake) ──► stop_connection
//!   (invite sent /     (session            active: replicator     (replicator or
//!    invitation        connected)          passive: listener       listener detached,
//!    accepted)                                                     session closed)
//! ```
//!
//! # Peer Set
//!
//! Every mutation of the registry publishes the full set of registered peer
//! handles on a `watch` channel. The snapshot is taken while the registry
//! lock is held, so subscribers see mutations for one peer in program order.
//! Pending connections (invited, handshake not complete) are members.
//!
//! # Admission
//!
//! Registrations made through [`PeerManager::register_if_absent`] are checked
//! and inserted under one hold of the registry lock. The registry can also be
//! closed to new registrations, which the coordinator does before draining it
//! on stop, so nothing registered concurrently survives the drain.
//!
//! # Locking
//!
//! The registry lock guards only the map. Replication start/stop, listener
//! calls and transport teardown all run after it is released.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionRole};
use crate::coordinator::Replicators;
use crate::error::{MeshError, Result};
use crate::identity::{PeerIdentity, Role};
use crate::metrics;
use crate::replicator::InboundListener;
use crate::transport::{PeerHandle, SessionTransport};

/// Snapshot of registered peer handles.
pub type PeerSet = BTreeSet<PeerHandle>;

/// Outcome of [`PeerManager::register_if_absent`].
#[derive(Clone)]
pub enum Admission {
    /// A new connection was registered.
    Registered(Arc<Connection>),
    /// The peer already has a connection; nothing changed.
    AlreadyRegistered,
    /// The registry is closed to new connections.
    Closed,
}

struct Registry {
    /// All connections (keyed by peer handle)
    connections: HashMap<PeerHandle, Arc<Connection>>,
    admitting: bool,
}

/// Manager for all peer connections.
pub struct PeerManager {
    registry: Mutex<Registry>,
    /// Peer set snapshots
    peers_tx: watch::Sender<PeerSet>,
    /// Sessions for active connections
    replicators: Replicators,
    /// Receives passive connections after their handshake
    listener: Arc<dyn InboundListener>,
    transport: Arc<dyn SessionTransport>,
}

impl PeerManager {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        listener: Arc<dyn InboundListener>,
        replicators: Replicators,
    ) -> Self {
        let (peers_tx, _) = watch::channel(PeerSet::new());
        Self {
            registry: Mutex::new(Registry {
                connections: HashMap::new(),
                admitting: true,
            }),
            peers_tx,
            replicators,
            listener,
            transport,
        }
    }

    /// Register a connection for a newly invited or accepted session.
    ///
    /// Replaces any existing connection for `peer`; the old one is detached
    /// from its replicator or listener and closed without tearing down the
    /// session the new connection will use.
    pub fn register_peer(
        &self,
        peer: PeerHandle,
        identity: Option<PeerIdentity>,
        role: Role,
    ) -> Result<Arc<Connection>> {
        let connection = self.build_connection(&peer, identity, role)?;

        let replaced = {
            let mut registry = self.registry.lock();
            let replaced = registry
                .connections
                .insert(peer.clone(), Arc::clone(&connection));
            self.publish(&registry.connections);
            replaced
        };

        info!(peer = %peer, role = %connection.role(), "Registered peer");

        if let Some(old) = replaced {
            warn!(peer = %peer, "Replaced existing connection");
            old.detach();
            self.detach(&old);
        }

        Ok(connection)
    }

    /// Register a connection unless `peer` already has one or the registry
    /// is closed. The check and the insert happen under one lock hold.
    pub fn register_if_absent(
        &self,
        peer: PeerHandle,
        identity: Option<PeerIdentity>,
        role: Role,
    ) -> Result<Admission> {
        let connection = self.build_connection(&peer, identity, role)?;

        {
            let mut registry = self.registry.lock();
            if !registry.admitting {
                return Ok(Admission::Closed);
            }
            if registry.connections.contains_key(&peer) {
                return Ok(Admission::AlreadyRegistered);
            }
            registry
                .connections
                .insert(peer.clone(), Arc::clone(&connection));
            self.publish(&registry.connections);
        }

        info!(peer = %peer, role = %connection.role(), "Registered peer");
        Ok(Admission::Registered(connection))
    }

    /// Open or close the registry to [`register_if_absent`](Self::register_if_absent).
    pub fn set_admitting(&self, admitting: bool) {
        self.registry.lock().admitting = admitting;
    }

    pub fn is_admitting(&self) -> bool {
        self.registry.lock().admitting
    }

    /// Get a connection by peer handle.
    pub fn get(&self, peer: &PeerHandle) -> Option<Arc<Connection>> {
        self.registry.lock().connections.get(peer).cloned()
    }

    pub fn contains_peer(&self, peer: &PeerHandle) -> bool {
        self.registry.lock().connections.contains_key(peer)
    }

    /// Current registered peer handles.
    pub fn peers(&self) -> PeerSet {
        self.registry.lock().connections.keys().cloned().collect()
    }

    /// Watch the peer set. Each value is a full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PeerSet> {
        self.peers_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().connections.is_empty()
    }

    pub fn replicators(&self) -> &Replicators {
        &self.replicators
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// The transport session with `peer` reached connected.
    ///
    /// Active connections start their replicator, which opens the channel.
    /// Passive connections open immediately, sending `OK`; the listener is
    /// handed the connection once `CONNECT` arrives.
    pub fn start_connection(&self, peer: &PeerHandle) -> Result<()> {
        let Some(connection) = self.get(peer) else {
            debug!(peer = %peer, "Session connected for unregistered peer, ignoring");
            return Ok(());
        };

        match connection.role() {
            Role::Active => {
                if let Err(e) = self.replicators.start_replicator(&connection) {
                    self.remove_if_current(&connection);
                    return Err(e);
                }
            }
            Role::Passive => {
                let peer = peer.clone();
                connection.open(move |result| match result {
                    Ok(()) => debug!(peer = %peer, "Passive connection open"),
                    Err(e) => error!(peer = %peer, error = %e, "Passive connection failed to open"),
                });
            }
        }
        Ok(())
    }

    /// Tear down the connection for `peer` and remove it. No-op if absent.
    ///
    /// The transport session is always disconnected, whether or not the
    /// handshake completed.
    pub fn stop_connection(&self, peer: &PeerHandle) {
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.connections.remove(peer);
            if removed.is_some() {
                self.publish(&registry.connections);
            }
            removed
        };

        match removed {
            Some(connection) => {
                info!(peer = %peer, "Stopping connection");
                self.teardown(&connection);
            }
            None => debug!(peer = %peer, "Stop for unregistered peer, ignoring"),
        }
    }

    /// Tear down every connection.
    pub fn stop_all_connections(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut registry = self.registry.lock();
            let drained = registry.connections.drain().map(|(_, c)| c).collect();
            self.publish(&registry.connections);
            drained
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "Stopping all connections");
        }
        for connection in &drained {
            self.teardown(connection);
        }
    }

    /// Route inbound session bytes. No-op if the peer is unknown.
    pub fn receive_data(&self, peer: &PeerHandle, bytes: Bytes) {
        match self.get(peer) {
            Some(connection) => connection.receive(bytes),
            None => debug!(peer = %peer, len = bytes.len(), "Data for unregistered peer, dropping"),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn build_connection(
        &self,
        peer: &PeerHandle,
        identity: Option<PeerIdentity>,
        role: Role,
    ) -> Result<Arc<Connection>> {
        let role = match (role, identity) {
            (Role::Active, Some(identity)) => ConnectionRole::Active { identity },
            (Role::Active, None) => {
                return Err(MeshError::InvalidState {
                    expected: "peer identity for active connection".to_string(),
                    actual: "no identity".to_string(),
                })
            }
            (Role::Passive, _) => ConnectionRole::Passive,
        };

        Ok(Connection::new(
            peer.clone(),
            role,
            Arc::clone(&self.transport),
            Arc::clone(&self.listener),
        ))
    }

    /// Detach the replicator or listener binding. Called after the
    /// connection is closed, so no binding can be added behind it.
    fn detach(&self, connection: &Arc<Connection>) {
        match connection.role() {
            Role::Active => self.replicators.stop_replicator_for(connection),
            Role::Passive => {
                if connection.is_handed_off() {
                    self.listener.close(connection);
                }
            }
        }
    }

    fn teardown(&self, connection: &Arc<Connection>) {
        let peer = connection.peer().clone();
        connection.close(None, move || debug!(peer = %peer, "Connection torn down"));
        self.detach(connection);
    }

    fn remove_if_current(&self, connection: &Arc<Connection>) {
        let mut registry = self.registry.lock();
        let current = registry
            .connections
            .get(connection.peer())
            .is_some_and(|c| Arc::ptr_eq(c, connection));
        if current {
            registry.connections.remove(connection.peer());
            self.publish(&registry.connections);
        }
    }

    /// Publish a snapshot. Called with the registry lock held.
    fn publish(&self, connections: &HashMap<PeerHandle, Arc<Connection>>) {
        let set: PeerSet = connections.keys().cloned().collect();
        metrics::set_connected_peers(set.len());
        self.peers_tx.send_replace(set);
    }
}

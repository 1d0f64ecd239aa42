// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mesh coordinator.
//!
//! The application-facing orchestrator that ties together:
//! - Discovery (advertise + browse) via [`DiscoveryService`]
//! - Role resolution via [`resolve_role`]
//! - The peer registry via [`PeerManager`]
//! - Replication sessions via [`Replicators`]
//!
//! # Architecture
//!
//! The coordinator reacts to [`DiscoveryEvent`]s from the platform adapter:
//! 1. `PeerFound`: resolve the role from the advertised identity. The active
//!    side registers the peer and invites it; the passive side waits.
//! 2. `InvitationReceived`: accept (registering a passive connection) unless
//!    the peer is already registered.
//! 3. `SessionStateChanged`: start the connection on connect, tear it down on
//!    disconnect.
//! 4. `DataReceived`: route bytes to the peer's connection.
//!
//! Events can be handed over directly with [`MeshCoordinator::handle_event`]
//! or through a channel drained by [`MeshCoordinator::spawn_event_pump`].

mod replication;
mod types;

pub use replication::Replicators;
pub use types::CoordinatorState;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::identity::{resolve_role, PeerIdentity, Role};
use crate::metrics;
use crate::peer::{Admission, PeerManager, PeerSet};
use crate::replicator::{
    InboundListener, NoOpInboundListener, NoOpReplicationEngine, ReplicationEngine,
};
use crate::transport::{
    DiscoveryEvent, DiscoveryMetadata, DiscoveryService, PeerHandle, SessionState,
    SessionTransport,
};

/// The mesh coordinator.
///
/// Keeps a full mesh of connections to every peer advertising the same
/// service id, and runs one replication session per pairing.
pub struct MeshCoordinator {
    config: MeshConfig,

    /// Generated once per process, advertised in discovery metadata
    local_identity: PeerIdentity,

    discovery: Arc<dyn DiscoveryService>,

    peer_manager: Arc<PeerManager>,

    /// Coordinator state (broadcast to watchers)
    state_tx: watch::Sender<CoordinatorState>,

    /// Coordinator state receiver (for internal use)
    state_rx: watch::Receiver<CoordinatorState>,

    /// Dropped with the coordinator, which ends the event pump
    shutdown_tx: watch::Sender<bool>,

    /// Serializes start/stop
    lifecycle: Mutex<()>,
}

impl MeshCoordinator {
    /// Create a coordinator with a replication engine and inbound listener.
    ///
    /// The coordinator starts in `Created` state. Call [`start()`](Self::start)
    /// to begin advertising and browsing.
    pub fn new(
        config: MeshConfig,
        local_identity: PeerIdentity,
        discovery: Arc<dyn DiscoveryService>,
        transport: Arc<dyn SessionTransport>,
        engine: Arc<dyn ReplicationEngine>,
        listener: Arc<dyn InboundListener>,
    ) -> Result<Self> {
        config.validate()?;

        let replicators = Replicators::new(engine, config.replication.clone());
        let peer_manager = Arc::new(PeerManager::new(transport, listener, replicators));

        let (state_tx, state_rx) = watch::channel(CoordinatorState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            local_identity,
            discovery,
            peer_manager,
            state_tx,
            state_rx,
            shutdown_tx,
            lifecycle: Mutex::new(()),
        })
    }

    /// Create a coordinator with no-op replication (for testing/standalone).
    pub fn standalone(
        config: MeshConfig,
        local_identity: PeerIdentity,
        discovery: Arc<dyn DiscoveryService>,
        transport: Arc<dyn SessionTransport>,
    ) -> Result<Self> {
        Self::new(
            config,
            local_identity,
            discovery,
            transport,
            Arc::new(NoOpReplicationEngine),
            Arc::new(NoOpInboundListener),
        )
    }

    /// Get current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local_identity
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Get the peer manager (for diagnostics).
    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peer_manager
    }

    /// Current registered peers.
    pub fn current_peers(&self) -> PeerSet {
        self.peer_manager.peers()
    }

    /// Watch the peer set. Each value is a full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PeerSet> {
        self.peer_manager.subscribe()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start advertising and browsing.
    ///
    /// Valid from `Created` or `Stopped`.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let state = self.state();
        if !state.can_start() {
            return Err(MeshError::InvalidState {
                expected: "Created or Stopped".to_string(),
                actual: state.to_string(),
            });
        }

        info!(
            identity = %self.local_identity,
            service_id = %self.config.service_id,
            "Starting mesh coordinator"
        );

        let metadata = DiscoveryMetadata::from([(
            self.config.identity_key.clone(),
            self.local_identity.to_string(),
        )]);
        self.discovery
            .start_advertising(&self.config.service_id, metadata)?;

        if let Err(e) = self.discovery.start_browsing(&self.config.service_id) {
            warn!(error = %e, "Failed to start browsing");
            self.discovery.stop_advertising();
            return Err(e);
        }

        self.peer_manager.set_admitting(true);
        self.state_tx.send_replace(CoordinatorState::Running);
        metrics::set_coordinator_state("Running");
        info!("Mesh coordinator running");
        Ok(())
    }

    /// Stop advertising and browsing and tear down every connection.
    ///
    /// Idempotent. New registrations are refused before the registry is
    /// drained, so events handled during teardown cannot leave a connection
    /// behind.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();

        let state = self.state();
        if state == CoordinatorState::Stopped {
            return;
        }

        info!("Stopping mesh coordinator");
        self.state_tx.send_replace(CoordinatorState::Stopping);
        metrics::set_coordinator_state("Stopping");
        self.peer_manager.set_admitting(false);

        if state == CoordinatorState::Running {
            self.discovery.stop_advertising();
            self.discovery.stop_browsing();
        }

        self.peer_manager.stop_all_connections();

        self.state_tx.send_replace(CoordinatorState::Stopped);
        metrics::set_coordinator_state("Stopped");
        info!("Mesh coordinator stopped");
    }

    // =========================================================================
    // Discovery events
    // =========================================================================

    /// Dispatch one event from the discovery/transport adapter.
    pub fn handle_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::PeerFound { peer, metadata } => {
                let identity = metadata
                    .get(&self.config.identity_key)
                    .map(|id| PeerIdentity::new(id.as_str()));
                self.handle_peer_found(peer, identity);
            }
            DiscoveryEvent::PeerLost { peer } => {
                // Session state drives teardown, not advertisement loss.
                debug!(peer = %peer, "Peer lost");
            }
            DiscoveryEvent::InvitationReceived { peer, reply } => {
                let accepted = self.handle_invitation(&peer);
                if reply.send(accepted).is_err() {
                    debug!(peer = %peer, "Invitation reply dropped by adapter");
                }
            }
            DiscoveryEvent::SessionStateChanged { peer, state } => {
                self.handle_session_state(&peer, state);
            }
            DiscoveryEvent::DataReceived { peer, bytes } => {
                self.peer_manager.receive_data(&peer, bytes);
            }
        }
    }

    fn handle_peer_found(&self, peer: PeerHandle, identity: Option<PeerIdentity>) {
        if !self.is_running() {
            debug!(peer = %peer, "Ignoring peer found while not running");
            return;
        }

        let Some(identity) = identity else {
            debug!(peer = %peer, "Ignoring peer without identity");
            return;
        };

        if identity == self.local_identity {
            debug!(peer = %peer, "Ignoring self");
            return;
        }

        let role = resolve_role(&self.local_identity, &identity);
        debug!(peer = %peer, identity = %identity, role = %role, "Peer found");

        if role == Role::Passive {
            // The peer resolves to active and will invite us.
            return;
        }

        match self
            .peer_manager
            .register_if_absent(peer.clone(), Some(identity), Role::Active)
        {
            Ok(Admission::Registered(_)) => {}
            Ok(Admission::AlreadyRegistered) => {
                debug!(peer = %peer, "Peer already registered, not inviting");
                return;
            }
            Ok(Admission::Closed) => {
                debug!(peer = %peer, "Ignoring peer found while stopping");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to register peer");
                return;
            }
        }

        match self
            .discovery
            .invite(&peer, self.config.invite_timeout_duration())
        {
            Ok(()) => {
                info!(peer = %peer, "Invited peer");
                metrics::record_invite_sent("sent");
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to invite peer");
                metrics::record_invite_sent("failed");
                self.peer_manager.stop_connection(&peer);
            }
        }
    }

    /// Decide an inbound invitation. Accepting registers a passive
    /// connection.
    pub fn handle_invitation(&self, peer: &PeerHandle) -> bool {
        if !self.is_running() {
            debug!(peer = %peer, "Rejecting invitation while not running");
            metrics::record_invitation("rejected");
            return false;
        }

        match self
            .peer_manager
            .register_if_absent(peer.clone(), None, Role::Passive)
        {
            Ok(Admission::Registered(_)) => {
                info!(peer = %peer, "Accepted invitation");
                metrics::record_invitation("accepted");
                true
            }
            Ok(Admission::AlreadyRegistered) => {
                debug!(peer = %peer, "Rejecting invitation from registered peer");
                metrics::record_invitation("rejected");
                false
            }
            Ok(Admission::Closed) => {
                debug!(peer = %peer, "Rejecting invitation while stopping");
                metrics::record_invitation("rejected");
                false
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to register invited peer");
                metrics::record_invitation("rejected");
                false
            }
        }
    }

    fn handle_session_state(&self, peer: &PeerHandle, state: SessionState) {
        debug!(peer = %peer, state = %state, "Session state changed");
        match state {
            SessionState::Connecting => {}
            SessionState::Connected => {
                if let Err(e) = self.peer_manager.start_connection(peer) {
                    warn!(peer = %peer, error = %e, "Failed to start connection");
                }
            }
            SessionState::Disconnected => self.peer_manager.stop_connection(peer),
        }
    }

    /// Drain `events` on a tokio task until the sender side closes or the
    /// coordinator is dropped.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) -> JoinHandle<()> {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Event channel closed, pump stopping");
                            break;
                        };
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        coordinator.handle_event(event);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Coordinator gone, pump stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Drop for MeshCoordinator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

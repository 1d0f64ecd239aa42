//! Recording mocks for the transport, discovery and replication collaborators.
//!
//! Every mock records the calls made to it for assertions.

use bytes::Bytes;
use mesh_link::connection::Connection;
use mesh_link::error::{MeshError, Result};
use mesh_link::identity::PeerIdentity;
use mesh_link::replicator::{
    InboundListener, ReplicationEngine, ReplicationSession, ReplicationTarget,
};
use mesh_link::transport::{DiscoveryMetadata, DiscoveryService, PeerHandle, SessionTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Transport
// =============================================================================

/// Session transport that records sends and disconnects.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(PeerHandle, Bytes)>>,
    disconnects: Mutex<Vec<PeerHandle>>,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Bytes sent to `peer`, in order.
    pub fn sent_to(&self, peer: &PeerHandle) -> Vec<Bytes> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn disconnects(&self) -> Vec<PeerHandle> {
        self.disconnects.lock().clone()
    }

    pub fn disconnect_count(&self, peer: &PeerHandle) -> usize {
        self.disconnects.lock().iter().filter(|p| *p == peer).count()
    }
}

impl SessionTransport for RecordingTransport {
    fn send(&self, peer: &PeerHandle, bytes: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(MeshError::transport(peer.as_str(), "simulated send failure"));
        }
        self.sent.lock().push((peer.clone(), bytes));
        Ok(())
    }

    fn disconnect(&self, peer: &PeerHandle) {
        self.disconnects.lock().push(peer.clone());
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Discovery service that records lifecycle calls and invites.
#[derive(Default)]
pub struct MockDiscovery {
    advertising: Mutex<Option<(String, DiscoveryMetadata)>>,
    browsing: Mutex<Option<String>>,
    invites: Mutex<Vec<(PeerHandle, Duration)>>,
}

impl MockDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advertising(&self) -> Option<(String, DiscoveryMetadata)> {
        self.advertising.lock().clone()
    }

    pub fn browsing(&self) -> Option<String> {
        self.browsing.lock().clone()
    }

    pub fn invites(&self) -> Vec<(PeerHandle, Duration)> {
        self.invites.lock().clone()
    }
}

impl DiscoveryService for MockDiscovery {
    fn start_advertising(&self, service_id: &str, metadata: DiscoveryMetadata) -> Result<()> {
        *self.advertising.lock() = Some((service_id.to_string(), metadata));
        Ok(())
    }

    fn stop_advertising(&self) {
        *self.advertising.lock() = None;
    }

    fn start_browsing(&self, service_id: &str) -> Result<()> {
        *self.browsing.lock() = Some(service_id.to_string());
        Ok(())
    }

    fn stop_browsing(&self) {
        *self.browsing.lock() = None;
    }

    fn invite(&self, peer: &PeerHandle, timeout: Duration) -> Result<()> {
        self.invites.lock().push((peer.clone(), timeout));
        Ok(())
    }
}

// =============================================================================
// Replication engine
// =============================================================================

/// A session start seen by [`MockReplicationEngine`].
#[derive(Debug, Clone)]
pub struct StartCall {
    pub target_id: PeerIdentity,
    pub peer: PeerHandle,
    pub collections: Vec<String>,
}

/// Replication engine that opens the channel on start, like a real engine,
/// and records starts, open results and stops.
#[derive(Default)]
pub struct MockReplicationEngine {
    starts: Mutex<Vec<StartCall>>,
    open_results: Arc<Mutex<Vec<(PeerHandle, Result<()>)>>>,
    stops: Arc<Mutex<Vec<PeerHandle>>>,
}

struct MockSession {
    peer: PeerHandle,
    stops: Arc<Mutex<Vec<PeerHandle>>>,
}

impl ReplicationSession for MockSession {
    fn stop(&self) {
        self.stops.lock().push(self.peer.clone());
    }
}

impl MockReplicationEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> Vec<StartCall> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<PeerHandle> {
        self.stops.lock().clone()
    }

    /// Open completions per peer, as (peer, succeeded).
    pub fn open_outcomes(&self) -> Vec<(PeerHandle, bool)> {
        self.open_results
            .lock()
            .iter()
            .map(|(p, r)| (p.clone(), r.is_ok()))
            .collect()
    }

    /// The error of the first failed open for `peer`.
    pub fn open_error(&self, peer: &PeerHandle) -> Option<MeshError> {
        self.open_results
            .lock()
            .iter()
            .find_map(|(p, r)| match r {
                Err(e) if p == peer => Some(e.clone()),
                _ => None,
            })
    }
}

impl ReplicationEngine for MockReplicationEngine {
    fn start_session(&self, target: ReplicationTarget) -> Result<Box<dyn ReplicationSession>> {
        self.starts.lock().push(StartCall {
            target_id: target.target_id.clone(),
            peer: target.peer.clone(),
            collections: target.collections.clone(),
        });

        let results = Arc::clone(&self.open_results);
        let peer = target.peer.clone();
        target
            .channel
            .open(move |result| results.lock().push((peer, result)));

        Ok(Box::new(MockSession {
            peer: target.peer,
            stops: Arc::clone(&self.stops),
        }))
    }
}

// =============================================================================
// Inbound listener
// =============================================================================

/// Listener that records accepted and closed passive connections.
#[derive(Default)]
pub struct MockListener {
    accepted: Mutex<Vec<Arc<Connection>>>,
    closed: Mutex<Vec<PeerHandle>>,
}

impl MockListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accepted(&self) -> Vec<PeerHandle> {
        self.accepted.lock().iter().map(|c| c.peer().clone()).collect()
    }

    pub fn accepted_connection(&self, peer: &PeerHandle) -> Option<Arc<Connection>> {
        self.accepted
            .lock()
            .iter()
            .find(|c| c.peer() == peer)
            .cloned()
    }

    pub fn closed(&self) -> Vec<PeerHandle> {
        self.closed.lock().clone()
    }
}

impl InboundListener for MockListener {
    fn accept(&self, connection: Arc<Connection>) {
        self.accepted.lock().push(connection);
    }

    fn close(&self, connection: &Arc<Connection>) {
        self.closed.lock().push(connection.peer().clone());
    }
}

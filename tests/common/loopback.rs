//! In-memory network joining several coordinators.
//!
//! Each node gets a [`NodeAdapter`] acting as both its discovery service and
//! its session transport. Advertisements, invitations, session state and
//! data are delivered as [`DiscoveryEvent`]s on the node's event channel,
//! drained by the coordinator's event pump.

use super::mock_transport::{MockListener, MockReplicationEngine};
use bytes::Bytes;
use mesh_link::config::MeshConfig;
use mesh_link::coordinator::MeshCoordinator;
use mesh_link::error::{MeshError, Result};
use mesh_link::identity::PeerIdentity;
use mesh_link::transport::{
    DiscoveryEvent, DiscoveryMetadata, DiscoveryService, PeerHandle, SessionState,
    SessionTransport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const SERVICE_ID: &str = "loopback";

struct NodeState {
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    advert: Option<(String, DiscoveryMetadata)>,
    browsing: Option<String>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<PeerHandle, NodeState>,
    /// Established sessions, keyed by (smaller, larger) handle
    sessions: HashSet<(PeerHandle, PeerHandle)>,
}

impl NetworkState {
    fn deliver(&self, to: &PeerHandle, event: DiscoveryEvent) {
        if let Some(node) = self.nodes.get(to) {
            let _ = node.events.send(event);
        }
    }
}

fn session_key(a: &PeerHandle, b: &PeerHandle) -> (PeerHandle, PeerHandle) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

/// One node: a coordinator plus its recording collaborators.
pub struct TestNode {
    pub handle: PeerHandle,
    pub coordinator: Arc<MeshCoordinator>,
    pub engine: Arc<MockReplicationEngine>,
    pub listener: Arc<MockListener>,
    pub pump: JoinHandle<()>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node named `name` with role-resolution identity `identity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_node(&self, name: &str, identity: &str) -> TestNode {
        let handle = PeerHandle::from(name);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.state.lock().nodes.insert(
            handle.clone(),
            NodeState {
                events: events_tx,
                advert: None,
                browsing: None,
            },
        );

        let adapter = Arc::new(NodeAdapter {
            name: handle.clone(),
            network: Arc::clone(&self.state),
        });
        let engine = MockReplicationEngine::new();
        let listener = MockListener::new();

        let coordinator = Arc::new(
            MeshCoordinator::new(
                MeshConfig::for_testing(SERVICE_ID),
                PeerIdentity::from(identity),
                adapter.clone(),
                adapter,
                engine.clone(),
                listener.clone(),
            )
            .expect("valid test config"),
        );
        let pump = coordinator.spawn_event_pump(events_rx);

        TestNode {
            handle,
            coordinator,
            engine,
            listener,
            pump,
        }
    }

    pub fn has_session(&self, a: &PeerHandle, b: &PeerHandle) -> bool {
        self.state.lock().sessions.contains(&session_key(a, b))
    }

    /// Inject raw bytes from `from` to `to`, bypassing the sender's
    /// connection.
    pub fn inject(&self, from: &PeerHandle, to: &PeerHandle, bytes: Bytes) {
        self.state.lock().deliver(
            to,
            DiscoveryEvent::DataReceived {
                peer: from.clone(),
                bytes,
            },
        );
    }
}

/// Discovery service and session transport for one node.
pub struct NodeAdapter {
    name: PeerHandle,
    network: Arc<Mutex<NetworkState>>,
}

impl DiscoveryService for NodeAdapter {
    fn start_advertising(&self, service_id: &str, metadata: DiscoveryMetadata) -> Result<()> {
        let mut state = self.network.lock();
        if let Some(node) = state.nodes.get_mut(&self.name) {
            node.advert = Some((service_id.to_string(), metadata.clone()));
        }
        for (handle, node) in &state.nodes {
            if handle != &self.name && node.browsing.as_deref() == Some(service_id) {
                let _ = node.events.send(DiscoveryEvent::PeerFound {
                    peer: self.name.clone(),
                    metadata: metadata.clone(),
                });
            }
        }
        Ok(())
    }

    fn stop_advertising(&self) {
        let mut state = self.network.lock();
        let service = state
            .nodes
            .get_mut(&self.name)
            .and_then(|node| node.advert.take())
            .map(|(service, _)| service);
        let Some(service) = service else { return };
        for (handle, node) in &state.nodes {
            if handle != &self.name && node.browsing.as_deref() == Some(service.as_str()) {
                let _ = node.events.send(DiscoveryEvent::PeerLost {
                    peer: self.name.clone(),
                });
            }
        }
    }

    fn start_browsing(&self, service_id: &str) -> Result<()> {
        let mut state = self.network.lock();
        if let Some(node) = state.nodes.get_mut(&self.name) {
            node.browsing = Some(service_id.to_string());
        }
        let found: Vec<DiscoveryEvent> = state
            .nodes
            .iter()
            .filter(|(handle, _)| *handle != &self.name)
            .filter_map(|(handle, node)| match &node.advert {
                Some((service, metadata)) if service == service_id => {
                    Some(DiscoveryEvent::PeerFound {
                        peer: handle.clone(),
                        metadata: metadata.clone(),
                    })
                }
                _ => None,
            })
            .collect();
        for event in found {
            state.deliver(&self.name, event);
        }
        Ok(())
    }

    fn stop_browsing(&self) {
        if let Some(node) = self.network.lock().nodes.get_mut(&self.name) {
            node.browsing = None;
        }
    }

    fn invite(&self, peer: &PeerHandle, timeout: Duration) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let state = self.network.lock();
            let target = state
                .nodes
                .get(peer)
                .ok_or_else(|| MeshError::transport(peer.as_str(), "unknown peer"))?;
            target
                .events
                .send(DiscoveryEvent::InvitationReceived {
                    peer: self.name.clone(),
                    reply: reply_tx,
                })
                .map_err(|_| MeshError::transport(peer.as_str(), "peer gone"))?;
        }

        let network = Arc::clone(&self.network);
        let me = self.name.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let accepted = matches!(tokio::time::timeout(timeout, reply_rx).await, Ok(Ok(true)));
            let mut state = network.lock();
            if accepted {
                state.sessions.insert(session_key(&me, &peer));
                // Invitee first, so its Connected precedes any data from us.
                state.deliver(
                    &peer,
                    DiscoveryEvent::SessionStateChanged {
                        peer: me.clone(),
                        state: SessionState::Connected,
                    },
                );
                state.deliver(
                    &me,
                    DiscoveryEvent::SessionStateChanged {
                        peer,
                        state: SessionState::Connected,
                    },
                );
            } else {
                state.deliver(
                    &me,
                    DiscoveryEvent::SessionStateChanged {
                        peer,
                        state: SessionState::Disconnected,
                    },
                );
            }
        });
        Ok(())
    }
}

impl SessionTransport for NodeAdapter {
    fn send(&self, peer: &PeerHandle, bytes: Bytes) -> Result<()> {
        let state = self.network.lock();
        if !state.sessions.contains(&session_key(&self.name, peer)) {
            return Err(MeshError::transport(peer.as_str(), "no session"));
        }
        state.deliver(
            peer,
            DiscoveryEvent::DataReceived {
                peer: self.name.clone(),
                bytes,
            },
        );
        Ok(())
    }

    fn disconnect(&self, peer: &PeerHandle) {
        let mut state = self.network.lock();
        if state.sessions.remove(&session_key(&self.name, peer)) {
            state.deliver(
                peer,
                DiscoveryEvent::SessionStateChanged {
                    peer: self.name.clone(),
                    state: SessionState::Disconnected,
                },
            );
            state.deliver(
                &self.name,
                DiscoveryEvent::SessionStateChanged {
                    peer: peer.clone(),
                    state: SessionState::Disconnected,
                },
            );
        }
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

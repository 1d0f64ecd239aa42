// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Mesh Link
//!
//! Peer connection lifecycle for a full-mesh local-network replication setup.
//! Every process advertises and browses the same service; each discovered
//! pairing gets exactly one connection, over which a replication engine runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                               mesh-link                                   │
//! │                                                                           │
//! │  discovery adapter                                                        │
//! │        │ DiscoveryEvent                                                   │
//! │        ▼                                                                  │
//! │  ┌────────────────┐  resolve_role  ┌─────────────┐                        │
//! │  │ MeshCoordinator│───────────────►│ PeerManager │──► peer set (watch)    │
//! │  └────────────────┘                └──────┬──────┘                        │
//! │                                           │ one per peer                  │
//! │                                           ▼                               │
//! │                                    ┌────────────┐  CONNECT / OK           │
//! │                                    │ Connection │◄──────────► transport   │
//! │                                    └─────┬──────┘                         │
//! │                      active              │              passive           │
//! │               ┌──────────────────────────┴─────────────────────┐          │
//! │               ▼                                                ▼          │
//! │      ┌─────────────────┐                             ┌─────────────────┐  │
//! │      │   Replicators   │                             │ InboundListener │  │
//! │      │ (engine session)│                             │ (engine accept) │  │
//! │      └─────────────────┘                             └─────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Roles
//!
//! Of any two peers, the one with the byte-wise smaller identity is
//! **active**: it invites the other, sends `CONNECT` and starts the
//! replication session. The other is **passive**: it accepts the invitation,
//! answers `OK` and hands the connection to the inbound listener.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mesh_link::{MeshConfig, MeshCoordinator, PeerIdentity};
//! # use mesh_link::transport::{DiscoveryService, SessionTransport};
//! # use std::sync::Arc;
//! # fn adapter() -> (Arc<dyn DiscoveryService>, Arc<dyn SessionTransport>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() {
//!     let (discovery, transport) = adapter();
//!     let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let coordinator = Arc::new(
//!         MeshCoordinator::standalone(
//!             MeshConfig::default(),
//!             PeerIdentity::generate(),
//!             discovery,
//!             transport,
//!         )
//!         .expect("valid config"),
//!     );
//!     coordinator.spawn_event_pump(events_rx);
//!     coordinator.start().expect("Failed to start");
//!
//!     // The adapter feeds events_tx; watch the peer set.
//!     let mut peers = coordinator.subscribe();
//!     while peers.changed().await.is_ok() {
//!         println!("{} peers", peers.borrow().len());
//!     }
//!     # drop(events_tx);
//!
//!     coordinator.stop();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod peer;
pub mod protocol;
pub mod replicator;
pub mod transport;

// Re-exports for convenience
pub use config::{MeshConfig, ReplicationMode, ReplicationSettings};
pub use connection::{Connection, HandshakeState};
pub use coordinator::{CoordinatorState, MeshCoordinator, Replicators};
pub use error::{MeshError, Result};
pub use identity::{resolve_role, PeerIdentity, Role};
pub use peer::{Admission, PeerManager, PeerSet};
pub use replicator::{
    InboundListener, MessageReceiver, NoOpInboundListener, NoOpReplicationEngine,
    ReplicationEngine, ReplicationSession, ReplicationTarget,
};
pub use transport::{
    DiscoveryEvent, DiscoveryMetadata, DiscoveryService, PeerHandle, SessionState,
    SessionTransport,
};

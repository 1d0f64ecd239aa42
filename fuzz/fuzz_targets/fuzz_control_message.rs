//! Fuzz target for handshake control-token decoding and the connection
//! state machine.
//!
//! Decoding must never panic, and a connection fed arbitrary messages must
//! end up either connected or closed, never both.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mesh_link::connection::{Connection, ConnectionRole, HandshakeState};
use mesh_link::error::Result;
use mesh_link::identity::PeerIdentity;
use mesh_link::protocol::ControlMessage;
use mesh_link::replicator::NoOpInboundListener;
use mesh_link::transport::{PeerHandle, SessionTransport};
use std::sync::Arc;

struct NullTransport;

impl SessionTransport for NullTransport {
    fn send(&self, _peer: &PeerHandle, _bytes: Bytes) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self, _peer: &PeerHandle) {}
}

fuzz_target!(|data: (bool, Vec<Vec<u8>>)| {
    let (active, messages) = data;

    for message in &messages {
        if let Some(token) = ControlMessage::decode(message) {
            assert_eq!(token.as_bytes(), &message[..]);
        }
    }

    let role = if active {
        ConnectionRole::Active {
            identity: PeerIdentity::from("remote"),
        }
    } else {
        ConnectionRole::Passive
    };
    let conn = Connection::new(
        PeerHandle::from("peer"),
        role,
        Arc::new(NullTransport),
        Arc::new(NoOpInboundListener),
    );
    conn.open(|_| {});

    for message in messages {
        conn.receive(Bytes::from(message));
    }

    if conn.handshake_state() == HandshakeState::Closed {
        assert!(!conn.is_connected());
    }
});

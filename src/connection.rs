// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-peer connection and handshake state machine.
//!
//! One [`Connection`] exists per registered peer. It wraps the session
//! transport, runs the `CONNECT`/`OK` handshake and then acts as the opaque
//! message channel the replication engine runs over.
//!
//! # Handshake
//!
//! ```text
//! Active:   Created ──open()/send CONNECT──► HandshakeSent ──recv OK──► Connected
//! Passive:  Created ──open()/send OK──────► AwaitingHandshake ──recv CONNECT──► Connected
//!              │                                  │                                │
//!              └──────── close() / send failure / protocol violation ──────────────┴──► Closed
//! ```
//!
//! - The active side is usable once `OK` arrives. An `OK` that arrives before
//!   `CONNECT` went out is remembered and completes the open as soon as it
//!   does.
//! - The passive side is usable as soon as `OK` has been handed to the
//!   transport. Receiving `CONNECT` hands the connection to the
//!   [`InboundListener`] exactly once, whether it arrives before or after
//!   `OK` was sent.
//! - Until the handshake completes every received message is a control
//!   token. Anything unexpected is a protocol violation and closes the
//!   connection; it is never retried.
//! - After the handshake, received bytes go verbatim to the bound
//!   [`MessageReceiver`]. Bytes that arrive before a receiver is bound are
//!   buffered and flushed in order on bind.
//!
//! # Locking
//!
//! All state lives behind one per-connection mutex. Transport calls,
//! completion callbacks, listener hand-off and receiver delivery all happen
//! after the lock is released, so a callback may call back into the same
//! connection.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::error::{MeshError, Result};
use crate::identity::{PeerIdentity, Role};
use crate::metrics;
use crate::protocol::{self, ControlMessage};
use crate::replicator::{InboundListener, MessageReceiver};
use crate::transport::{PeerHandle, SessionTransport};

/// Completion for [`Connection::open`]. Fires exactly once.
pub type OpenCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Handshake position of a connection.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Registered, nothing sent yet.
    Created,
    /// Active side sent `CONNECT`, waiting for `OK`.
    HandshakeSent,
    /// Passive side sent `OK`, waiting for `CONNECT`.
    AwaitingHandshake,
    /// Handshake complete; bytes are replication payload.
    Connected,
    /// Terminal.
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeState::Created => write!(f, "created"),
            HandshakeState::HandshakeSent => write!(f, "handshake_sent"),
            HandshakeState::AwaitingHandshake => write!(f, "awaiting_handshake"),
            HandshakeState::Connected => write!(f, "connected"),
            HandshakeState::Closed => write!(f, "closed"),
        }
    }
}

/// Role of a connection, fixed at creation.
///
/// Only the active side learned the remote identity through discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRole {
    Active { identity: PeerIdentity },
    Passive,
}

impl ConnectionRole {
    pub fn role(&self) -> Role {
        match self {
            ConnectionRole::Active { .. } => Role::Active,
            ConnectionRole::Passive => Role::Passive,
        }
    }
}

/// Mutable state, guarded by the connection's mutex.
struct ConnectionState {
    handshake: HandshakeState,
    /// `open()` has been called and not yet resolved or failed.
    opening: bool,
    /// Passive: `OK` was accepted by the transport.
    ok_sent: bool,
    /// Active: `OK` arrived before `CONNECT` was sent.
    early_ok: bool,
    /// Passive: connection was given to the inbound listener.
    handed_off: bool,
    pending_open: Option<OpenCallback>,
    receiver: Option<Arc<dyn MessageReceiver>>,
    buffered: Vec<Bytes>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            handshake: HandshakeState::Created,
            opening: false,
            ok_sent: false,
            early_ok: false,
            handed_off: false,
            pending_open: None,
            receiver: None,
            buffered: Vec::new(),
        }
    }
}

/// Message channel to one peer.
pub struct Connection {
    peer: PeerHandle,
    role: ConnectionRole,
    transport: Arc<dyn SessionTransport>,
    listener: Arc<dyn InboundListener>,
    this: Weak<Connection>,
    state: Mutex<ConnectionState>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.handshake_state())
            .finish()
    }
}

impl Connection {
    /// Create a connection for a freshly established (or invited) session.
    pub fn new(
        peer: PeerHandle,
        role: ConnectionRole,
        transport: Arc<dyn SessionTransport>,
        listener: Arc<dyn InboundListener>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            peer,
            role,
            transport,
            listener,
            this: this.clone(),
            state: Mutex::new(ConnectionState::new()),
        })
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.role.role()
    }

    /// Remote identity, present only on the active side.
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match &self.role {
            ConnectionRole::Active { identity } => Some(identity),
            ConnectionRole::Passive => None,
        }
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.state.lock().handshake
    }

    /// Whether the connection may carry replication payload.
    pub fn is_connected(&self) -> bool {
        let st = self.state.lock();
        self.is_usable(&st)
    }

    /// Passive: whether the connection was handed to the inbound listener.
    pub fn is_handed_off(&self) -> bool {
        self.state.lock().handed_off
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().handshake == HandshakeState::Closed
    }

    fn is_usable(&self, st: &ConnectionState) -> bool {
        match self.role.role() {
            Role::Active => st.handshake == HandshakeState::Connected,
            Role::Passive => st.ok_sent && st.handshake != HandshakeState::Closed,
        }
    }

    /// Whether received bytes are payload rather than control tokens.
    fn handshake_complete(&self, st: &ConnectionState) -> bool {
        match self.role.role() {
            Role::Active => st.handshake == HandshakeState::Connected,
            Role::Passive => st.handed_off,
        }
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Begin the handshake.
    ///
    /// `on_complete` fires exactly once: with `Ok(())` when the connection
    /// becomes usable, or with a non-retryable error if the control message
    /// cannot be sent, the peer violates the protocol, or the connection is
    /// closed first.
    pub fn open<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let mut st = self.state.lock();

        if st.handshake == HandshakeState::Closed {
            drop(st);
            on_complete(Err(self.closed_error()));
            return;
        }
        if self.is_usable(&st) {
            drop(st);
            on_complete(Ok(()));
            return;
        }
        if st.opening {
            drop(st);
            on_complete(Err(MeshError::handshake(
                self.peer.as_str(),
                "open already in progress",
            )));
            return;
        }
        st.opening = true;

        match self.role.role() {
            Role::Active => {
                st.handshake = HandshakeState::HandshakeSent;
                st.pending_open = Some(Box::new(on_complete));
                drop(st);
                self.send_connect();
            }
            Role::Passive => {
                drop(st);
                self.send_ok(Box::new(on_complete));
            }
        }
    }

    fn send_connect(&self) {
        debug!(peer = %self.peer, "Sending CONNECT");

        if let Err(e) = self
            .transport
            .send(&self.peer, ControlMessage::Connect.encode())
        {
            self.fail_handshake(ControlMessage::Connect, e);
            return;
        }

        // OK may already have arrived while CONNECT was in flight or before it.
        let completion = {
            let mut st = self.state.lock();
            if st.handshake == HandshakeState::HandshakeSent && st.early_ok {
                st.handshake = HandshakeState::Connected;
                st.opening = false;
                st.pending_open.take()
            } else {
                None
            }
        };

        if let Some(on_complete) = completion {
            self.handshake_succeeded();
            on_complete(Ok(()));
        }
    }

    fn send_ok(&self, on_complete: OpenCallback) {
        debug!(peer = %self.peer, "Sending OK");

        if let Err(e) = self.transport.send(&self.peer, ControlMessage::Ok.encode()) {
            self.state.lock().pending_open = Some(on_complete);
            self.fail_handshake(ControlMessage::Ok, e);
            return;
        }

        let closed = {
            let mut st = self.state.lock();
            st.opening = false;
            if st.handshake == HandshakeState::Closed {
                true
            } else {
                st.ok_sent = true;
                if st.handshake == HandshakeState::Created {
                    st.handshake = HandshakeState::AwaitingHandshake;
                }
                false
            }
        };

        if closed {
            on_complete(Err(self.closed_error()));
        } else {
            self.handshake_succeeded();
            on_complete(Ok(()));
        }
    }

    fn fail_handshake(&self, token: ControlMessage, cause: MeshError) {
        warn!(peer = %self.peer, token = %token, error = %cause, "Failed to send handshake message");
        metrics::record_handshake(self.role.role(), "send_failed");
        let err = MeshError::handshake(
            self.peer.as_str(),
            format!("failed to send {}: {}", token, cause),
        );
        self.shutdown(Some(err), true);
    }

    fn handshake_succeeded(&self) {
        info!(peer = %self.peer, role = %self.role.role(), "Connection established");
        metrics::record_handshake(self.role.role(), "success");
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Handle bytes that arrived on the session.
    pub fn receive(&self, bytes: Bytes) {
        let mut st = self.state.lock();

        if st.handshake == HandshakeState::Closed {
            debug!(peer = %self.peer, len = bytes.len(), "Dropping bytes for closed connection");
            return;
        }

        if self.handshake_complete(&st) {
            match st.receiver.clone() {
                Some(receiver) => {
                    drop(st);
                    receiver.on_message(bytes);
                }
                None => st.buffered.push(bytes),
            }
            return;
        }

        let token = ControlMessage::decode(&bytes);
        match (self.role.role(), token) {
            (Role::Active, Some(ControlMessage::Ok)) => {
                if st.handshake == HandshakeState::HandshakeSent {
                    st.handshake = HandshakeState::Connected;
                    st.opening = false;
                    let completion = st.pending_open.take();
                    drop(st);
                    debug!(peer = %self.peer, "Received OK");
                    self.handshake_succeeded();
                    if let Some(on_complete) = completion {
                        on_complete(Ok(()));
                    }
                } else {
                    debug!(peer = %self.peer, "Received OK before CONNECT was sent");
                    st.early_ok = true;
                }
            }
            (Role::Passive, Some(ControlMessage::Connect)) => {
                st.handed_off = true;
                st.handshake = HandshakeState::Connected;
                drop(st);
                debug!(peer = %self.peer, "Received CONNECT, handing off to listener");
                if let Some(this) = self.this.upgrade() {
                    self.listener.accept(this);
                }
            }
            (role, _) => {
                drop(st);
                let expected = match role {
                    Role::Active => ControlMessage::Ok,
                    Role::Passive => ControlMessage::Connect,
                };
                let err = MeshError::ProtocolViolation {
                    peer: self.peer.to_string(),
                    expected: expected.to_string(),
                    actual: protocol::describe(&bytes),
                };
                error!(peer = %self.peer, role = %role, error = %err, "Handshake protocol violation");
                metrics::record_protocol_violation(role);
                self.shutdown(Some(err), true);
            }
        }
    }

    // =========================================================================
    // Send / receiver binding
    // =========================================================================

    /// Send replication payload to the peer.
    pub fn send(&self, bytes: Bytes) -> Result<()> {
        {
            let st = self.state.lock();
            if st.handshake == HandshakeState::Closed {
                return Err(self.closed_error());
            }
            if !self.is_usable(&st) {
                return Err(MeshError::NotConnected {
                    peer: self.peer.to_string(),
                });
            }
        }
        self.transport.send(&self.peer, bytes)
    }

    /// Attach the replication engine's receiving half. Bytes buffered since
    /// the handshake completed are delivered first, in order.
    pub fn bind_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        loop {
            let batch = {
                let mut st = self.state.lock();
                if st.handshake == HandshakeState::Closed {
                    drop(st);
                    receiver.on_closed(None);
                    return;
                }
                if st.buffered.is_empty() {
                    st.receiver = Some(receiver);
                    return;
                }
                std::mem::take(&mut st.buffered)
            };
            for bytes in batch {
                receiver.on_message(bytes);
            }
        }
    }

    /// Detach the bound receiver, if any.
    pub fn unbind_receiver(&self) -> Option<Arc<dyn MessageReceiver>> {
        self.state.lock().receiver.take()
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the connection: tears down the session and detaches the bound
    /// receiver. Idempotent; `on_complete` always fires.
    pub fn close<F>(&self, error: Option<MeshError>, on_complete: F)
    where
        F: FnOnce(),
    {
        self.shutdown(error, true);
        on_complete();
    }

    /// Close without disconnecting the transport session. Used when a newer
    /// connection for the same peer handle has replaced this one.
    pub(crate) fn detach(&self) {
        self.shutdown(None, false);
    }

    /// Returns `false` if the connection was already closed.
    fn shutdown(&self, error: Option<MeshError>, disconnect: bool) -> bool {
        let (pending_open, receiver, previous) = {
            let mut st = self.state.lock();
            if st.handshake == HandshakeState::Closed {
                return false;
            }
            let previous = st.handshake;
            st.handshake = HandshakeState::Closed;
            st.opening = false;
            st.buffered.clear();
            (st.pending_open.take(), st.receiver.take(), previous)
        };

        debug!(
            peer = %self.peer,
            from = %previous,
            error = ?error,
            "Connection closed"
        );

        if let Some(on_complete) = pending_open {
            on_complete(Err(error.clone().unwrap_or_else(|| self.closed_error())));
        }
        if disconnect {
            self.transport.disconnect(&self.peer);
        }
        if let Some(receiver) = receiver {
            receiver.on_closed(error.as_ref());
        }
        true
    }

    fn closed_error(&self) -> MeshError {
        MeshError::ConnectionClosed {
            peer: self.peer.to_string(),
        }
    }
}

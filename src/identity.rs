// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer identity and role resolution.
//!
//! Every process generates one [`PeerIdentity`] at startup and advertises it
//! in its discovery metadata. When a browsing peer learns a remote identity it
//! resolves the pair's roles with [`resolve_role`]:
//!
//! ```text
//! local < remote  → Active  (invite, open, drive replication)
//! local >= remote → Passive (wait for the other side's invitation)
//! ```
//!
//! Both sides compare the same two strings with the same byte-wise order, so
//! for distinct identities exactly one of them ends up active.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-process token used only to break the active/passive tie.
///
/// Never used for routing; peers are addressed by [`PeerHandle`](crate::transport::PeerHandle).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Generate a fresh identity (UUID v4, hyphenated lowercase).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identity learned from discovery metadata.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which side of a peer pairing drives replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Invites the peer, sends `CONNECT` and runs the replication session.
    Active,
    /// Accepts the invitation, answers `OK` and hands the connection to the
    /// inbound listener.
    Passive,
}

impl Role {
    /// The role the other side of the pairing holds.
    pub fn complement(self) -> Self {
        match self {
            Role::Active => Role::Passive,
            Role::Passive => Role::Active,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Role::Active)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Active => write!(f, "active"),
            Role::Passive => write!(f, "passive"),
        }
    }
}

/// Decide the local side's role against a remote identity.
///
/// The strictly smaller identity (byte-wise) becomes [`Role::Active`].
/// Equal identities resolve to [`Role::Passive`]; that only happens when a
/// process discovers its own advertisement, which callers filter out first.
pub fn resolve_role(local: &PeerIdentity, remote: &PeerIdentity) -> Role {
    if local.as_str().as_bytes() < remote.as_str().as_bytes() {
        Role::Active
    } else {
        Role::Passive
    }
}

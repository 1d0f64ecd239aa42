//! Configuration for the mesh link.
//!
//! Configuration is passed to
//! [`MeshCoordinator::new()`](crate::coordinator::MeshCoordinator::new) and can
//! be constructed programmatically or deserialized with any serde format.
//! Missing fields take their defaults.
//!
//! # Quick Start
//!
//! ```rust
//! use mesh_link::config::MeshConfig;
//!
//! let config = MeshConfig {
//!     service_id: "color-sync".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MeshConfig
//! ├── service_id: String            # Discovery service type (advertise + browse)
//! ├── invite_timeout: String        # Outbound invitation timeout ("10s")
//! ├── identity_key: String          # Metadata key carrying the peer identity
//! └── replication: ReplicationSettings
//!     ├── collections: Vec<String>  # Collections each session replicates
//!     ├── continuous: bool
//!     └── mode: ReplicationMode     # push | pull | push_and_pull
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "service_id": "color-sync",
//!   "invite_timeout": "10s",
//!   "replication": {
//!     "collections": ["colors"],
//!     "continuous": true,
//!     "mode": "push_and_pull"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MeshError, Result};

/// Fallback when `invite_timeout` cannot be parsed.
const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest service id the discovery layer accepts.
const MAX_SERVICE_ID_LEN: usize = 15;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `MeshCoordinator::new()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Service type advertised and browsed for. Only peers using the same
    /// value see each other.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// How long an outbound invitation may take to reach a connected session,
    /// as a duration string (e.g. "10s"). Parsed to Duration internally.
    #[serde(default = "default_invite_timeout")]
    pub invite_timeout: String,

    /// Discovery metadata key under which the local identity is advertised.
    #[serde(default = "default_identity_key")]
    pub identity_key: String,

    #[serde(default)]
    pub replication: ReplicationSettings,
}

fn default_service_id() -> String {
    "mesh-link".to_string()
}

fn default_invite_timeout() -> String {
    "10s".to_string()
}

fn default_identity_key() -> String {
    "identity".to_string()
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            invite_timeout: default_invite_timeout(),
            identity_key: default_identity_key(),
            replication: ReplicationSettings::default(),
        }
    }
}

impl MeshConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            invite_timeout: "1s".to_string(),
            ..Default::default()
        }
    }

    /// Parse the invite_timeout string to a Duration.
    pub fn invite_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.invite_timeout).unwrap_or(DEFAULT_INVITE_TIMEOUT)
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<()> {
        validate_service_id(&self.service_id)?;

        match humantime::parse_duration(&self.invite_timeout) {
            Ok(d) if d.is_zero() => {
                return Err(MeshError::Config("invite_timeout must be non-zero".to_string()))
            }
            Ok(_) => {}
            Err(e) => {
                return Err(MeshError::Config(format!(
                    "invalid invite_timeout {:?}: {}",
                    self.invite_timeout, e
                )))
            }
        }

        if self.identity_key.is_empty() {
            return Err(MeshError::Config("identity_key must not be empty".to_string()));
        }

        if self.replication.collections.is_empty() {
            return Err(MeshError::Config(
                "replication.collections must name at least one collection".to_string(),
            ));
        }

        Ok(())
    }
}

/// Service ids are 1–15 chars of lowercase ASCII letters, digits and single
/// hyphens, not starting or ending with a hyphen.
fn validate_service_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_SERVICE_ID_LEN {
        return Err(MeshError::Config(format!(
            "service_id {:?} must be 1-{} characters",
            id, MAX_SERVICE_ID_LEN
        )));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(MeshError::Config(format!(
            "service_id {:?} may only contain a-z, 0-9 and '-'",
            id
        )));
    }
    if id.starts_with('-') || id.ends_with('-') || id.contains("--") {
        return Err(MeshError::Config(format!(
            "service_id {:?} has a misplaced hyphen",
            id
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Direction of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    Push,
    Pull,
    PushAndPull,
}

/// Settings applied to every session started for an active connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,

    #[serde(default = "default_true")]
    pub continuous: bool,

    #[serde(default = "default_mode")]
    pub mode: ReplicationMode,
}

fn default_collections() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_mode() -> ReplicationMode {
    ReplicationMode::PushAndPull
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            collections: default_collections(),
            continuous: true,
            mode: ReplicationMode::PushAndPull,
        }
    }
}

//! Coordinator state types.
//!
//! # State Transitions
//!
//! ```text
//!            start()               stop()
//! Created ───────────→ Running ───────────→ Stopping ──→ Stopped
//!    │                    ↑                                 │
//!    │ stop()             └──────────── start() ────────────┘
//!    ↓
//! Stopped
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `MeshCoordinator::new()`. Not advertising or browsing.
//! - **Running**: Advertising and browsing. Discovery events are acted on.
//! - **Stopping**: `stop()` in progress. Discovery events and invitations are
//!   refused while connections are torn down.
//! - **Stopped**: Advertising and browsing stopped, all connections torn down.
//!   Can be started again.

/// State of the mesh coordinator.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Created but not started.
    ///
    /// Call [`start()`](super::MeshCoordinator::start) to begin discovery.
    Created,

    /// Advertising, browsing and managing connections.
    Running,

    /// Tearing down connections.
    Stopping,

    /// Stopped. Safe to drop or restart.
    Stopped,
}

impl CoordinatorState {
    /// Whether `start()` is allowed from this state.
    pub fn can_start(self) -> bool {
        matches!(self, CoordinatorState::Created | CoordinatorState::Stopped)
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Created => write!(f, "Created"),
            CoordinatorState::Running => write!(f, "Running"),
            CoordinatorState::Stopping => write!(f, "Stopping"),
            CoordinatorState::Stopped => write!(f, "Stopped"),
        }
    }
}

//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - Recording mocks for the transport, discovery and replication collaborators
//! - An in-memory loopback network joining coordinators

#![allow(dead_code)]

pub mod loopback;
pub mod mock_transport;

pub use loopback::*;
pub use mock_transport::*;

//! Common test utilities and infrastructure
//!
//! Shared fixtures and a coordinator builder wired to mockall mocks. The mock
//! transport plays the participants: every begin-run it sees is answered by
//! pushing scripted events into the coordinator's event channel.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::{CoordinatorBuilder, Harness, TestHelpers};

//! Shared types for the pub/sub benchmark system
//!
//! Contains only what both sides of the bus agree on: process identifiers,
//! quality-of-service levels, run orders, and the common logging setup.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{BeginRun, VoidNotice};

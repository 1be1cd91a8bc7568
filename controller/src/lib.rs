//! Benchmark controller library
//!
//! Coordinates remote publishers through parameterized runs over a pub/sub
//! bus, supervises the local broker, and derives delivery and timing metrics
//! from the raw event stream.

pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::{BenchSettings, PerRun};
pub use coordinator::Coordinator;
pub use crate::core::{RunConfig, RunPhase, RunPlan, RunPlanner, RunReport, RunResult};
pub use error::{ControllerError, ControllerResult};
pub use traits::{BrokerSupervisor, CaptureManager, CaptureOutcome, CaptureSession, RunIdentity, Transport, TransportEvent};

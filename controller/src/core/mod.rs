//! Core business logic modules
//!
//! Pure logic with no I/O: planning, metrics and state bookkeeping.

pub mod metrics;
pub mod planner;
pub mod state;

pub use metrics::{finalize, Finalized, InvalidReason, ParticipantTally, RunResult, RunState};
pub use planner::{PlannedRun, RunConfig, RunPlan, RunPlanner};
pub use state::{AttemptOutcome, ConnectKind, PhaseTracker, RunPhase, RunReport, SessionTracker, VoidReason};

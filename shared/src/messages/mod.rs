//! Message types exchanged over the pub/sub bus
//!
//! - `run`: Controller → Participant run orders and void notices

pub mod run;

pub use run::{BeginRun, VoidNotice};

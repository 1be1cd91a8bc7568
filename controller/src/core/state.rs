//! Coordinator state bookkeeping
//!
//! Phase tracking, session tracking and the final run report. Nothing here
//! performs I/O; the coordinator drives these values and logs the changes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::metrics::{InvalidReason, RunResult};

/// Phases of the run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Planning,
    Configuring,
    AwaitingCompletion,
    Finalizing,
    Voiding,
    Advancing,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Planning => "PLANNING",
            RunPhase::Configuring => "CONFIGURING",
            RunPhase::AwaitingCompletion => "AWAITING_COMPLETION",
            RunPhase::Finalizing => "FINALIZING",
            RunPhase::Voiding => "VOIDING",
            RunPhase::Advancing => "ADVANCING",
            RunPhase::Done => "DONE",
            RunPhase::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Ordered record of every phase the coordinator entered
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: RunPhase::Planning,
            history: vec![RunPhase::Planning],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> RunPhase {
        self.current
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    /// Move to `next`, returning the phase left behind
    pub fn enter(&mut self, next: RunPhase) -> RunPhase {
        let previous = self.current;
        self.current = next;
        self.history.push(next);
        previous
    }
}

/// Whether a transport connect is the first one or a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectKind {
    Initial,
    Reconnect,
}

/// Tracks transport sessions so reconnects can be told apart from startup
#[derive(Debug, Default, Clone)]
pub struct SessionTracker {
    connects: u32,
    scheduling: bool,
}

impl SessionTracker {
    pub fn on_connected(&mut self) -> ConnectKind {
        self.connects += 1;
        if self.connects == 1 {
            ConnectKind::Initial
        } else {
            ConnectKind::Reconnect
        }
    }

    pub fn is_connected_once(&self) -> bool {
        self.connects > 0
    }

    pub fn start_scheduling(&mut self) {
        self.scheduling = true;
    }

    /// Reconnects only void runs once scheduling has begun
    pub fn is_scheduling(&self) -> bool {
        self.scheduling
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }
}

/// Why an attempt was discarded
#[derive(Debug, Clone, PartialEq)]
pub enum VoidReason {
    ParticipantReconnected(String),
    ControllerReconnected,
    BrokerDown,
    WatchdogExpired,
    InvalidResult(InvalidReason),
}

impl VoidReason {
    /// Stable key used to group void counts in the report
    pub fn key(&self) -> &'static str {
        match self {
            VoidReason::ParticipantReconnected(_) => "participant_reconnected",
            VoidReason::ControllerReconnected => "controller_reconnected",
            VoidReason::BrokerDown => "broker_down",
            VoidReason::WatchdogExpired => "watchdog_expired",
            VoidReason::InvalidResult(_) => "invalid_result",
        }
    }
}

impl fmt::Display for VoidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoidReason::ParticipantReconnected(origin) => write!(f, "{origin} reconnected"),
            VoidReason::ControllerReconnected => write!(f, "controller reconnected"),
            VoidReason::BrokerDown => write!(f, "broker process is down"),
            VoidReason::WatchdogExpired => write!(f, "no completion within the watchdog window"),
            VoidReason::InvalidResult(reason) => write!(f, "invalid result: {reason}"),
        }
    }
}

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed(RunResult),
    Voided(VoidReason),
}

/// Summary of a whole benchmark session
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub voids: BTreeMap<String, u32>,
    pub results: Vec<RunResult>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            voids: BTreeMap::new(),
            results: Vec::new(),
        }
    }
}

impl RunReport {
    pub fn record(&mut self, outcome: &AttemptOutcome) {
        self.attempts += 1;
        match outcome {
            AttemptOutcome::Completed(result) => self.results.push(result.clone()),
            AttemptOutcome::Voided(reason) => {
                *self.voids.entry(reason.key().to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn void_count(&self) -> u32 {
        self.voids.values().sum()
    }

    pub fn close(&mut self) {
        self.finished_at.get_or_insert_with(Utc::now);
    }
}

//! Core types used throughout the benchmark system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::errors::SharedError;

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Prefix used by participants when identifying themselves on the bus
const PARTICIPANT_PREFIX: &str = "client-";

/// Process identifier for any component taking part in a benchmark
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The controller driving the runs (singleton)
    Controller,
    /// Remote publisher, numbered from zero
    Participant(u32),
}

impl ProcessId {
    /// Initialize the global process ID for the controller
    pub fn init_controller() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Controller)
    }

    /// Get the global process ID, defaulting to the controller
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Controller)
    }

    /// Slot index of a participant, `None` for the controller
    pub fn participant_index(&self) -> Option<u32> {
        match self {
            ProcessId::Participant(index) => Some(*index),
            ProcessId::Controller => None,
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Controller => write!(f, "controller"),
            ProcessId::Participant(index) => write!(f, "{PARTICIPANT_PREFIX}{index}"),
        }
    }
}

impl std::str::FromStr for ProcessId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "controller" {
            return Ok(ProcessId::Controller);
        }

        trimmed
            .strip_prefix(PARTICIPANT_PREFIX)
            .and_then(|index| index.parse::<u32>().ok())
            .map(ProcessId::Participant)
            .ok_or_else(|| SharedError::InvalidProcessId { input: s.to_string() })
    }
}

/// Delivery guarantee tier offered by the pub/sub transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    /// Numeric level as used on the wire and in file names
    pub fn level(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = SharedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(SharedError::InvalidQos { level: other }),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos.level()
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_round_trips_through_display() {
        let participant = ProcessId::Participant(7);
        assert_eq!(participant.to_string(), "client-7");
        assert_eq!("client-7".parse::<ProcessId>().unwrap(), participant);
        assert_eq!("controller".parse::<ProcessId>().unwrap(), ProcessId::Controller);
    }

    #[test]
    fn test_process_id_rejects_garbage() {
        assert!("client-".parse::<ProcessId>().is_err());
        assert!("server".parse::<ProcessId>().is_err());
        assert!("client-x".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_qos_from_json_integer() {
        let qos: QosLevel = serde_json::from_str("1").unwrap();
        assert_eq!(qos, QosLevel::AtLeastOnce);
        assert!(serde_json::from_str::<QosLevel>("3").is_err());
        assert_eq!(serde_json::to_string(&QosLevel::ExactlyOnce).unwrap(), "2");
    }
}

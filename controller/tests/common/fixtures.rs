//! Test fixtures and data for coordinator tests

use chrono::{DateTime, Duration, Utc};
use controller::{BenchSettings, PerRun, TransportEvent};
use shared::{BeginRun, ProcessId, QosLevel};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const CLIENT_ID: &'static str = "controller";
    pub const DATA_TOPIC: &'static str = "bench/data/#";
    pub const BEGIN_TOPIC: &'static str = "bench/begin";
    pub const DONE_TOPIC: &'static str = "bench/done";
    pub const VOID_TOPIC: &'static str = "bench/void";
    pub const FINISH_TOPIC: &'static str = "bench/finish";

    pub const DEFAULT_PARTICIPANTS: u32 = 2;
    pub const DEFAULT_MESSAGES: u64 = 3;
    pub const DEFAULT_FREQUENCY: f64 = 10.0;

    /// Settings with every delay shrunk to test scale and no external processes
    pub fn settings(runs: usize, repetitions: u32) -> BenchSettings {
        let json = format!(
            r#"{{
                "client_id": "{}",
                "broker": {{ "launch": false }},
                "system": {{
                    "runs": {runs},
                    "repetitions": {repetitions},
                    "message_details": {{
                        "client_amount": {},
                        "msg_qos": 0,
                        "msg_amount": {},
                        "msg_size": 16,
                        "msg_freq": {}
                    }}
                }},
                "timing": {{
                    "startup_delay_secs": 0.0,
                    "connect_timeout_secs": 2.0,
                    "void_sync_delay_secs": 0.0,
                    "watchdog_grace_secs": 0.2,
                    "capture_margin_secs": 0.0,
                    "broker_poll_interval_secs": 0.05,
                    "retransmission_allowance_secs": [0.0, 0.0, 0.0]
                }}
            }}"#,
            Self::CLIENT_ID,
            Self::DEFAULT_PARTICIPANTS,
            Self::DEFAULT_MESSAGES,
            Self::DEFAULT_FREQUENCY
        );
        BenchSettings::from_json(&json).unwrap()
    }

    pub fn settings_with_participants(participants: u32) -> BenchSettings {
        let mut settings = Self::settings(1, 1);
        settings.system.message_details.client_amount = PerRun::Single(participants);
        settings
    }

    /// Two declared runs but only one client amount
    pub fn mismatched_settings() -> BenchSettings {
        let mut settings = Self::settings(2, 1);
        settings.system.message_details.client_amount = PerRun::Each(vec![1]);
        settings.system.message_details.msg_qos = PerRun::Each(vec![QosLevel::AtMostOnce, QosLevel::AtLeastOnce]);
        settings
    }

    /// Arrival time of message `index`, spaced at the order's frequency plus
    /// a millisecond of jitter so the run never looks faster than theory
    pub fn arrival(base: DateTime<Utc>, order: &BeginRun, index: u64) -> DateTime<Utc> {
        let micros = (index as f64 / order.msg_freq * 1_000_000.0).round() as i64;
        base + Duration::microseconds(micros) + Duration::milliseconds(index as i64)
    }

    /// Every participant delivers every message, then reports done
    pub fn complete_run(order: &BeginRun) -> Vec<TransportEvent> {
        let base = Utc::now();
        let mut events = Vec::new();
        for participant in 0..order.client_amount {
            for index in 0..order.msg_amount {
                events.push(TransportEvent::DataMessage {
                    participant,
                    received_at: Self::arrival(base, order, index),
                });
            }
        }
        events.extend(Self::all_done(order));
        events
    }

    pub fn all_done(order: &BeginRun) -> Vec<TransportEvent> {
        (0..order.client_amount)
            .map(|participant| TransportEvent::ParticipantDone {
                participant: Some(ProcessId::Participant(participant)),
            })
            .collect()
    }

    /// First message of every participant, then silence
    pub fn partial_run(order: &BeginRun) -> Vec<TransportEvent> {
        let base = Utc::now();
        (0..order.client_amount)
            .map(|participant| TransportEvent::DataMessage {
                participant,
                received_at: base,
            })
            .collect()
    }

    pub fn void_from(origin: &str) -> TransportEvent {
        TransportEvent::VoidRequested {
            origin: origin.to_string(),
        }
    }
}

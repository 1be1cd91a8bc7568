//! Run planning
//!
//! Expands the static message details into one `RunConfig` per declared run.
//! Any inconsistency rejects the whole plan: a benchmark never starts with a
//! partially valid configuration.

use serde::Serialize;
use shared::{BeginRun, QosLevel};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{secs, PerRun, SystemSettings, TimingSettings};
use crate::error::{ControllerError, ControllerResult};

/// Immutable parameters of one benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub participant_count: u32,
    pub qos: QosLevel,
    /// Messages published by each participant
    pub message_amount: u64,
    /// Payload size in bytes
    pub message_size: u64,
    /// Publish frequency in Hz
    pub frequency: f64,
}

impl RunConfig {
    /// Messages the controller should see if nothing is lost
    pub fn expected_total(&self) -> u64 {
        self.message_amount * u64::from(self.participant_count)
    }

    /// Seconds between a participant's first and last publish
    pub fn theoretical_duration(&self) -> f64 {
        self.message_amount.saturating_sub(1) as f64 / self.frequency
    }

    /// Seconds a capture must cover: publish time, retransmissions, safety margin
    pub fn capture_duration(&self, timing: &TimingSettings) -> f64 {
        self.theoretical_duration() + timing.retransmission_allowance(self.qos) + timing.capture_margin_secs
    }

    /// How long to wait for completion before assuming a void signal was lost
    pub fn watchdog_window(&self, timing: &TimingSettings) -> Duration {
        secs(self.capture_duration(timing)).saturating_add(timing.watchdog_grace())
    }

    /// Begin-run order for one repetition of this configuration
    pub fn begin_run(&self, run_id: Uuid, repetition: u32) -> BeginRun {
        BeginRun {
            uuid: run_id,
            repetition,
            client_amount: self.participant_count,
            msg_qos: self.qos,
            msg_amount: self.message_amount,
            msg_size: self.message_size,
            msg_freq: self.frequency,
        }
    }
}

/// One configuration slot of the plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRun {
    pub index: usize,
    pub config: RunConfig,
    pub repetitions: u32,
}

/// Ordered, fully resolved list of runs
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    runs: Vec<PlannedRun>,
}

impl RunPlan {
    pub fn runs(&self) -> &[PlannedRun] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

pub struct RunPlanner;

impl RunPlanner {
    /// Validate the system settings and expand them into a plan
    pub fn plan(system: &SystemSettings) -> ControllerResult<RunPlan> {
        let problems = Self::validate(system);
        if !problems.is_empty() {
            return Err(ControllerError::config(problems.join("; ")));
        }

        let details = &system.message_details;
        let runs = (0..system.runs)
            .map(|index| {
                Ok(PlannedRun {
                    index,
                    config: RunConfig {
                        participant_count: resolve(&details.client_amount, index, "client_amount")?,
                        qos: resolve(&details.msg_qos, index, "msg_qos")?,
                        message_amount: resolve(&details.msg_amount, index, "msg_amount")?,
                        message_size: resolve(&details.msg_size, index, "msg_size")?,
                        frequency: resolve(&details.msg_freq, index, "msg_freq")?,
                    },
                    repetitions: system.repetitions,
                })
            })
            .collect::<ControllerResult<Vec<_>>>()?;

        Ok(RunPlan { runs })
    }

    /// Collect every problem rather than stopping at the first
    fn validate(system: &SystemSettings) -> Vec<String> {
        let details = &system.message_details;
        let mut problems = Vec::new();

        if system.runs == 0 {
            problems.push("runs must be at least 1".to_string());
        }
        if system.repetitions == 0 {
            problems.push("repetitions must be at least 1".to_string());
        }

        let lengths = [
            ("client_amount", details.client_amount.sequence_len()),
            ("msg_qos", details.msg_qos.sequence_len()),
            ("msg_amount", details.msg_amount.sequence_len()),
            ("msg_size", details.msg_size.sequence_len()),
            ("msg_freq", details.msg_freq.sequence_len()),
        ];
        for (name, len) in lengths {
            if let Some(len) = len {
                if len != system.runs {
                    problems.push(format!("{name} has incorrect number of entries ({len}/{})", system.runs));
                }
            }
        }

        if details.client_amount.values().contains(&0) {
            problems.push("client_amount must be at least 1".to_string());
        }
        if details.msg_amount.values().contains(&0) {
            problems.push("msg_amount must be at least 1".to_string());
        }
        if details.msg_freq.values().iter().any(|f| !f.is_finite() || *f <= 0.0) {
            problems.push("msg_freq must be a positive number".to_string());
        }

        for index in 0..system.runs {
            if let (Some(amount), Some(freq)) = (details.msg_amount.resolve(index), details.msg_freq.resolve(index)) {
                let span = amount.saturating_sub(1) as f64 / freq;
                if freq > 0.0 && Duration::try_from_secs_f64(span).is_err() {
                    problems.push(format!("run {index}: {amount} messages at {freq} Hz cannot be scheduled"));
                }
            }
        }

        problems
    }
}

fn resolve<T: Clone>(value: &PerRun<T>, index: usize, name: &str) -> ControllerResult<T> {
    value
        .resolve(index)
        .ok_or_else(|| ControllerError::config(format!("{name} has no entry for run {}", index + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageDetails;

    fn system(runs: usize, details: MessageDetails) -> SystemSettings {
        SystemSettings {
            runs,
            repetitions: 2,
            message_details: details,
        }
    }

    fn scalar_details() -> MessageDetails {
        MessageDetails {
            client_amount: PerRun::Single(3),
            msg_qos: PerRun::Single(QosLevel::AtMostOnce),
            msg_amount: PerRun::Single(100),
            msg_size: PerRun::Single(64),
            msg_freq: PerRun::Single(10.0),
        }
    }

    #[test]
    fn test_scalars_apply_to_every_run() {
        let plan = RunPlanner::plan(&system(4, scalar_details())).unwrap();

        assert_eq!(plan.len(), 4);
        for (index, run) in plan.runs().iter().enumerate() {
            assert_eq!(run.index, index);
            assert_eq!(run.repetitions, 2);
            assert_eq!(run.config.participant_count, 3);
            assert_eq!(run.config.frequency, 10.0);
        }
    }

    #[test]
    fn test_sequences_are_indexed_by_run() {
        let details = MessageDetails {
            client_amount: PerRun::Each(vec![1, 2, 5]),
            msg_qos: PerRun::Each(vec![QosLevel::AtMostOnce, QosLevel::AtLeastOnce, QosLevel::ExactlyOnce]),
            ..scalar_details()
        };
        let plan = RunPlanner::plan(&system(3, details)).unwrap();

        let counts: Vec<u32> = plan.runs().iter().map(|r| r.config.participant_count).collect();
        assert_eq!(counts, vec![1, 2, 5]);
        assert_eq!(plan.runs()[2].config.qos, QosLevel::ExactlyOnce);
    }

    #[test]
    fn test_length_mismatch_rejects_whole_plan() {
        let details = MessageDetails {
            msg_size: PerRun::Each(vec![16, 32]),
            msg_freq: PerRun::Each(vec![1.0]),
            ..scalar_details()
        };
        let err = RunPlanner::plan(&system(3, details)).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("msg_size has incorrect number of entries (2/3)"));
        assert!(message.contains("msg_freq has incorrect number of entries (1/3)"));
    }

    #[test]
    fn test_rejects_zero_frequency_and_empty_runs() {
        let details = MessageDetails {
            msg_freq: PerRun::Single(0.0),
            ..scalar_details()
        };
        assert!(RunPlanner::plan(&system(1, details)).is_err());
        assert!(RunPlanner::plan(&system(0, scalar_details())).is_err());
    }

    #[test]
    fn test_rejects_unschedulable_frequency() {
        let details = MessageDetails {
            msg_freq: PerRun::Single(1e-300),
            ..scalar_details()
        };

        let message = RunPlanner::plan(&system(1, details)).unwrap_err().to_string();
        assert!(message.contains("cannot be scheduled"), "{message}");
    }

    #[test]
    fn test_run_config_timing() {
        let config = RunConfig {
            participant_count: 2,
            qos: QosLevel::AtLeastOnce,
            message_amount: 5,
            message_size: 10,
            frequency: 1.0,
        };
        let timing = TimingSettings {
            retransmission_allowance_secs: vec![0.0, 2.0, 4.0],
            capture_margin_secs: 1.0,
            watchdog_grace_secs: 3.0,
            ..TimingSettings::default()
        };

        assert_eq!(config.expected_total(), 10);
        assert_eq!(config.theoretical_duration(), 4.0);
        assert_eq!(config.capture_duration(&timing), 7.0);
        assert_eq!(config.watchdog_window(&timing), Duration::from_secs(10));
    }
}

//! Per-run metrics aggregation
//!
//! `RunState` accumulates raw arrivals exactly as they are delivered: no
//! ordering checks and no duplicate suppression. Under QoS 1/2 the broker may
//! redeliver, so received can exceed expected and loss can go negative. That
//! artifact is reported as measured.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::ProcessId;
use uuid::Uuid;

use super::planner::RunConfig;

/// Arrivals from one participant during one attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantTally {
    pub received: u64,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl ParticipantTally {
    fn first(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().min().copied()
    }

    fn last(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().max().copied()
    }
}

/// Mutable state of a single run attempt
#[derive(Debug, Clone)]
pub struct RunState {
    pub attempt_id: Uuid,
    /// Shared by every repetition of the same configuration
    pub run_id: Uuid,
    pub repetition: u32,
    pub config: RunConfig,
    tallies: Vec<ParticipantTally>,
    stray: u64,
    done: u32,
    finished: bool,
}

impl RunState {
    pub fn new(run_id: Uuid, repetition: u32, config: RunConfig) -> Self {
        let tallies = vec![ParticipantTally::default(); config.participant_count as usize];
        Self {
            attempt_id: Uuid::new_v4(),
            run_id,
            repetition,
            config,
            tallies,
            stray: 0,
            done: 0,
            finished: false,
        }
    }

    /// Count one data message; returns the participant's running total.
    ///
    /// Arrivals from an index outside this run are tallied as stray and
    /// return `None`.
    pub fn record(&mut self, participant: u32, arrival: DateTime<Utc>) -> Option<u64> {
        match self.tallies.get_mut(participant as usize) {
            Some(tally) => {
                tally.received += 1;
                tally.timestamps.push(arrival);
                Some(tally.received)
            }
            None => {
                self.stray += 1;
                None
            }
        }
    }

    /// Count one done signal; true exactly when the count reaches the
    /// configured participant count.
    pub fn record_done(&mut self, _participant: Option<&ProcessId>) -> bool {
        self.done += 1;
        let complete = self.done == self.config.participant_count;
        if complete {
            self.finished = true;
        }
        complete
    }

    pub fn tallies(&self) -> &[ParticipantTally] {
        &self.tallies
    }

    pub fn total_received(&self) -> u64 {
        self.tallies.iter().map(|t| t.received).sum()
    }

    pub fn stray(&self) -> u64 {
        self.stray
    }

    pub fn done_count(&self) -> u32 {
        self.done
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Derived metrics of a successfully completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub repetition: u32,
    pub config: RunConfig,
    pub total_received: u64,
    pub expected_total: u64,
    /// Can be negative when duplicates were delivered
    pub loss_percent: f64,
    pub start: DateTime<Utc>,
    pub expected_finish: DateTime<Utc>,
    pub participant_expected_finish: Vec<Option<DateTime<Utc>>>,
    pub actual_finish: DateTime<Utc>,
    pub expected_secs: f64,
    pub elapsed_secs: f64,
    pub time_factor: f64,
    pub achieved_frequency: f64,
    /// Achieved over target frequency, in percent
    pub frequency_factor: f64,
}

/// Why a finished run cannot be reported
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    NoSamples,
    /// Elapsed time below the theoretical publish duration
    TooFast { elapsed_secs: f64, expected_secs: f64 },
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::NoSamples => write!(f, "no messages were received"),
            InvalidReason::TooFast {
                elapsed_secs,
                expected_secs,
            } => write!(
                f,
                "execution time is lower than expected time by {:.3} seconds",
                expected_secs - elapsed_secs
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finalized {
    Valid(RunResult),
    Invalid(InvalidReason),
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn seconds_between(start: DateTime<Utc>, finish: DateTime<Utc>) -> f64 {
    let span = finish - start;
    match span.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => span.num_milliseconds() as f64 / 1_000.0,
    }
}

fn offset(start: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    start + chrono::Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Compute the run's metrics, or explain why it must be retried
pub fn finalize(state: &RunState) -> Finalized {
    let config = &state.config;
    let expected_secs = config.theoretical_duration();

    let start = state.tallies.iter().filter_map(ParticipantTally::first).min();
    let finish = state.tallies.iter().filter_map(ParticipantTally::last).max();
    let (start, finish) = match (start, finish) {
        (Some(start), Some(finish)) => (start, finish),
        _ => return Finalized::Invalid(InvalidReason::NoSamples),
    };

    let elapsed_secs = seconds_between(start, finish);
    if elapsed_secs < expected_secs {
        return Finalized::Invalid(InvalidReason::TooFast {
            elapsed_secs,
            expected_secs,
        });
    }

    let total_received = state.total_received();
    let expected_total = config.expected_total();
    let loss_percent = round_to(100.0 - (total_received as f64 / expected_total as f64) * 100.0, 2);

    let (time_factor, achieved_frequency) = if expected_secs > 0.0 {
        (
            round_to(elapsed_secs / expected_secs, 3),
            round_to(config.message_amount.saturating_sub(1) as f64 / elapsed_secs, 2),
        )
    } else {
        (1.0, config.frequency)
    };
    let frequency_factor = round_to(achieved_frequency / config.frequency * 100.0, 2);

    let participant_expected_finish = state
        .tallies
        .iter()
        .map(|tally| tally.first().map(|first| offset(first, expected_secs)))
        .collect();

    Finalized::Valid(RunResult {
        run_id: state.run_id,
        repetition: state.repetition,
        config: config.clone(),
        total_received,
        expected_total,
        loss_percent,
        start,
        expected_finish: offset(start, expected_secs),
        participant_expected_finish,
        actual_finish: finish,
        expected_secs,
        elapsed_secs,
        time_factor,
        achieved_frequency,
        frequency_factor,
    })
}

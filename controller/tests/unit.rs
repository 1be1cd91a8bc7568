//! Unit tests for planning, metrics and reporting through the public API
//!
//! These exercise the pure pieces the coordinator is built from, without any
//! transport or broker involved.

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use controller::core::{finalize, AttemptOutcome, Finalized, InvalidReason, RunState, VoidReason};
use controller::{PerRun, RunPhase, RunPlanner, RunReport};
use shared::{ProcessId, QosLevel};

mod common;
use common::TestFixtures;

/// Test that a consistent configuration expands into one slot per run
#[test]
fn test_plan_expands_every_run() {
    // Arrange
    let mut settings = TestFixtures::settings(3, 2);
    settings.system.message_details.client_amount = PerRun::Each(vec![1, 2, 4]);

    // Act
    let plan = RunPlanner::plan(&settings.system).unwrap();

    // Assert
    assert_eq!(plan.len(), 3);
    let counts: Vec<u32> = plan.runs().iter().map(|r| r.config.participant_count).collect();
    assert_eq!(counts, vec![1, 2, 4]);
    assert!(plan.runs().iter().all(|r| r.repetitions == 2));
    assert!(plan.runs().iter().all(|r| r.config.frequency == TestFixtures::DEFAULT_FREQUENCY));
}

/// Test that every inconsistency is reported at once
#[test]
fn test_plan_rejects_mismatched_lengths() {
    // Arrange
    let mut settings = TestFixtures::mismatched_settings();
    settings.system.message_details.msg_size = PerRun::Each(vec![16, 32, 64]);

    // Act
    let err = RunPlanner::plan(&settings.system).unwrap_err().to_string();

    // Assert
    assert!(err.contains("client_amount has incorrect number of entries (1/2)"), "{err}");
    assert!(err.contains("msg_size has incorrect number of entries (3/2)"), "{err}");
    assert!(!err.contains("msg_qos"), "{err}");
}

/// Test the begin-run order carries the configuration verbatim
#[test]
fn test_begin_run_order_from_plan() {
    // Arrange
    let mut settings = TestFixtures::settings(1, 1);
    settings.system.message_details.msg_qos = PerRun::Single(QosLevel::AtLeastOnce);
    let plan = RunPlanner::plan(&settings.system).unwrap();
    let run_id = Uuid::new_v4();

    // Act
    let order = plan.runs()[0].config.begin_run(run_id, 1);

    // Assert
    assert_eq!(order.uuid, run_id);
    assert_eq!(order.repetition, 1);
    assert_eq!(order.client_amount, TestFixtures::DEFAULT_PARTICIPANTS);
    assert_eq!(order.msg_qos, QosLevel::AtLeastOnce);
    assert_eq!(order.msg_amount, TestFixtures::DEFAULT_MESSAGES);
}

/// Test a lossy but correctly paced run
#[test]
fn test_finalize_reports_loss() {
    // Arrange: participant 0 delivers all 3 messages, participant 1 only two
    let settings = TestFixtures::settings(1, 1);
    let plan = RunPlanner::plan(&settings.system).unwrap();
    let config = plan.runs()[0].config.clone();
    let mut state = RunState::new(Uuid::nil(), 0, config);
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    for index in 0..3 {
        state.record(0, base + Duration::milliseconds(index * 110));
    }
    for index in 0..2 {
        state.record(1, base + Duration::milliseconds(index * 110));
    }
    state.record_done(Some(&ProcessId::Participant(0)));
    assert!(state.record_done(Some(&ProcessId::Participant(1))));

    // Act
    let Finalized::Valid(result) = finalize(&state) else {
        panic!("expected a valid result");
    };

    // Assert
    assert_eq!(result.total_received, 5);
    assert_eq!(result.expected_total, 6);
    assert_eq!(result.loss_percent, 16.67);
    assert_eq!(result.elapsed_secs, 0.22);
    assert_eq!(result.time_factor, 1.1);
    assert_eq!(result.achieved_frequency, 9.09);
    assert_eq!(result.frequency_factor, 90.9);
    assert_eq!(result.actual_finish, base + Duration::milliseconds(220));
}

/// Test that stray arrivals never count toward the totals
#[test]
fn test_stray_arrivals_are_excluded() {
    // Arrange
    let settings = TestFixtures::settings(1, 1);
    let config = RunPlanner::plan(&settings.system).unwrap().runs()[0].config.clone();
    let mut state = RunState::new(Uuid::nil(), 0, config);

    // Act
    let counted = state.record(0, Utc::now());
    let stray = state.record(7, Utc::now());

    // Assert
    assert_eq!(counted, Some(1));
    assert_eq!(stray, None);
    assert_eq!(state.total_received(), 1);
    assert_eq!(state.stray(), 1);
}

/// Test that a run completing faster than theory is rejected
#[test]
fn test_finalize_rejects_impossible_speed() {
    // Arrange
    let settings = TestFixtures::settings(1, 1);
    let config = RunPlanner::plan(&settings.system).unwrap().runs()[0].config.clone();
    let mut state = RunState::new(Uuid::nil(), 0, config);
    let base = Utc::now();
    state.record(0, base);
    state.record(1, base + Duration::milliseconds(50));

    // Act
    let finalized = finalize(&state);

    // Assert
    match finalized {
        Finalized::Invalid(InvalidReason::TooFast {
            elapsed_secs,
            expected_secs,
        }) => {
            assert_eq!(elapsed_secs, 0.05);
            assert_eq!(expected_secs, 0.2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// Test the report's void bookkeeping across outcomes
#[test]
fn test_report_counts_voids_by_reason() {
    // Arrange
    let mut report = RunReport::default();

    // Act
    report.record(&AttemptOutcome::Voided(VoidReason::WatchdogExpired));
    report.record(&AttemptOutcome::Voided(VoidReason::ParticipantReconnected("client-2".to_string())));
    report.record(&AttemptOutcome::Voided(VoidReason::WatchdogExpired));
    report.record(&AttemptOutcome::Voided(VoidReason::InvalidResult(InvalidReason::NoSamples)));
    report.close();

    // Assert
    assert_eq!(report.attempts, 4);
    assert_eq!(report.void_count(), 4);
    assert_eq!(report.voids.get("watchdog_expired"), Some(&2));
    assert_eq!(report.voids.get("participant_reconnected"), Some(&1));
    assert_eq!(report.voids.get("invalid_result"), Some(&1));
    assert!(report.results.is_empty());
    assert!(report.finished_at.is_some());
}

/// Test the terminal phases
#[test]
fn test_terminal_phases() {
    assert!(RunPhase::Done.is_terminal());
    assert!(RunPhase::Aborted.is_terminal());
    assert!(!RunPhase::Voiding.is_terminal());
    assert_eq!(RunPhase::AwaitingCompletion.to_string(), "AWAITING_COMPLETION");
}

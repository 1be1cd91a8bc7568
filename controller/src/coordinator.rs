//! Run coordinator
//!
//! Drives the run state machine: plan, configure, await completion, then
//! finalize or void, and advance until every configuration has collected its
//! repetitions. Participants are synchronized only through pub/sub signals;
//! the transport's delivery context hands them over as `TransportEvent`s and
//! this loop is the single consumer.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

use shared::logging::{self, TIMESTAMP_TARGET};
use shared::{process_debug, process_info, process_warn, ProcessId, QosLevel, VoidNotice};

use crate::config::BenchSettings;
use crate::core::{
    finalize, AttemptOutcome, ConnectKind, Finalized, PhaseTracker, PlannedRun, RunConfig, RunPhase, RunPlanner,
    RunReport, RunResult, RunState, SessionTracker, VoidReason,
};
use crate::error::{ControllerError, ControllerResult};
use crate::traits::{
    BrokerSupervisor, CaptureManager, CaptureOutcome, CaptureSession, RunIdentity, Transport, TransportEvent,
};

/// Floor for the broker liveness interval; tokio rejects a zero period
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a wait for completion ended
#[derive(Debug)]
enum Wait {
    Finished,
    Void(VoidReason),
}

/// Coordinates benchmark runs across remote participants
pub struct Coordinator<B, T, C>
where
    B: BrokerSupervisor + 'static,
    T: Transport + 'static,
    C: CaptureManager + 'static,
{
    settings: Arc<BenchSettings>,

    /// Injected services
    broker: B,
    transport: T,
    capture: C,

    phases: PhaseTracker,
    sessions: SessionTracker,
    report: RunReport,

    broker_started: bool,
    transport_open: bool,
    data_subscribed: bool,
    finish_sent: bool,
    shut_down: bool,

    /// Operator interrupt
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<B, T, C> Coordinator<B, T, C>
where
    B: BrokerSupervisor + 'static,
    T: Transport + 'static,
    C: CaptureManager + 'static,
{
    pub fn new(settings: Arc<BenchSettings>, broker: B, transport: T, capture: C) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            settings,
            broker,
            transport,
            capture,
            phases: PhaseTracker::default(),
            sessions: SessionTracker::default(),
            report: RunReport::default(),
            broker_started: false,
            transport_open: false,
            data_subscribed: false,
            finish_sent: false,
            shut_down: false,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get shutdown sender for operator interrupts
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phases.current()
    }

    pub fn phase_history(&self) -> &[RunPhase] {
        self.phases.history()
    }

    /// Results gathered so far, also available after a failed run
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Execute the whole benchmark, then shut down whatever was started
    pub async fn run(&mut self) -> ControllerResult<RunReport> {
        logging::log_startup(ProcessId::current(), "benchmark coordinator");

        let outcome = self.execute().await;
        match &outcome {
            Ok(()) => {
                self.transition(RunPhase::Done);
                logging::log_success(
                    ProcessId::current(),
                    &format!(
                        "All runs completed: {} results, {} voided attempts",
                        self.report.results.len(),
                        self.report.void_count()
                    ),
                );
            }
            Err(ControllerError::Interrupted) => {
                self.transition(RunPhase::Aborted);
                process_warn!(ProcessId::current(), "🛑 Benchmark interrupted by operator");
            }
            Err(e) => {
                self.transition(RunPhase::Aborted);
                logging::log_error(ProcessId::current(), "Benchmark", e);
            }
        }

        self.shutdown().await;
        self.report.close();
        outcome.map(|()| self.report.clone())
    }

    async fn execute(&mut self) -> ControllerResult<()> {
        let plan = RunPlanner::plan(&self.settings.system)?;
        logging::log_progress(
            ProcessId::current(),
            "Run plan",
            &format!(
                "{} configurations x {} repetitions",
                plan.len(),
                self.settings.system.repetitions
            ),
        );

        if self.settings.broker.launch {
            self.broker.start().await?;
            self.broker_started = true;
        }

        let mut events = self.transport.connect().await?;
        self.transport_open = true;
        self.await_connection(&mut events).await?;

        process_info!(
            ProcessId::current(),
            "⏳ Waiting {:.1}s for participants to come online",
            self.settings.timing.startup_delay_secs
        );
        self.settle(&mut events, self.settings.timing.startup_delay()).await?;
        self.sessions.start_scheduling();

        for planned in plan.runs() {
            self.execute_configuration(&mut events, planned).await?;
        }

        Ok(())
    }

    /// Attempt one configuration until it has collected its repetitions
    async fn execute_configuration(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
        planned: &PlannedRun,
    ) -> ControllerResult<()> {
        let run_id = Uuid::new_v4();
        let mut repetition = 0;
        let mut attempt = 0;

        while repetition < planned.repetitions {
            let identity = RunIdentity {
                run_id,
                run_index: planned.index,
                repetition,
                attempt,
            };

            let outcome = self.attempt_run(events, &identity, &planned.config).await?;
            self.report.record(&outcome);
            if let AttemptOutcome::Completed(_) = outcome {
                repetition += 1;
            }
            attempt += 1;

            self.transition(RunPhase::Advancing);
        }

        Ok(())
    }

    async fn attempt_run(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
        identity: &RunIdentity,
        config: &RunConfig,
    ) -> ControllerResult<AttemptOutcome> {
        self.transition(RunPhase::Configuring);
        self.drain_stale_events(events);

        let topics = &self.settings.topics;
        let mut state = RunState::new(identity.run_id, identity.repetition, config.clone());

        self.transport.subscribe(&topics.data, config.qos).await?;
        self.data_subscribed = true;

        let capture = self.capture.open(identity, config).await;

        let order = config.begin_run(identity.run_id, identity.repetition);
        self.transport
            .publish(&topics.begin_run, order.to_payload()?, QosLevel::AtMostOnce)
            .await?;

        process_info!(
            ProcessId::current(),
            "▶️ Run {}/{} repetition {}/{} (attempt {}): {} participants, QoS {}, {} msgs x {} B at {} Hz",
            identity.run_index + 1,
            self.settings.system.runs,
            identity.repetition + 1,
            self.settings.system.repetitions,
            identity.attempt + 1,
            config.participant_count,
            config.qos,
            config.message_amount,
            config.message_size,
            config.frequency
        );

        self.transition(RunPhase::AwaitingCompletion);
        let wait = match self.await_completion(events, &mut state).await {
            Ok(wait) => wait,
            Err(e) => {
                self.close_capture(capture, CaptureOutcome::Error).await;
                return Err(e);
            }
        };

        match wait {
            Wait::Finished => {
                self.transition(RunPhase::Finalizing);
                match finalize(&state) {
                    Finalized::Valid(result) => {
                        self.close_capture(capture, CaptureOutcome::Success).await;
                        log_result(&result, state.stray());
                        Ok(AttemptOutcome::Completed(result))
                    }
                    Finalized::Invalid(reason) => {
                        self.void_attempt(events, VoidReason::InvalidResult(reason), capture)
                            .await
                    }
                }
            }
            Wait::Void(reason) => self.void_attempt(events, reason, capture).await,
        }
    }

    /// Block until every participant is done, a void condition arises, or the
    /// watchdog window runs out
    async fn await_completion(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
        state: &mut RunState,
    ) -> ControllerResult<Wait> {
        let timing = &self.settings.timing;
        let window = state.config.watchdog_window(timing);
        let deadline = deadline_after(window)?;
        let watch_broker = self.broker_started;
        let mut liveness = interval(timing.broker_poll_interval().max(MIN_POLL_INTERVAL));
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    return Err(ControllerError::Interrupted);
                }

                event = events.recv() => {
                    let event = event.ok_or_else(|| ControllerError::transport("event stream closed"))?;
                    if let Some(wait) = self.on_run_event(event, state).await {
                        return Ok(wait);
                    }
                }

                _ = liveness.tick(), if watch_broker => {
                    if !self.broker.is_running().await {
                        return Ok(Wait::Void(VoidReason::BrokerDown));
                    }
                }

                _ = sleep_until(deadline) => {
                    process_warn!(
                        ProcessId::current(),
                        "⏰ No completion after {:.1}s, assuming a lost void signal",
                        state.config.watchdog_window(&self.settings.timing).as_secs_f64()
                    );
                    return Ok(Wait::Void(VoidReason::WatchdogExpired));
                }
            }
        }
    }

    async fn on_run_event(&mut self, event: TransportEvent, state: &mut RunState) -> Option<Wait> {
        match event {
            TransportEvent::DataMessage {
                participant,
                received_at,
            } => {
                match state.record(participant, received_at) {
                    Some(count) => tracing::trace!(
                        target: TIMESTAMP_TARGET,
                        participant,
                        count,
                        received_at = %received_at.format("%H:%M:%S%.6f"),
                        "arrival"
                    ),
                    None => process_debug!(
                        ProcessId::current(),
                        "📭 Stray message from participant {} outside this run",
                        participant
                    ),
                }
                None
            }
            TransportEvent::ParticipantDone { participant } => {
                let all_done = state.record_done(participant.as_ref());
                process_debug!(
                    ProcessId::current(),
                    "🏁 Done signal {}/{}",
                    state.done_count(),
                    state.config.participant_count
                );
                if all_done {
                    self.unsubscribe_data().await;
                    return Some(Wait::Finished);
                }
                None
            }
            TransportEvent::VoidRequested { origin } => {
                if origin == self.settings.client_id {
                    process_debug!(ProcessId::current(), "🔁 Ignoring echo of our own void notice");
                    return None;
                }
                Some(Wait::Void(VoidReason::ParticipantReconnected(origin)))
            }
            TransportEvent::Connected { session } => {
                if self.sessions.on_connected() == ConnectKind::Reconnect && self.sessions.is_scheduling() {
                    process_warn!(ProcessId::current(), "🔌 Reconnected mid run (session {})", session);
                    self.announce_void().await;
                    return Some(Wait::Void(VoidReason::ControllerReconnected));
                }
                None
            }
            TransportEvent::ConnectionRefused { code } => {
                process_warn!(ProcessId::current(), "⚠️ Reconnect refused by broker: {}", code);
                None
            }
            TransportEvent::Disconnected { reason } => {
                process_warn!(ProcessId::current(), "🔌 Transport disconnected: {}", reason);
                None
            }
        }
    }

    /// Discard the attempt without advancing the repetition
    async fn void_attempt(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
        reason: VoidReason,
        capture: Option<CaptureSession>,
    ) -> ControllerResult<AttemptOutcome> {
        self.transition(RunPhase::Voiding);
        process_warn!(ProcessId::current(), "🚫 Voiding run: {}", reason);

        self.unsubscribe_data().await;
        self.close_capture(capture, CaptureOutcome::Void).await;

        if reason == VoidReason::BrokerDown {
            self.restart_broker(events).await?;
        }

        process_info!(
            ProcessId::current(),
            "⏳ Synchronizing participants for {:.1}s before retrying",
            self.settings.timing.void_sync_delay_secs
        );
        self.settle(events, self.settings.timing.void_sync_delay()).await?;

        Ok(AttemptOutcome::Voided(reason))
    }

    async fn restart_broker(&mut self, events: &mut mpsc::Receiver<TransportEvent>) -> ControllerResult<()> {
        process_warn!(ProcessId::current(), "🔄 Restarting broker");
        if let Err(e) = self.broker.stop().await {
            logging::log_error(ProcessId::current(), "Stopping dead broker", &e);
        }
        self.broker.start().await?;
        self.await_connection(events).await
    }

    /// Wait for the transport to report a session
    async fn await_connection(&mut self, events: &mut mpsc::Receiver<TransportEvent>) -> ControllerResult<()> {
        let timeout = self.settings.timing.connect_timeout();
        let deadline = deadline_after(timeout)?;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    return Err(ControllerError::Interrupted);
                }

                event = events.recv() => {
                    match event.ok_or_else(|| ControllerError::transport("event stream closed"))? {
                        TransportEvent::Connected { session } => {
                            self.sessions.on_connected();
                            logging::log_success(
                                ProcessId::current(),
                                &format!("Connected to broker (session {session})"),
                            );
                            return Ok(());
                        }
                        TransportEvent::ConnectionRefused { code } => {
                            if !self.sessions.is_connected_once() {
                                return Err(ControllerError::ConnectionRefused { code });
                            }
                            process_warn!(ProcessId::current(), "⚠️ Connection refused by broker: {}", code);
                        }
                        other => {
                            process_debug!(ProcessId::current(), "Ignoring {:?} while connecting", other);
                        }
                    }
                }

                _ = sleep_until(deadline) => {
                    return Err(ControllerError::transport(format!(
                        "no broker connection within {:.1}s",
                        timeout.as_secs_f64()
                    )));
                }
            }
        }
    }

    /// Sit out a fixed delay, discarding every event except session changes
    async fn settle(&mut self, events: &mut mpsc::Receiver<TransportEvent>, delay: Duration) -> ControllerResult<()> {
        let deadline = deadline_after(delay)?;
        let mut discarded = 0u64;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    return Err(ControllerError::Interrupted);
                }

                _ = sleep_until(deadline) => {
                    break;
                }

                event = events.recv() => {
                    match event.ok_or_else(|| ControllerError::transport("event stream closed"))? {
                        TransportEvent::Connected { session } => {
                            self.sessions.on_connected();
                            process_debug!(ProcessId::current(), "🔌 Session {} established while idle", session);
                        }
                        _ => discarded += 1,
                    }
                }
            }
        }

        if discarded > 0 {
            process_debug!(ProcessId::current(), "🧹 Discarded {} events while idle", discarded);
        }
        Ok(())
    }

    /// Drop whatever the previous attempt left in the queue
    fn drain_stale_events(&mut self, events: &mut mpsc::Receiver<TransportEvent>) {
        let mut stale = 0u64;
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::Connected { .. } = event {
                self.sessions.on_connected();
            }
            stale += 1;
        }
        if stale > 0 {
            process_debug!(ProcessId::current(), "🧹 Dropped {} stale events", stale);
        }
    }

    /// Tell participants that our own reconnect invalidated the current run
    async fn announce_void(&self) {
        let notice = VoidNotice {
            origin: self.settings.client_id.clone(),
        };
        if let Err(e) = self
            .transport
            .publish(&self.settings.topics.void_run, notice.to_payload(), QosLevel::AtMostOnce)
            .await
        {
            logging::log_error(ProcessId::current(), "Publishing void notice", &e);
        }
    }

    async fn unsubscribe_data(&mut self) {
        if !self.data_subscribed {
            return;
        }
        self.data_subscribed = false;
        if let Err(e) = self.transport.unsubscribe(&self.settings.topics.data).await {
            logging::log_error(ProcessId::current(), "Unsubscribing data topic", &e);
        }
    }

    async fn close_capture(&self, capture: Option<CaptureSession>, outcome: CaptureOutcome) {
        if let Some(session) = capture {
            if let Err(e) = self.capture.close(session, outcome).await {
                logging::log_error(ProcessId::current(), "Closing capture", &e);
            }
        }
    }

    fn transition(&mut self, next: RunPhase) {
        let previous = self.phases.enter(next);
        process_debug!(ProcessId::current(), "🔀 {} -> {}", previous, next);
    }

    /// Publish finish, drop subscriptions, disconnect, stop the broker.
    /// Runs at most once.
    async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        logging::log_shutdown(ProcessId::current(), &format!("phase {}", self.phases.current()));

        if self.transport_open {
            let topics = self.settings.topics.clone();

            if self.sessions.is_connected_once() && !self.finish_sent {
                match self.transport.publish(&topics.finish, Vec::new(), QosLevel::AtMostOnce).await {
                    Ok(()) => self.finish_sent = true,
                    Err(e) => logging::log_error(ProcessId::current(), "Publishing finish signal", &e),
                }
            }

            self.unsubscribe_data().await;
            for topic in [&topics.participant_done, &topics.void_run] {
                if let Err(e) = self.transport.unsubscribe(topic).await {
                    logging::log_error(ProcessId::current(), "Unsubscribing control topic", &e);
                }
            }
            if let Err(e) = self.transport.disconnect().await {
                logging::log_error(ProcessId::current(), "Disconnecting", &e);
            }
        }

        if self.broker_started {
            if let Err(e) = self.broker.stop().await {
                logging::log_error(ProcessId::current(), "Stopping broker", &e);
            }
        }

        process_debug!(ProcessId::current(), "✅ Coordinator shutdown complete");
    }
}

fn deadline_after(delay: Duration) -> ControllerResult<Instant> {
    Instant::now()
        .checked_add(delay)
        .ok_or_else(|| ControllerError::config(format!("delay of {delay:?} is out of range")))
}

fn log_result(result: &RunResult, stray: u64) {
    let pid = ProcessId::current();
    let stamp = |t: &chrono::DateTime<chrono::Utc>| t.format("%H:%M:%S%.3f").to_string();

    process_info!(pid, "📊 RUN RESULTS {} repetition {}", result.run_id, result.repetition + 1);
    process_info!(
        pid,
        "   received {}/{} messages, loss {:.2}%",
        result.total_received,
        result.expected_total,
        result.loss_percent
    );
    process_info!(
        pid,
        "   start {} expected finish {} actual finish {}",
        stamp(&result.start),
        stamp(&result.expected_finish),
        stamp(&result.actual_finish)
    );
    process_info!(
        pid,
        "   elapsed {:.3}s expected {:.3}s time factor {:.3}",
        result.elapsed_secs,
        result.expected_secs,
        result.time_factor
    );
    process_info!(
        pid,
        "   frequency {:.2} Hz ({:.2}% of target)",
        result.achieved_frequency,
        result.frequency_factor
    );
    if stray > 0 {
        process_warn!(pid, "   {} stray messages excluded from the totals", stray);
    }
}

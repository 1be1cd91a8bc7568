//! Test helpers and builder patterns for coordinator tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use controller::traits::{MockBrokerSupervisor, MockCaptureManager, MockTransport};
use controller::{BenchSettings, Coordinator, TransportEvent};
use shared::{BeginRun, QosLevel};

use super::fixtures::TestFixtures;

/// Participant behaviour for one attempt, given the begin-run order and the
/// zero-based attempt number across the whole session
pub type Script = Arc<dyn Fn(&BeginRun, u32) -> Vec<TransportEvent> + Send + Sync>;

pub type TestCoordinator = Coordinator<MockBrokerSupervisor, MockTransport, MockCaptureManager>;

/// Everything the mock transport observed
#[derive(Default)]
pub struct Recorded {
    pub published: Vec<(String, Vec<u8>)>,
    pub subscribed: Vec<(String, QosLevel)>,
    pub unsubscribed: Vec<String>,
    pub disconnects: u32,
}

/// A coordinator plus handles on its mocks
pub struct Harness {
    pub coordinator: TestCoordinator,
    pub recorded: Arc<Mutex<Recorded>>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl Harness {
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn begin_orders(&self) -> Vec<BeginRun> {
        self.published_on(TestFixtures::BEGIN_TOPIC)
            .iter()
            .map(|payload| serde_json::from_slice::<BeginRun>(payload).unwrap())
            .collect()
    }

    pub fn unsubscribe_count(&self, topic: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .unsubscribed
            .iter()
            .filter(|t| *t == topic)
            .count()
    }
}

/// Builder for test coordinators with sensible defaults
pub struct CoordinatorBuilder {
    settings: BenchSettings,
    broker: MockBrokerSupervisor,
    capture: MockCaptureManager,
    script: Script,
    initial_events: Vec<TransportEvent>,
    capture_configured: bool,
    tx: mpsc::Sender<TransportEvent>,
    rx: mpsc::Receiver<TransportEvent>,
}

impl CoordinatorBuilder {
    pub fn new(settings: BenchSettings) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        Self {
            tx,
            rx,
            settings,
            broker: MockBrokerSupervisor::new(),
            capture: MockCaptureManager::new(),
            script: Arc::new(|order, _| TestFixtures::complete_run(order)),
            initial_events: Vec::new(),
            capture_configured: false,
        }
    }

    /// Sender into the coordinator's event stream, for mocks that act like the bus
    pub fn sender(&self) -> mpsc::Sender<TransportEvent> {
        self.tx.clone()
    }

    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&BeginRun, u32) -> Vec<TransportEvent> + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    /// Events queued before the coordinator connects
    pub fn with_initial_events(mut self, events: Vec<TransportEvent>) -> Self {
        self.initial_events = events;
        self
    }

    pub fn with_broker<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockBrokerSupervisor),
    {
        setup(&mut self.broker);
        self
    }

    pub fn with_capture<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockCaptureManager),
    {
        setup(&mut self.capture);
        self.capture_configured = true;
        self
    }

    pub fn build(mut self) -> Harness {
        let tx = self.tx.clone();
        let rx = self.rx;
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        if self.initial_events.is_empty() && !self.settings.broker.launch {
            self.initial_events.push(TransportEvent::Connected { session: 1 });
        }
        for event in self.initial_events.drain(..) {
            tx.try_send(event).unwrap();
        }

        if !self.capture_configured {
            self.capture.expect_open().returning(|_, _| None);
        }

        let mut transport = MockTransport::new();
        transport.expect_connect().return_once(move || Ok(rx));

        let publish_log = recorded.clone();
        let participants = tx.clone();
        let attempts = Arc::new(AtomicU32::new(0));
        let script = self.script.clone();
        transport.expect_publish().returning(move |topic, payload, _qos| {
            publish_log
                .lock()
                .unwrap()
                .published
                .push((topic.to_string(), payload.clone()));

            if topic == TestFixtures::BEGIN_TOPIC {
                let order = serde_json::from_slice::<BeginRun>(&payload).unwrap();
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                for event in script(&order, attempt) {
                    participants.try_send(event).unwrap();
                }
            }
            Ok(())
        });

        let subscribe_log = recorded.clone();
        transport.expect_subscribe().returning(move |topic, qos| {
            subscribe_log.lock().unwrap().subscribed.push((topic.to_string(), qos));
            Ok(())
        });

        let unsubscribe_log = recorded.clone();
        transport.expect_unsubscribe().returning(move |topic| {
            unsubscribe_log.lock().unwrap().unsubscribed.push(topic.to_string());
            Ok(())
        });

        let disconnect_log = recorded.clone();
        transport.expect_disconnect().returning(move || {
            disconnect_log.lock().unwrap().disconnects += 1;
            Ok(())
        });

        let coordinator = Coordinator::new(Arc::new(self.settings), self.broker, transport, self.capture);

        Harness {
            coordinator,
            recorded,
            events: tx,
        }
    }
}

/// Common assertions and shortcuts
pub struct TestHelpers;

impl TestHelpers {
    /// Run with a hard ceiling so a stuck state machine fails instead of hanging
    pub async fn run(harness: &mut Harness) -> controller::ControllerResult<controller::RunReport> {
        tokio::time::timeout(std::time::Duration::from_secs(10), harness.coordinator.run())
            .await
            .expect("coordinator did not finish in time")
    }

    pub fn assert_finish_sent_once(harness: &Harness) {
        assert_eq!(harness.published_on(TestFixtures::FINISH_TOPIC).len(), 1);
    }
}

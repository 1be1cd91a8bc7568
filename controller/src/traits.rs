//! Trait definitions with mockall annotations for testing
//!
//! The coordinator only talks to the outside world through these seams: the
//! broker process, the pub/sub transport and the packet recorder. Real
//! implementations live in `services`; tests use the generated mocks.

use chrono::{DateTime, Utc};
use shared::{ProcessId, QosLevel};
use std::path::PathBuf;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::RunConfig;
use crate::error::ControllerResult;

/// Events produced by the transport's delivery context
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Session established; `session` counts connects since start
    Connected { session: u32 },
    /// Broker answered the connect with a non-success code
    ConnectionRefused { code: String },
    Disconnected { reason: String },
    /// One data message from a participant, stamped on receipt
    DataMessage { participant: u32, received_at: DateTime<Utc> },
    ParticipantDone { participant: Option<ProcessId> },
    VoidRequested { origin: String },
}

/// Identifies one attempt of one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunIdentity {
    /// Shared by every repetition of a configuration
    pub run_id: Uuid,
    pub run_index: usize,
    pub repetition: u32,
    /// Counts every attempt of this repetition, voided ones included
    pub attempt: u32,
}

/// An active packet recording bound to one run attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    pub interface: String,
    pub filter: String,
    pub output: PathBuf,
    pub duration_secs: f64,
    /// Per-configuration archive the output is appended to on success
    pub archive: PathBuf,
    pub buffer_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Success,
    Void,
    Error,
}

/// Lifecycle of the locally launched broker process
#[mockall::automock]
#[async_trait::async_trait]
pub trait BrokerSupervisor: Send + Sync {
    /// Rewrite the broker configuration, launch it, and confirm it stays up
    async fn start(&self) -> ControllerResult<()>;

    /// Liveness probe used by the coordinator's watchdog
    async fn is_running(&self) -> bool;

    /// Terminate the broker if it is running
    async fn stop(&self) -> ControllerResult<()>;
}

/// Pub/sub session owned by the controller
///
/// `connect` hands back the event stream produced by the delivery context.
/// Every other call is a pass-through to the bus at the requested QoS.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> ControllerResult<mpsc::Receiver<TransportEvent>>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel) -> ControllerResult<()>;

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> ControllerResult<()>;

    async fn unsubscribe(&self, topic: &str) -> ControllerResult<()>;

    async fn disconnect(&self) -> ControllerResult<()>;
}

/// Optional packet capture around each run attempt
#[mockall::automock]
#[async_trait::async_trait]
pub trait CaptureManager: Send + Sync {
    /// Start a recorder for this attempt; `None` when capture is disabled or
    /// the recorder could not be started
    async fn open(&self, identity: &RunIdentity, config: &RunConfig) -> Option<CaptureSession>;

    /// Archive on success, discard otherwise
    async fn close(&self, session: CaptureSession, outcome: CaptureOutcome) -> ControllerResult<()>;
}

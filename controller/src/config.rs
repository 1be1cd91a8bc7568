//! Static benchmark configuration
//!
//! Loaded once from a JSON document, validated, then shared read-only with
//! every component behind an `Arc`.

use serde::{Deserialize, Serialize};
use shared::QosLevel;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ControllerError, ControllerResult};

/// A parameter given either once for every run or once per run index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerRun<T> {
    Single(T),
    Each(Vec<T>),
}

impl<T: Clone> PerRun<T> {
    /// Number of entries when given as a sequence
    pub fn sequence_len(&self) -> Option<usize> {
        match self {
            PerRun::Single(_) => None,
            PerRun::Each(values) => Some(values.len()),
        }
    }

    /// Value for a run index; a single value applies to every run
    pub fn resolve(&self, run: usize) -> Option<T> {
        match self {
            PerRun::Single(value) => Some(value.clone()),
            PerRun::Each(values) => values.get(run).cloned(),
        }
    }

    /// Every value this parameter can take
    pub fn values(&self) -> Vec<T> {
        match self {
            PerRun::Single(value) => vec![value.clone()],
            PerRun::Each(values) => values.clone(),
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchSettings {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub topics: TopicSettings,
    pub system: SystemSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_client_id() -> String {
    "controller".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Launch and supervise a local broker process
    pub launch: bool,
    pub binary: String,
    pub config_path: PathBuf,
    /// Max queued QoS 1/2 messages per client
    pub queue_size: u32,
    pub tcp_nodelay: bool,
    pub settle_secs: f64,
    pub max_packet_size: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            launch: true,
            binary: "mosquitto".to_string(),
            config_path: PathBuf::from("conf/mosquitto.conf"),
            queue_size: 1000,
            tcp_nodelay: true,
            settle_secs: 3.0,
            max_packet_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    /// Wildcard filter for participant data, e.g. `bench/data/#`
    pub data: String,
    pub begin_run: String,
    pub participant_done: String,
    pub void_run: String,
    pub finish: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            data: "bench/data/#".to_string(),
            begin_run: "bench/begin".to_string(),
            participant_done: "bench/done".to_string(),
            void_run: "bench/void".to_string(),
            finish: "bench/finish".to_string(),
        }
    }
}

impl TopicSettings {
    /// Topic prefix shared by every participant data topic
    pub fn data_prefix(&self) -> &str {
        self.data.trim_end_matches('#')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Declared number of distinct run configurations
    pub runs: usize,
    /// Successful repetitions required per configuration
    pub repetitions: u32,
    pub message_details: MessageDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetails {
    pub client_amount: PerRun<u32>,
    pub msg_qos: PerRun<QosLevel>,
    pub msg_amount: PerRun<u64>,
    pub msg_size: PerRun<u64>,
    pub msg_freq: PerRun<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub enable: bool,
    pub binary: String,
    pub folder: PathBuf,
    pub interface: String,
    pub filter: String,
    pub extension: String,
    /// Recorder capture buffer, in MiB
    pub buffer_size: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enable: false,
            binary: "dumpcap".to_string(),
            folder: PathBuf::from("captures"),
            interface: "eth0".to_string(),
            filter: "tcp port 1883".to_string(),
            extension: ".pcapng".to_string(),
            buffer_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Wait after the first connect so participants can come online
    pub startup_delay_secs: f64,
    pub connect_timeout_secs: f64,
    /// Pause after a void before re-sending the same configuration
    pub void_sync_delay_secs: f64,
    /// Slack added to the capture window before assuming a lost void signal
    pub watchdog_grace_secs: f64,
    pub capture_margin_secs: f64,
    pub broker_poll_interval_secs: f64,
    /// Retransmission allowance indexed by QoS level
    pub retransmission_allowance_secs: Vec<f64>,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            startup_delay_secs: 30.0,
            connect_timeout_secs: 60.0,
            void_sync_delay_secs: 60.0,
            watchdog_grace_secs: 10.0,
            capture_margin_secs: 7.5,
            broker_poll_interval_secs: 20.0,
            retransmission_allowance_secs: vec![1.0, 5.0, 10.0],
        }
    }
}

impl TimingSettings {
    pub fn startup_delay(&self) -> Duration {
        secs(self.startup_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn void_sync_delay(&self) -> Duration {
        secs(self.void_sync_delay_secs)
    }

    pub fn watchdog_grace(&self) -> Duration {
        secs(self.watchdog_grace_secs)
    }

    pub fn broker_poll_interval(&self) -> Duration {
        secs(self.broker_poll_interval_secs)
    }

    /// Allowance for a QoS level; levels past the list reuse its last entry
    pub fn retransmission_allowance(&self, qos: QosLevel) -> f64 {
        let index = qos.level() as usize;
        self.retransmission_allowance_secs
            .get(index)
            .or_else(|| self.retransmission_allowance_secs.last())
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub folder: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("logs"),
        }
    }
}

/// Convert a seconds knob to a `Duration`, clamping negatives to zero and
/// oversized values to `Duration::MAX`
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

impl BenchSettings {
    /// Load and validate settings from a JSON file
    pub async fn load(path: &Path) -> ControllerResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControllerError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse and validate settings from a JSON document
    pub fn from_json(content: &str) -> ControllerResult<Self> {
        let settings: BenchSettings =
            serde_json::from_str(content).map_err(|e| ControllerError::config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Structural checks that do not depend on the run plan
    pub fn validate(&self) -> ControllerResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(ControllerError::config("client_id must not be empty"));
        }
        if !self.topics.data.ends_with('#') {
            return Err(ControllerError::config(format!(
                "data topic '{}' must be a wildcard filter ending in '#'",
                self.topics.data
            )));
        }
        if self.timing.retransmission_allowance_secs.is_empty() {
            return Err(ControllerError::config("retransmission_allowance_secs must not be empty"));
        }
        Ok(())
    }
}

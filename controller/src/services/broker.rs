//! Broker process supervision
//!
//! Launches the local broker as a child process after rewriting the three
//! operational parameters the benchmark controls, and answers liveness probes.

use async_trait::async_trait;
use chrono::Utc;
use regex::{NoExpand, Regex};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use shared::{logging, process_debug, process_info, ProcessId};

use super::process::{is_process_running, terminate_gracefully};
use crate::config::{secs, BenchSettings, BrokerSettings};
use crate::error::{ControllerError, ControllerResult};
use crate::traits::BrokerSupervisor;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Values written into the broker's own configuration before each launch
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfigParams {
    pub log_dest: PathBuf,
    pub queue_size: u32,
    pub tcp_nodelay: bool,
}

/// Replace the managed directives in a broker configuration, appending any
/// that are missing. Every other line is left untouched.
pub fn rewrite_broker_config(text: &str, params: &BrokerConfigParams) -> ControllerResult<String> {
    let directives = [
        ("log_dest", format!("log_dest file {}", params.log_dest.display())),
        ("max_queued_messages", format!("max_queued_messages {}", params.queue_size)),
        ("set_tcp_nodelay", format!("set_tcp_nodelay {}", params.tcp_nodelay)),
    ];

    let mut rewritten = text.to_string();
    for (key, line) in directives {
        let pattern = if key == "log_dest" {
            r"(?m)^log_dest\s+file\s+.+$".to_string()
        } else {
            format!(r"(?m)^{key}\s+.+$")
        };
        let re = Regex::new(&pattern).map_err(|e| ControllerError::config(format!("bad pattern for {key}: {e}")))?;

        if re.is_match(&rewritten) {
            rewritten = re.replace_all(&rewritten, NoExpand(&line)).into_owned();
        } else {
            if !rewritten.is_empty() && !rewritten.ends_with('\n') {
                rewritten.push('\n');
            }
            rewritten.push_str(&line);
            rewritten.push('\n');
        }
    }

    Ok(rewritten)
}

/// Supervises a broker launched by this process
pub struct RealBrokerSupervisor {
    settings: BrokerSettings,
    log_folder: PathBuf,
    child: Mutex<Option<Child>>,
}

impl RealBrokerSupervisor {
    pub fn new(settings: &BenchSettings) -> Self {
        Self {
            settings: settings.broker.clone(),
            log_folder: settings.logging.folder.clone(),
            child: Mutex::new(None),
        }
    }

    /// Log file for this launch, stamped so restarts never overwrite
    fn log_destination(&self) -> PathBuf {
        let stamp = Utc::now().format("%d-%m-%Y_%H-%M-%S");
        self.log_folder.join(format!("mosquitto-T{stamp}.log"))
    }

    async fn prepare_config(&self, config_path: &Path) -> ControllerResult<()> {
        tokio::fs::create_dir_all(&self.log_folder).await?;

        let text = tokio::fs::read_to_string(config_path)
            .await
            .map_err(|e| ControllerError::broker(format!("cannot read {}: {e}", config_path.display())))?;
        let params = BrokerConfigParams {
            log_dest: self.log_destination(),
            queue_size: self.settings.queue_size,
            tcp_nodelay: self.settings.tcp_nodelay,
        };
        let rewritten = rewrite_broker_config(&text, &params)?;
        tokio::fs::write(config_path, rewritten).await?;

        process_debug!(
            ProcessId::current(),
            "📝 Broker config updated: log {}, queue {}, nodelay {}",
            params.log_dest.display(),
            params.queue_size,
            params.tcp_nodelay
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerSupervisor for RealBrokerSupervisor {
    async fn start(&self) -> ControllerResult<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if is_process_running(child) {
                process_debug!(ProcessId::current(), "Broker already running");
                return Ok(());
            }
        }

        let config_path = self.settings.config_path.clone();
        self.prepare_config(&config_path).await?;

        let mut child = Command::new(&self.settings.binary)
            .arg("-c")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControllerError::broker(format!("cannot launch {}: {e}", self.settings.binary)))?;

        process_info!(
            ProcessId::current(),
            "⏳ Broker launched, settling for {:.1}s",
            self.settings.settle_secs
        );
        tokio::time::sleep(secs(self.settings.settle_secs)).await;

        if !is_process_running(&mut child) {
            return Err(ControllerError::broker(format!(
                "{} exited during the settle interval",
                self.settings.binary
            )));
        }

        *guard = Some(child);
        logging::log_success(ProcessId::current(), "Broker is running");
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.child.lock().await.as_mut().map(is_process_running).unwrap_or(false)
    }

    async fn stop(&self) -> ControllerResult<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            terminate_gracefully(&mut child, "broker", STOP_GRACE).await?;
            process_info!(ProcessId::current(), "🛑 Broker stopped");
        }
        Ok(())
    }
}

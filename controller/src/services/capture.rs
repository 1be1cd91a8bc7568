//! Packet capture around run attempts
//!
//! Each attempt gets its own recorder process and raw capture file. Successful
//! attempts are appended to one zip archive per configuration; voided ones are
//! deleted unarchived. Capture is diagnostic: a recorder that fails to start
//! only costs the capture, never the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use shared::{logging, process_debug, process_info, process_warn, ProcessId};

use super::process::{is_process_running, terminate_gracefully};
use crate::config::{secs, BenchSettings, CaptureSettings, TimingSettings};
use crate::core::RunConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::traits::{CaptureManager, CaptureOutcome, CaptureSession, RunIdentity};

/// Extra time a finished recorder gets to flush before it is stopped
const FLUSH_GRACE: Duration = Duration::from_secs(5);

/// File locations for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePaths {
    pub folder: PathBuf,
    pub output: PathBuf,
    pub archive: PathBuf,
}

/// Derive the deterministic capture names for an attempt.
///
/// The archive depends only on the configuration and its run id, so every
/// repetition lands in the same file; the raw output adds the repetition and
/// a timestamp.
pub fn capture_paths(
    settings: &CaptureSettings,
    client_id: &str,
    identity: &RunIdentity,
    config: &RunConfig,
    stamp: DateTime<Utc>,
) -> CapturePaths {
    let folder = settings.folder.join(format!("{}C", config.participant_count));
    let basename = format!(
        "{client_id}-Q{}-A{}-S{}-F{}",
        config.qos.level(),
        config.message_amount,
        config.message_size,
        config.frequency
    );

    let output = folder.join(format!(
        "{basename}-R{}-T{}{}",
        identity.repetition + 1,
        stamp.format("%d-%m-%Y_%H-%M-%S"),
        settings.extension
    ));
    let archive = folder.join(format!("{basename}-U{}.zip", identity.run_id));

    CapturePaths {
        folder,
        output,
        archive,
    }
}

/// Command line for the external recorder
pub fn recorder_args(session: &CaptureSession) -> Vec<String> {
    vec![
        "-i".to_string(),
        session.interface.clone(),
        "-P".to_string(),
        "-f".to_string(),
        session.filter.clone(),
        "-a".to_string(),
        format!("duration:{}", session.duration_secs.ceil() as u64),
        "-B".to_string(),
        session.buffer_size.to_string(),
        "-w".to_string(),
        session.output.display().to_string(),
    ]
}

/// Append `raw` to `archive` (created on first use), then delete `raw`
pub fn append_to_archive(raw: &Path, archive: &Path) -> ControllerResult<()> {
    let archive_err = |message: String| ControllerError::ArchiveError {
        path: archive.display().to_string(),
        message,
    };

    let entry_name = raw
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| archive_err(format!("invalid capture file name {}", raw.display())))?
        .to_string();

    let mut writer = if archive.exists() {
        let file = OpenOptions::new().read(true).write(true).open(archive)?;
        ZipWriter::new_append(file).map_err(|e| archive_err(e.to_string()))?
    } else {
        ZipWriter::new(File::create(archive)?)
    };

    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(entry_name, options)
        .map_err(|e| archive_err(e.to_string()))?;
    let mut source = File::open(raw)?;
    std::io::copy(&mut source, &mut writer)?;
    writer.finish().map_err(|e| archive_err(e.to_string()))?;

    std::fs::remove_file(raw)?;
    Ok(())
}

/// Recorder-backed capture manager
pub struct RealCaptureManager {
    settings: CaptureSettings,
    timing: TimingSettings,
    client_id: String,
    recorders: Mutex<HashMap<PathBuf, Child>>,
}

impl RealCaptureManager {
    pub fn new(settings: &BenchSettings) -> Self {
        Self {
            settings: settings.capture.clone(),
            timing: settings.timing.clone(),
            client_id: settings.client_id.clone(),
            recorders: Mutex::new(HashMap::new()),
        }
    }

    async fn spawn_recorder(&self, session: &CaptureSession) -> std::io::Result<Child> {
        Command::new(&self.settings.binary)
            .args(recorder_args(session))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }

    async fn archive(&self, session: &CaptureSession) -> ControllerResult<()> {
        let raw = session.output.clone();
        let archive = session.archive.clone();
        tokio::task::spawn_blocking(move || append_to_archive(&raw, &archive))
            .await
            .map_err(|e| ControllerError::ArchiveError {
                path: session.archive.display().to_string(),
                message: e.to_string(),
            })?
    }

    async fn discard(&self, session: &CaptureSession) -> ControllerResult<()> {
        match tokio::fs::remove_file(&session.output).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CaptureManager for RealCaptureManager {
    async fn open(&self, identity: &RunIdentity, config: &RunConfig) -> Option<CaptureSession> {
        if !self.settings.enable {
            return None;
        }

        let paths = capture_paths(&self.settings, &self.client_id, identity, config, Utc::now());
        if let Err(e) = tokio::fs::create_dir_all(&paths.folder).await {
            logging::log_error(ProcessId::current(), "Creating capture folder", &e);
            return None;
        }

        let session = CaptureSession {
            interface: self.settings.interface.clone(),
            filter: self.settings.filter.clone(),
            output: paths.output,
            duration_secs: config.capture_duration(&self.timing),
            archive: paths.archive,
            buffer_size: self.settings.buffer_size,
        };

        let mut child = match self.spawn_recorder(&session).await {
            Ok(child) => child,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Recorder failed to start ({}), continuing without capture", e);
                return None;
            }
        };
        if !is_process_running(&mut child) {
            process_warn!(ProcessId::current(), "⚠️ Recorder exited immediately, continuing without capture");
            return None;
        }

        process_info!(
            ProcessId::current(),
            "🎥 Capturing on {} ({}) for {:.2}s into {}",
            session.interface,
            session.filter,
            session.duration_secs,
            session.output.display()
        );
        self.recorders.lock().await.insert(session.output.clone(), child);
        Some(session)
    }

    async fn close(&self, session: CaptureSession, outcome: CaptureOutcome) -> ControllerResult<()> {
        let recorder = self.recorders.lock().await.remove(&session.output);

        match outcome {
            CaptureOutcome::Success => {
                if let Some(mut child) = recorder {
                    // The recorder stops itself once its duration elapses
                    let limit = secs(session.duration_secs) + FLUSH_GRACE;
                    if tokio::time::timeout(limit, child.wait()).await.is_err() {
                        terminate_gracefully(&mut child, "recorder", FLUSH_GRACE).await?;
                    }
                }
                self.archive(&session).await?;
                process_info!(
                    ProcessId::current(),
                    "🗜️ Archived {} into {}",
                    session.output.display(),
                    session.archive.display()
                );
            }
            CaptureOutcome::Void | CaptureOutcome::Error => {
                if let Some(mut child) = recorder {
                    terminate_gracefully(&mut child, "recorder", FLUSH_GRACE).await?;
                }
                self.discard(&session).await?;
                process_debug!(ProcessId::current(), "🗑️ Discarded {}", session.output.display());
            }
        }
        Ok(())
    }
}

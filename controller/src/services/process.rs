//! Child process helpers shared by the broker and capture services

use std::time::Duration;
use tokio::process::Child;

use shared::{process_debug, process_warn, ProcessId};

/// Check if a child process is still running
pub fn is_process_running(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(None) => true,     // Still running
        Ok(Some(_)) => false, // Exited
        Err(_) => false,      // Error checking status
    }
}

/// Ask a child to exit with SIGTERM, falling back to a kill after `grace`
pub async fn terminate_gracefully(child: &mut Child, name: &str, grace: Duration) -> std::io::Result<()> {
    if !is_process_running(child) {
        process_debug!(ProcessId::current(), "✅ {} already exited", name);
        return Ok(());
    }

    if send_sigterm(child, name) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            let status = status?;
            process_debug!(ProcessId::current(), "🛑 {} exited with {}", name, status);
            return Ok(());
        }
        process_warn!(ProcessId::current(), "🔨 {} ignored SIGTERM, killing", name);
    }

    child.kill().await
}

#[cfg(unix)]
fn send_sigterm(child: &Child, name: &str) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(e) => {
            process_warn!(ProcessId::current(), "⚠️ Failed to signal {} ({}): {}", name, pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child, _name: &str) -> bool {
    false
}

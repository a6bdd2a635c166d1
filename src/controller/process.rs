/*!
 * Worker process liveness and termination.
 *
 * Signals are delivered through the system `kill` utility. Signalling a
 * process that is already gone is not an error for the controller: stop and
 * delete must succeed on dead or stale pids, so lifecycle failures are
 * logged and swallowed here.
 */

use log::{debug, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Child;

// Interval between liveness checks while waiting for a worker to exit
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
enum ProcessLifecycleError {
    #[error("process {0} does not exist")]
    NoSuchProcess(u32),

    #[error("cannot signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

fn send_signal(pid: u32, signal: &str) -> Result<(), ProcessLifecycleError> {
    // pid 0 would address the whole process group
    if pid == 0 {
        return Err(ProcessLifecycleError::NoSuchProcess(pid));
    }

    let output = std::process::Command::new("kill")
        .arg(signal)
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ProcessLifecycleError::Signal {
            pid,
            reason: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_lowercase().contains("no such process") {
        Err(ProcessLifecycleError::NoSuchProcess(pid))
    } else {
        Err(ProcessLifecycleError::Signal {
            pid,
            reason: stderr.trim().to_string(),
        })
    }
}

/// Whether a process with this pid exists and can be signalled
pub fn is_alive(pid: u32) -> bool {
    send_signal(pid, "-0").is_ok()
}

/// Ask a process to terminate; already-dead processes count as success
pub fn request_termination(pid: u32) {
    match send_signal(pid, "-TERM") {
        Ok(()) => debug!("Sent SIGTERM to {}", pid),
        Err(e @ ProcessLifecycleError::NoSuchProcess(_)) => debug!("{}", e),
        Err(e) => warn!("{}", e),
    }
}

fn force_kill(pid: u32) {
    match send_signal(pid, "-KILL") {
        Ok(()) => warn!("Worker {} ignored SIGTERM and was killed", pid),
        Err(e) => debug!("{}", e),
    }
}

/// Terminate a process this controller did not spawn.
///
/// Sends SIGTERM, waits up to `grace`, then sends SIGKILL.
pub async fn terminate_pid(pid: u32, grace: Duration) {
    if !is_alive(pid) {
        debug!("Process {} is not running", pid);
        return;
    }

    request_termination(pid);
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        if !is_alive(pid) {
            return;
        }
    }
    force_kill(pid);
}

/// What polling an owned child found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Exited(ExitStatus),
    /// The status could not be queried
    Gone,
}

/// Poll an owned child without blocking; reaps it when it has exited
pub fn poll_child(child: &mut Child) -> ChildState {
    match child.try_wait() {
        Ok(None) => ChildState::Running,
        Ok(Some(status)) => {
            debug!("Worker exited with {}", status);
            ChildState::Exited(status)
        }
        Err(e) => {
            debug!("Cannot query worker status: {}", e);
            ChildState::Gone
        }
    }
}

/// Whether an owned child is still running
pub fn child_running(child: &mut Child) -> bool {
    poll_child(child) == ChildState::Running
}

/// Terminate an owned child and reap it
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    if !child_running(child) {
        return;
    }

    if let Some(pid) = child.id() {
        request_termination(pid);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Worker {} exited with {}", pid, status);
                return;
            }
            Ok(Err(e)) => debug!("Waiting for worker {} failed: {}", pid, e),
            Err(_) => warn!("Worker {} did not exit within {:?}", pid, grace),
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("Kill failed: {}", e);
    }
    if let Err(e) = child.wait().await {
        debug!("Reaping worker failed: {}", e);
    }
}

/// Signal delivery for worker termination.
///
/// Graceful is SIGTERM, forceful is SIGKILL. A target that leads its own
/// process group (every worker the console launches does) is signalled as a
/// group so the worker's own children go down with it.
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Graceful,
    Forceful,
}

/// What happened when a signal was sent to one PID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationOutcome {
    Delivered,
    /// Exited between locate and signal; counts as already gone.
    NoSuchProcess,
    PermissionDenied,
    Failed(String),
}

/// One escalation attempt against one PID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationRequest {
    pub pid: u32,
    pub signal: SignalKind,
    pub attempted_at: DateTime<Utc>,
    pub outcome: TerminationOutcome,
}

/// Delivers termination signals.
pub trait Terminator: Send + Sync {
    fn signal(&self, pid: u32, kind: SignalKind) -> TerminationOutcome;
}

/// Send a signal and record the attempt.
pub fn request(terminator: &dyn Terminator, pid: u32, kind: SignalKind) -> TerminationRequest {
    let attempted_at = Utc::now();
    let outcome = terminator.signal(pid, kind);
    match &outcome {
        TerminationOutcome::Delivered => tracing::info!(pid, signal = ?kind, "signal delivered"),
        TerminationOutcome::NoSuchProcess => {
            tracing::debug!(pid, signal = ?kind, "process already gone")
        }
        TerminationOutcome::PermissionDenied => {
            tracing::warn!(pid, signal = ?kind, "permission denied signalling worker")
        }
        TerminationOutcome::Failed(e) => {
            tracing::warn!(pid, signal = ?kind, error = %e, "failed to signal worker")
        }
    }
    TerminationRequest {
        pid,
        signal: kind,
        attempted_at,
        outcome,
    }
}

/// Terminator backed by `kill(2)` / `killpg(2)`.
pub struct NixTerminator;

impl Terminator for NixTerminator {
    fn signal(&self, pid: u32, kind: SignalKind) -> TerminationOutcome {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::{getpgid, Pid};

        let Ok(raw) = i32::try_from(pid) else {
            return TerminationOutcome::Failed(format!("pid {pid} out of range"));
        };
        if raw <= 1 {
            return TerminationOutcome::Failed(format!("refusing to signal pid {pid}"));
        }
        let target = Pid::from_raw(raw);
        let signal = match kind {
            SignalKind::Graceful => Signal::SIGTERM,
            SignalKind::Forceful => Signal::SIGKILL,
        };

        let leads_group = matches!(getpgid(Some(target)), Ok(pgid) if pgid == target);
        let result = if leads_group {
            killpg(target, signal)
        } else {
            kill(target, signal)
        };

        match result {
            Ok(()) => TerminationOutcome::Delivered,
            Err(Errno::ESRCH) => TerminationOutcome::NoSuchProcess,
            Err(Errno::EPERM) => TerminationOutcome::PermissionDenied,
            Err(e) => TerminationOutcome::Failed(e.to_string()),
        }
    }
}

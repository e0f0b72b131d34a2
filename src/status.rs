/// Status and control reports: what the API returns and the CLI prints.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::launcher::LaunchedWorker;
use crate::locator::ProcessHandle;
use crate::signals::TerminationRequest;
use crate::supervisor::{
    Operation, RestartReport, StopOutcome, StopReport, SupervisorError, SupervisorState,
};

/// The JSON payload of `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub running: bool,
    /// Only when exactly one worker is running.
    pub pid: Option<u32>,
    pub last_check: DateTime<Utc>,
    pub state: &'static str,
    pub pids: Vec<u32>,
    pub operation: Option<Operation>,
    /// How long the single running worker has been up, e.g. `"2h 5m 0s"`.
    pub uptime: Option<String>,
    pub processes: Vec<ProcessHandle>,
}

impl StatusReport {
    pub fn new(state: &SupervisorState, operation: Option<Operation>) -> Self {
        let now = Utc::now();
        let uptime = match state {
            SupervisorState::Running(handle) => handle
                .started_at
                .map(|t| format_uptime((now - t).num_seconds())),
            _ => None,
        };
        Self {
            running: state.is_running(),
            pid: state.pid(),
            last_check: now,
            state: state.label(),
            pids: state.handles().iter().map(|h| h.pid).collect(),
            operation,
            uptime,
            processes: state.handles().to_vec(),
        }
    }

    /// Human-readable form for the CLI.
    pub fn render(&self) -> String {
        let mut out = match (self.state, self.pid) {
            ("running", Some(pid)) => format!("worker: running (pid {pid})"),
            ("ambiguous", _) => format!(
                "worker: AMBIGUOUS, {} matching processes (pids {})",
                self.pids.len(),
                join_pids(&self.pids)
            ),
            _ => "worker: stopped".to_string(),
        };
        if let Some(uptime) = &self.uptime {
            out.push_str(&format!("\nuptime: {uptime}"));
        }
        for p in &self.processes {
            out.push_str(&format!("\n  {:>7}  {}", p.pid, p.command_line));
        }
        if let Some(op) = self.operation {
            out.push_str(&format!("\noperation in progress: {}", operation_label(op)));
        }
        out.push_str(&format!("\nchecked: {}", self.last_check.to_rfc3339()));
        out
    }
}

/// The JSON payload of a handled `POST /control`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReply {
    pub success: bool,
    pub message: String,
    /// When the new worker was spawned, for start and restart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Every signal sent while stopping, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<TerminationRequest>,
}

impl ControlReply {
    fn new(success: bool, message: String) -> Self {
        Self {
            success,
            message,
            started_at: None,
            signals: Vec::new(),
        }
    }

    pub fn started(worker: &LaunchedWorker) -> Self {
        Self {
            started_at: Some(worker.spawned_at),
            ..Self::new(true, format!("Worker started (pid {})", worker.pid))
        }
    }

    /// An expected refusal (already running, ambiguous). Not an error response.
    pub fn refused(err: &SupervisorError) -> Self {
        Self::new(false, format!("Start refused: {err}"))
    }

    pub fn stopped(report: &StopReport) -> Self {
        Self {
            signals: report.requests.clone(),
            ..Self::new(true, stop_message(report))
        }
    }

    pub fn restarted(report: &RestartReport) -> Self {
        let partial = report.stop.outcome == StopOutcome::PartialStop;
        let reply = match &report.start {
            Ok(worker) if partial => Self {
                started_at: Some(worker.spawned_at),
                ..Self::new(
                    true,
                    format!(
                        "Worker restarted (pid {}); warning: {}",
                        worker.pid,
                        stop_message(&report.stop)
                    ),
                )
            },
            Ok(worker) => Self {
                started_at: Some(worker.spawned_at),
                ..Self::new(true, format!("Worker restarted (pid {})", worker.pid))
            },
            Err(e) if partial => Self::new(
                false,
                format!("{}; start refused: {e}", stop_message(&report.stop)),
            ),
            Err(e) => Self::new(false, format!("Worker stopped but start refused: {e}")),
        };
        Self {
            signals: report.stop.requests.clone(),
            ..reply
        }
    }
}

/// `"1d 2h 3m 4s"`, leading zero units dropped.
fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        secs % 86_400 / 3_600,
        secs % 3_600 / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn stop_message(report: &StopReport) -> String {
    match report.outcome {
        StopOutcome::NothingToStop => "Nothing to stop".to_string(),
        StopOutcome::Stopped if report.targeted.len() == 1 => {
            format!("Worker stopped (pid {})", report.targeted[0])
        }
        StopOutcome::Stopped => format!("Worker stopped (pids {})", join_pids(&report.targeted)),
        StopOutcome::PartialStop => format!(
            "Stop incomplete: pids {} still alive after forceful kill; retry stop",
            join_pids(&report.survivor_pids())
        ),
    }
}

fn operation_label(op: Operation) -> &'static str {
    match op {
        Operation::Starting => "starting",
        Operation::Stopping => "stopping",
        Operation::Restarting => "restarting",
    }
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Process supervisor: liveness, idempotent start/stop/restart, escalation.
///
/// State is never stored. Every call derives it from a fresh process-table
/// snapshot, because the worker can crash or be killed by hand at any time.
/// The only thing held in memory is the operation guard that serializes
/// mutating calls, plus which operation currently holds it.
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::SupervisorConfig;
use crate::launcher::{LaunchError, LaunchedWorker, Launcher};
use crate::locator::{ProcessHandle, ProcessLocator, TableError};
use crate::signals::{self, SignalKind, TerminationRequest, Terminator};

/// Timing policy for stop/restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    /// How long a gracefully signalled worker gets before SIGKILL.
    pub grace: Duration,
    /// How long to wait after SIGKILL before the final re-check.
    pub kill_wait: Duration,
    /// Pause between the stop and start halves of a restart.
    pub settle: Duration,
    /// Re-check interval while waiting for exits.
    pub poll: Duration,
}

impl From<&SupervisorConfig> for SupervisorPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_ms),
            kill_wait: Duration::from_millis(config.kill_wait_ms),
            settle: Duration::from_millis(config.settle_ms),
            poll: Duration::from_millis(100),
        }
    }
}

/// Worker state as observed by one liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running(ProcessHandle),
    /// More than one process matches the signature.
    Ambiguous(Vec<ProcessHandle>),
}

impl SupervisorState {
    fn from_handles(mut handles: Vec<ProcessHandle>) -> Self {
        match handles.len() {
            0 => SupervisorState::Stopped,
            1 => SupervisorState::Running(handles.remove(0)),
            _ => SupervisorState::Ambiguous(handles),
        }
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        match self {
            SupervisorState::Stopped => &[],
            SupervisorState::Running(h) => std::slice::from_ref(h),
            SupervisorState::Ambiguous(hs) => hs,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, SupervisorState::Stopped)
    }

    /// The PID, only when exactly one worker is running.
    pub fn pid(&self) -> Option<u32> {
        match self {
            SupervisorState::Running(h) => Some(h.pid),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Running(_) => "running",
            SupervisorState::Ambiguous(_) => "ambiguous",
        }
    }
}

/// The mutating operation currently holding the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Starting,
    Stopping,
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    NothingToStop,
    Stopped,
    /// Some processes survived SIGKILL. A warning, not a failure.
    PartialStop,
}

#[derive(Debug, Clone)]
pub struct StopReport {
    pub outcome: StopOutcome,
    /// PIDs found by the first liveness check.
    pub targeted: Vec<u32>,
    pub requests: Vec<TerminationRequest>,
    /// Matches still present at the final re-check.
    pub survivors: Vec<ProcessHandle>,
}

impl StopReport {
    fn nothing() -> Self {
        Self {
            outcome: StopOutcome::NothingToStop,
            targeted: Vec::new(),
            requests: Vec::new(),
            survivors: Vec::new(),
        }
    }

    pub fn survivor_pids(&self) -> Vec<u32> {
        self.survivors.iter().map(|h| h.pid).collect()
    }
}

#[derive(Debug)]
pub struct RestartReport {
    pub stop: StopReport,
    /// The start half. Refusals (a survivor still running) land here rather
    /// than failing the restart, so the stop report is never lost.
    pub start: Result<LaunchedWorker, SupervisorError>,
}

pub struct Supervisor {
    locator: ProcessLocator,
    terminator: Arc<dyn Terminator>,
    launcher: Arc<dyn Launcher>,
    policy: SupervisorPolicy,
    guard: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<Operation>>,
}

impl Supervisor {
    pub fn new(
        locator: ProcessLocator,
        terminator: Arc<dyn Terminator>,
        launcher: Arc<dyn Launcher>,
        policy: SupervisorPolicy,
    ) -> Self {
        Self {
            locator,
            terminator,
            launcher,
            policy,
            guard: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(None),
        }
    }

    /// Liveness check. Never waits on the operation guard, so it may observe
    /// a start or stop half-way; callers re-poll.
    pub fn status(&self) -> Result<SupervisorState, SupervisorError> {
        let handles = self.locator.locate()?;
        Ok(SupervisorState::from_handles(handles))
    }

    /// The mutating operation in progress, if any.
    pub fn operation(&self) -> Option<Operation> {
        *lock_slot(&self.in_flight)
    }

    /// Launch the worker if, and only if, no matching process exists.
    ///
    /// Returns as soon as the process is spawned; poll [`Supervisor::status`]
    /// to confirm it stays up.
    pub async fn start(&self) -> Result<LaunchedWorker, SupervisorError> {
        let _guard = self.guard.lock().await;
        let _op = self.begin(Operation::Starting);
        self.start_locked()
    }

    /// Stop every matching process: SIGTERM, wait, SIGKILL what is left,
    /// re-check. Stopping a stopped worker succeeds with `NothingToStop`.
    pub async fn stop(&self) -> Result<StopReport, SupervisorError> {
        let _guard = self.guard.lock().await;
        let _op = self.begin(Operation::Stopping);
        self.stop_locked().await
    }

    /// Stop, settle, start, all under one guard acquisition.
    ///
    /// A partial stop does not prevent the start attempt. The start still
    /// re-checks liveness, so a survivor makes it refuse instead of spawning
    /// a duplicate.
    pub async fn restart(&self) -> Result<RestartReport, SupervisorError> {
        let _guard = self.guard.lock().await;
        let _op = self.begin(Operation::Restarting);

        let stop = self.stop_locked().await?;
        if stop.outcome == StopOutcome::PartialStop {
            tracing::warn!(
                survivors = ?stop.survivor_pids(),
                "restarting despite surviving worker processes"
            );
        }

        tokio::time::sleep(self.policy.settle).await;

        let start = self.start_locked();
        if let Err(e) = &start {
            tracing::warn!(error = %e, "restart: start half did not launch");
        }
        Ok(RestartReport { stop, start })
    }

    fn start_locked(&self) -> Result<LaunchedWorker, SupervisorError> {
        match self.status()? {
            SupervisorState::Stopped => {}
            SupervisorState::Running(handle) => {
                tracing::info!(pid = handle.pid, "start refused: worker already running");
                return Err(SupervisorError::AlreadyRunning(handle));
            }
            SupervisorState::Ambiguous(handles) => {
                tracing::warn!(
                    pids = ?handles.iter().map(|h| h.pid).collect::<Vec<_>>(),
                    "start refused: multiple worker processes"
                );
                return Err(SupervisorError::Ambiguous(handles));
            }
        }
        self.launcher.launch().map_err(|e| {
            tracing::error!(error = %e, "worker launch failed");
            SupervisorError::LaunchFailed(e)
        })
    }

    async fn stop_locked(&self) -> Result<StopReport, SupervisorError> {
        let targets = self.locator.locate()?;
        if targets.is_empty() {
            tracing::info!("stop: nothing to stop");
            return Ok(StopReport::nothing());
        }

        let targeted: Vec<u32> = targets.iter().map(|h| h.pid).collect();
        tracing::info!(pids = ?targeted, "stop: sending graceful termination");
        let mut requests: Vec<TerminationRequest> = targets
            .iter()
            .map(|h| signals::request(self.terminator.as_ref(), h.pid, SignalKind::Graceful))
            .collect();

        let remaining = self.wait_for_exit(self.policy.grace).await?;
        if remaining.is_empty() {
            tracing::info!(pids = ?targeted, "stop: worker exited");
            return Ok(StopReport {
                outcome: StopOutcome::Stopped,
                targeted,
                requests,
                survivors: Vec::new(),
            });
        }

        tracing::warn!(
            pids = ?remaining.iter().map(|h| h.pid).collect::<Vec<_>>(),
            grace_ms = self.policy.grace.as_millis() as u64,
            "stop: grace window elapsed, escalating to forceful kill"
        );
        requests.extend(
            remaining
                .iter()
                .map(|h| signals::request(self.terminator.as_ref(), h.pid, SignalKind::Forceful)),
        );

        tokio::time::sleep(self.policy.kill_wait).await;
        let survivors = self.locator.locate()?;
        let outcome = if survivors.is_empty() {
            tracing::info!(pids = ?targeted, "stop: worker killed");
            StopOutcome::Stopped
        } else {
            tracing::warn!(
                survivors = ?survivors.iter().map(|h| h.pid).collect::<Vec<_>>(),
                "stop: processes survived forceful kill"
            );
            StopOutcome::PartialStop
        };

        Ok(StopReport {
            outcome,
            targeted,
            requests,
            survivors,
        })
    }

    /// Re-check every `poll` until nothing matches or `window` has elapsed.
    /// Returns the matches from the last check.
    async fn wait_for_exit(&self, window: Duration) -> Result<Vec<ProcessHandle>, SupervisorError> {
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            let nap = self.policy.poll.min(deadline.saturating_duration_since(now));
            tokio::time::sleep(nap).await;
            let handles = self.locator.locate()?;
            if handles.is_empty() || Instant::now() >= deadline {
                return Ok(handles);
            }
        }
    }

    fn begin(&self, op: Operation) -> InFlight<'_> {
        *lock_slot(&self.in_flight) = Some(op);
        InFlight {
            slot: &self.in_flight,
        }
    }
}

/// Clears the in-flight marker on every exit path.
struct InFlight<'a> {
    slot: &'a Mutex<Option<Operation>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *lock_slot(self.slot) = None;
    }
}

fn lock_slot(slot: &Mutex<Option<Operation>>) -> MutexGuard<'_, Option<Operation>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors from supervisor operations.
#[derive(Debug)]
pub enum SupervisorError {
    /// The process table could not be read.
    ProcessTable(TableError),
    /// `start` found the worker already running.
    AlreadyRunning(ProcessHandle),
    /// `start` found more than one matching process.
    Ambiguous(Vec<ProcessHandle>),
    /// The worker could not be spawned.
    LaunchFailed(LaunchError),
}

impl SupervisorError {
    /// Infrastructure failures abort the operation; the rest are expected states.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SupervisorError::ProcessTable(_) | SupervisorError::LaunchFailed(_)
        )
    }
}

impl From<TableError> for SupervisorError {
    fn from(e: TableError) -> Self {
        SupervisorError::ProcessTable(e)
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::ProcessTable(e) => write!(f, "cannot read process table: {e}"),
            SupervisorError::AlreadyRunning(h) => {
                write!(f, "worker is already running (pid {})", h.pid)
            }
            SupervisorError::Ambiguous(hs) => {
                let pids: Vec<String> = hs.iter().map(|h| h.pid.to_string()).collect();
                write!(
                    f,
                    "multiple worker processes running (pids {}); stop them first",
                    pids.join(", ")
                )
            }
            SupervisorError::LaunchFailed(e) => write!(f, "launch failed: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::ProcessTable(e) => Some(e),
            SupervisorError::LaunchFailed(e) => Some(e),
            SupervisorError::AlreadyRunning(_) | SupervisorError::Ambiguous(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::TerminationOutcome;
    use crate::signature::WorkerSignature;
    use crate::testing::{entry, FakeLauncher, FakeTable, FakeTerminator};

    struct Rig {
        table: Arc<FakeTable>,
        terminator: Arc<FakeTerminator>,
        launcher: Arc<FakeLauncher>,
        supervisor: Arc<Supervisor>,
    }

    fn fast_policy() -> SupervisorPolicy {
        SupervisorPolicy {
            grace: Duration::from_millis(80),
            kill_wait: Duration::from_millis(10),
            settle: Duration::from_millis(10),
            poll: Duration::from_millis(10),
        }
    }

    fn rig(workers: &[u32]) -> Rig {
        let table = Arc::new(FakeTable::with_workers(workers));
        let terminator = Arc::new(FakeTerminator::new(Arc::clone(&table)));
        let launcher = Arc::new(FakeLauncher::new(Arc::clone(&table)));
        let sig =
            WorkerSignature::new(r"(^|/)python[0-9.]*$", r"(^|/)youtube_monitor\.py$").unwrap();
        let locator = ProcessLocator::new(table.clone(), sig);
        let supervisor = Arc::new(Supervisor::new(
            locator,
            terminator.clone(),
            launcher.clone(),
            fast_policy(),
        ));
        Rig {
            table,
            terminator,
            launcher,
            supervisor,
        }
    }

    #[test]
    fn test_status_stopped_with_no_matches() {
        let r = rig(&[]);
        let state = r.supervisor.status().unwrap();
        assert_eq!(state, SupervisorState::Stopped);
        assert_eq!(state.pid(), None);
        assert!(!state.is_running());
    }

    #[test]
    fn test_status_running_with_one_match() {
        let r = rig(&[4242]);
        let state = r.supervisor.status().unwrap();
        assert!(matches!(state, SupervisorState::Running(_)));
        assert_eq!(state.pid(), Some(4242));
        assert!(state.is_running());
    }

    #[test]
    fn test_status_ambiguous_with_two_matches() {
        let r = rig(&[4242, 4243]);
        let state = r.supervisor.status().unwrap();
        assert!(matches!(state, SupervisorState::Ambiguous(ref hs) if hs.len() == 2));
        assert_eq!(state.pid(), None);
        assert!(state.is_running());
        assert_eq!(state.label(), "ambiguous");
    }

    #[test]
    fn test_status_ignores_non_matching_processes() {
        let r = rig(&[]);
        r.table
            .insert(entry(77, "/usr/bin/grep", &["grep", "youtube_monitor.py"]));
        assert_eq!(r.supervisor.status().unwrap(), SupervisorState::Stopped);
    }

    #[test]
    fn test_status_table_failure_is_infrastructure_error() {
        let r = rig(&[]);
        r.table.fail_next_snapshots(1);
        let err = r.supervisor.status().unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessTable(_)));
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_start_when_stopped_launches() {
        let r = rig(&[]);
        let launched = r.supervisor.start().await.unwrap();
        assert_eq!(r.launcher.launch_count(), 1);
        assert_eq!(r.supervisor.status().unwrap().pid(), Some(launched.pid));
    }

    #[tokio::test]
    async fn test_start_when_running_refuses_without_spawning() {
        let r = rig(&[4242]);
        let err = r.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(ref h) if h.pid == 4242));
        assert!(!err.is_infrastructure());
        assert_eq!(r.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_start_when_ambiguous_refuses_without_spawning() {
        let r = rig(&[4242, 4243]);
        let err = r.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Ambiguous(ref hs) if hs.len() == 2));
        assert_eq!(r.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_start_launch_failure_reported() {
        let r = rig(&[]);
        r.launcher.fail_launches();
        let err = r.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::LaunchFailed(_)));
        assert!(err.is_infrastructure());
        assert!(err.to_string().contains("no such file"));
        assert_eq!(r.supervisor.operation(), None);
    }

    #[tokio::test]
    async fn test_start_table_failure_spawns_nothing() {
        let r = rig(&[]);
        r.table.fail_next_snapshots(1);
        let err = r.supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessTable(_)));
        assert_eq!(r.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_exactly_once() {
        let r = rig(&[]);
        let (a, b) = tokio::join!(r.supervisor.start(), r.supervisor.start());
        assert_eq!(r.launcher.launch_count(), 1);
        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
        let refused = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(refused, SupervisorError::AlreadyRunning(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_parallel_starts_spawn_exactly_once() {
        let r = rig(&[]);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let sup = Arc::clone(&r.supervisor);
            tasks.push(tokio::spawn(async move { sup.start().await }));
        }
        let mut started = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => started += 1,
                Err(e) => assert!(matches!(e, SupervisorError::AlreadyRunning(_))),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(r.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_idempotent() {
        let r = rig(&[]);
        let first = r.supervisor.stop().await.unwrap();
        let second = r.supervisor.stop().await.unwrap();
        assert_eq!(first.outcome, StopOutcome::NothingToStop);
        assert_eq!(second.outcome, StopOutcome::NothingToStop);
        assert!(r.terminator.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stop_graceful_exit_skips_forceful() {
        let r = rig(&[4242]);
        let report = r.supervisor.stop().await.unwrap();
        assert_eq!(report.outcome, StopOutcome::Stopped);
        assert_eq!(report.targeted, vec![4242]);
        assert!(report.survivors.is_empty());

        let sent = r.terminator.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SignalKind::Graceful);
        assert_eq!(r.supervisor.status().unwrap(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_escalates_only_after_grace_window() {
        let r = rig(&[4242]);
        r.terminator.ignore_graceful(4242);

        let report = r.supervisor.stop().await.unwrap();
        assert_eq!(report.outcome, StopOutcome::Stopped);

        let sent = r.terminator.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, SignalKind::Graceful);
        assert_eq!(sent[1].kind, SignalKind::Forceful);
        let waited = sent[1].at.duration_since(sent[0].at);
        assert!(
            waited >= fast_policy().grace,
            "forceful kill after {waited:?}, before the grace window"
        );

        // Liveness was re-checked after the kill before reporting success.
        assert_eq!(report.requests.len(), 2);
        assert!(!r.table.contains(4242));
    }

    #[tokio::test]
    async fn test_stop_reports_partial_stop_for_survivor() {
        let r = rig(&[4242]);
        r.terminator.unkillable(4242);

        let report = r.supervisor.stop().await.unwrap();
        assert_eq!(report.outcome, StopOutcome::PartialStop);
        assert_eq!(report.survivor_pids(), vec![4242]);
    }

    #[tokio::test]
    async fn test_stop_signals_all_ambiguous_matches() {
        let r = rig(&[100, 200, 300]);
        let report = r.supervisor.stop().await.unwrap();
        assert_eq!(report.outcome, StopOutcome::Stopped);
        assert_eq!(report.targeted, vec![100, 200, 300]);
        let mut pids: Vec<u32> = r.terminator.sent().iter().map(|s| s.pid).collect();
        pids.sort();
        assert_eq!(pids, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_stop_per_pid_errors_do_not_abort_others() {
        let r = rig(&[100, 200]);
        // 100 belongs to another user and is signalled first.
        r.terminator.deny(100);

        let report = r.supervisor.stop().await.unwrap();
        assert!(!r.table.contains(200));
        assert_eq!(report.outcome, StopOutcome::PartialStop);
        assert_eq!(report.survivor_pids(), vec![100]);
        assert!(report
            .requests
            .iter()
            .any(|q| q.pid == 100 && q.outcome == TerminationOutcome::PermissionDenied));
    }

    #[tokio::test]
    async fn test_stop_vanished_pid_counts_as_gone() {
        let r = rig(&[100]);
        struct VanishingTerminator;
        impl Terminator for VanishingTerminator {
            fn signal(&self, _pid: u32, _kind: SignalKind) -> TerminationOutcome {
                TerminationOutcome::NoSuchProcess
            }
        }
        let table = Arc::clone(&r.table);
        let sig =
            WorkerSignature::new(r"(^|/)python[0-9.]*$", r"(^|/)youtube_monitor\.py$").unwrap();
        let sup = Supervisor::new(
            ProcessLocator::new(table.clone(), sig),
            Arc::new(VanishingTerminator),
            r.launcher.clone(),
            fast_policy(),
        );
        // Exits right after the first locate.
        let stop = sup.stop();
        let remover = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            table.remove(100);
        };
        let (report, _) = tokio::join!(stop, remover);
        let report = report.unwrap();
        assert_eq!(report.outcome, StopOutcome::Stopped);
        assert_eq!(report.requests[0].outcome, TerminationOutcome::NoSuchProcess);
    }

    #[tokio::test]
    async fn test_restart_stops_then_starts() {
        let r = rig(&[4242]);
        let report = r.supervisor.restart().await.unwrap();
        assert_eq!(report.stop.outcome, StopOutcome::Stopped);
        let launched = report.start.unwrap();
        assert_eq!(r.launcher.launch_count(), 1);
        assert_eq!(r.supervisor.status().unwrap().pid(), Some(launched.pid));
        assert!(!r.table.contains(4242));
    }

    #[tokio::test]
    async fn test_restart_from_stopped_starts() {
        let r = rig(&[]);
        let report = r.supervisor.restart().await.unwrap();
        assert_eq!(report.stop.outcome, StopOutcome::NothingToStop);
        assert!(report.start.is_ok());
    }

    #[tokio::test]
    async fn test_restart_after_partial_stop_does_not_double_spawn() {
        let r = rig(&[4242]);
        r.terminator.unkillable(4242);

        let report = r.supervisor.restart().await.unwrap();
        assert_eq!(report.stop.outcome, StopOutcome::PartialStop);
        assert!(matches!(
            report.start,
            Err(SupervisorError::AlreadyRunning(ref h)) if h.pid == 4242
        ));
        assert_eq!(r.launcher.launch_count(), 0);

        let state = r.supervisor.status().unwrap();
        assert_eq!(state.pid(), Some(4242));
    }

    #[tokio::test]
    async fn test_restart_stop_infrastructure_failure_aborts() {
        let r = rig(&[4242]);
        r.table.fail_next_snapshots(1);
        let err = r.supervisor.restart().await.unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessTable(_)));
        assert_eq!(r.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_after_refusal() {
        let r = rig(&[4242]);
        assert!(r.supervisor.start().await.is_err());
        // Would hang if the guard leaked.
        let stopped = tokio::time::timeout(Duration::from_secs(2), r.supervisor.stop())
            .await
            .expect("guard was not released");
        assert_eq!(stopped.unwrap().outcome, StopOutcome::Stopped);
        assert!(r.supervisor.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_operation_visible_while_in_flight() {
        let r = rig(&[4242]);
        r.terminator.ignore_graceful(4242);
        assert_eq!(r.supervisor.operation(), None);

        let sup = Arc::clone(&r.supervisor);
        let task = tokio::spawn(async move { sup.stop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(r.supervisor.operation(), Some(Operation::Stopping));
        // status() is not blocked by the in-flight stop.
        assert!(r.supervisor.status().unwrap().is_running());

        task.await.unwrap().unwrap();
        assert_eq!(r.supervisor.operation(), None);
    }

    #[tokio::test]
    async fn test_stop_rechecks_table_after_kill() {
        let r = rig(&[4242]);
        r.terminator.ignore_graceful(4242);
        let before = r.table.snapshot_count();
        r.supervisor.stop().await.unwrap();
        let sent = r.terminator.sent();
        assert_eq!(sent.last().unwrap().kind, SignalKind::Forceful);
        // initial locate, at least one grace re-check, final re-check
        assert!(r.table.snapshot_count() - before >= 3);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = SupervisorPolicy::from(&SupervisorConfig {
            grace_ms: 2000,
            kill_wait_ms: 250,
            settle_ms: 1000,
        });
        assert_eq!(policy.grace, Duration::from_secs(2));
        assert_eq!(policy.kill_wait, Duration::from_millis(250));
        assert_eq!(policy.settle, Duration::from_secs(1));
    }
}

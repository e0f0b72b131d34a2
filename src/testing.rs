//! In-memory stand-ins for the OS process table, signal delivery and spawning.
//!
//! The fakes share one [`FakeTable`], so a fake spawn shows up in the next
//! snapshot and a fake kill removes the row, the same way the real OS behaves.
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;

use crate::launcher::{LaunchError, LaunchedWorker, Launcher};
use crate::locator::{ProcessEntry, ProcessTable, TableError};
use crate::signals::{SignalKind, TerminationOutcome, Terminator};

pub fn entry(pid: u32, exe: &str, argv: &[&str]) -> ProcessEntry {
    ProcessEntry {
        pid,
        exe: Some(exe.to_string()),
        argv: argv.iter().map(|s| s.to_string()).collect(),
        start_time: None,
    }
}

pub fn worker_entry(pid: u32) -> ProcessEntry {
    entry(pid, "/usr/bin/python3", &["venv/bin/python", "youtube_monitor.py"])
}

/// Single-letter state of `pid` from `/proc/<pid>/stat`, `None` once the
/// entry is gone.
#[cfg(target_os = "linux")]
pub fn proc_state(pid: u32) -> Option<char> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name is parenthesised and may itself contain spaces or ')'.
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

pub struct FakeTable {
    rows: Mutex<Vec<ProcessEntry>>,
    failures: AtomicUsize,
    snapshots: AtomicUsize,
}

impl FakeTable {
    pub fn new(rows: Vec<ProcessEntry>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failures: AtomicUsize::new(0),
            snapshots: AtomicUsize::new(0),
        }
    }

    pub fn with_workers(pids: &[u32]) -> Self {
        Self::new(pids.iter().map(|&p| worker_entry(p)).collect())
    }

    pub fn insert(&self, row: ProcessEntry) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn remove(&self, pid: u32) -> bool {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.pid != pid);
        rows.len() != before
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.rows.lock().unwrap().iter().any(|r| r.pid == pid)
    }

    pub fn fail_next_snapshots(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }
}

impl ProcessTable for FakeTable {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, TableError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(TableError::Incomplete { seen: 0 });
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

/// A signal as the fake terminator saw it.
#[derive(Debug, Clone)]
pub struct SentSignal {
    pub pid: u32,
    pub kind: SignalKind,
    pub at: Instant,
}

/// Removes rows from the shared table when a signal would kill them.
pub struct FakeTerminator {
    table: Arc<FakeTable>,
    ignores_graceful: Mutex<HashSet<u32>>,
    unkillable: Mutex<HashSet<u32>>,
    denied: Mutex<HashSet<u32>>,
    sent: Mutex<Vec<SentSignal>>,
}

impl FakeTerminator {
    pub fn new(table: Arc<FakeTable>) -> Self {
        Self {
            table,
            ignores_graceful: Mutex::new(HashSet::new()),
            unkillable: Mutex::new(HashSet::new()),
            denied: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// The process traps SIGTERM and keeps running.
    pub fn ignore_graceful(&self, pid: u32) {
        self.ignores_graceful.lock().unwrap().insert(pid);
    }

    /// The process survives even SIGKILL (e.g. stuck in uninterruptible I/O).
    pub fn unkillable(&self, pid: u32) {
        self.ignore_graceful(pid);
        self.unkillable.lock().unwrap().insert(pid);
    }

    /// The process belongs to another user.
    pub fn deny(&self, pid: u32) {
        self.denied.lock().unwrap().insert(pid);
    }

    pub fn sent(&self) -> Vec<SentSignal> {
        self.sent.lock().unwrap().clone()
    }
}

impl Terminator for FakeTerminator {
    fn signal(&self, pid: u32, kind: SignalKind) -> TerminationOutcome {
        self.sent.lock().unwrap().push(SentSignal {
            pid,
            kind,
            at: Instant::now(),
        });
        if !self.table.contains(pid) {
            return TerminationOutcome::NoSuchProcess;
        }
        if self.denied.lock().unwrap().contains(&pid) {
            return TerminationOutcome::PermissionDenied;
        }
        let survives = match kind {
            SignalKind::Graceful => self.ignores_graceful.lock().unwrap().contains(&pid),
            SignalKind::Forceful => self.unkillable.lock().unwrap().contains(&pid),
        };
        if !survives {
            self.table.remove(pid);
        }
        TerminationOutcome::Delivered
    }
}

/// Adds a worker row to the shared table on every successful launch.
pub struct FakeLauncher {
    table: Arc<FakeTable>,
    next_pid: AtomicU32,
    launches: AtomicUsize,
    fail: Mutex<bool>,
}

impl FakeLauncher {
    pub fn new(table: Arc<FakeTable>) -> Self {
        Self {
            table,
            next_pid: AtomicU32::new(5000),
            launches: AtomicUsize::new(0),
            fail: Mutex::new(false),
        }
    }

    pub fn fail_launches(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self) -> Result<LaunchedWorker, LaunchError> {
        if *self.fail.lock().unwrap() {
            return Err(LaunchError::Spawn {
                program: PathBuf::from("venv/bin/python"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.table.insert(worker_entry(pid));
        Ok(LaunchedWorker {
            pid,
            log_file: PathBuf::from("youtube_monitor.log"),
            spawned_at: Utc::now(),
        })
    }
}

/// Process discovery: snapshot the OS process table and pick out the worker.
///
/// The table is abstracted behind [`ProcessTable`] so the matching rule can be
/// exercised without a real OS table. Nothing here caches process identity;
/// every call takes a fresh snapshot.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::signature::WorkerSignature;

/// One raw row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Resolved executable path, when readable.
    pub exe: Option<String>,
    pub argv: Vec<String>,
    /// When the OS started the process, when known.
    pub start_time: Option<DateTime<Utc>>,
}

/// A process that matched the worker signature at `discovered_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    pub pid: u32,
    pub command_line: String,
    pub discovered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Enumerates live processes.
pub trait ProcessTable: Send + Sync {
    /// Every live process. Threads and zombies are not processes for this purpose.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, TableError>;
}

/// Process table backed by `sysinfo`.
pub struct SysinfoTable;

impl ProcessTable for SysinfoTable {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, TableError> {
        use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(TableError::Unsupported);
        }

        let refresh = ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_exe(UpdateKind::Always);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none())
            .filter(|(_, p)| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .map(|(pid, p)| ProcessEntry {
                pid: pid.as_u32(),
                exe: p.exe().map(|e| e.to_string_lossy().into_owned()),
                argv: p
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect(),
                start_time: Some(p.start_time())
                    .filter(|&secs| secs > 0)
                    .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
            })
            .collect();

        // An unreadable /proc yields an empty table rather than an error. We are
        // running, so a table without us in it is a failed enumeration.
        let me = std::process::id();
        if !entries.iter().any(|e| e.pid == me) {
            return Err(TableError::Incomplete {
                seen: entries.len(),
            });
        }
        Ok(entries)
    }
}

/// Applies a [`WorkerSignature`] to process-table snapshots.
#[derive(Clone)]
pub struct ProcessLocator {
    table: Arc<dyn ProcessTable>,
    signature: WorkerSignature,
    own_pid: u32,
}

impl ProcessLocator {
    pub fn new(table: Arc<dyn ProcessTable>, signature: WorkerSignature) -> Self {
        Self {
            table,
            signature,
            own_pid: std::process::id(),
        }
    }

    /// All processes currently matching the signature, sorted by
    /// `(discovered_at, pid)`. Zero matches is a valid, empty result.
    pub fn locate(&self) -> Result<Vec<ProcessHandle>, TableError> {
        let entries = self.table.snapshot()?;
        let now = Utc::now();
        let mut handles: Vec<ProcessHandle> = entries
            .into_iter()
            .filter(|e| e.pid != self.own_pid && e.pid > 0)
            .filter(|e| self.signature.matches(e.exe.as_deref(), &e.argv))
            .map(|e| ProcessHandle {
                pid: e.pid,
                command_line: e.argv.join(" "),
                discovered_at: now,
                started_at: e.start_time,
            })
            .collect();
        handles.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then(a.pid.cmp(&b.pid))
        });
        tracing::debug!(matches = handles.len(), "located worker processes");
        Ok(handles)
    }
}

/// The process table could not be enumerated. Distinct from "not running".
#[derive(Debug)]
pub enum TableError {
    Unsupported,
    Incomplete { seen: usize },
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Unsupported => {
                write!(f, "process enumeration is not supported on this platform")
            }
            TableError::Incomplete { seen } => write!(
                f,
                "process table enumeration incomplete ({seen} entries, console itself missing)"
            ),
        }
    }
}

impl std::error::Error for TableError {}

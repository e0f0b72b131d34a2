/// Worker launch: spawn the worker detached, stdout+stderr appended to its log.
///
/// The spawn outcome (PID or error) is reported synchronously. The child is
/// handed to a background reaper so it never lingers as a zombie; liveness is
/// still decided by re-reading the process table, never from this handle.
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::deployment::Deployment;

/// A successfully spawned worker.
#[derive(Debug, Clone)]
pub struct LaunchedWorker {
    pub pid: u32,
    pub log_file: PathBuf,
    pub spawned_at: DateTime<Utc>,
}

/// Spawns the worker.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<LaunchedWorker, LaunchError>;
}

/// Launches the configured worker command in the deployment root.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: PathBuf,
    log_file: PathBuf,
}

impl WorkerLauncher {
    pub fn new(worker: &WorkerConfig, deployment: &Deployment) -> Self {
        Self {
            program: deployment.program(&worker.program),
            args: worker.args.clone(),
            env: worker.env.clone(),
            working_dir: deployment.root().to_path_buf(),
            log_file: deployment.log_file().to_path_buf(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Open the log for appending. Never truncates: the history is the audit trail.
    fn open_log(&self) -> Result<std::fs::File, LaunchError> {
        let log_err = |e| LaunchError::LogFile {
            path: self.log_file.clone(),
            source: e,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .map_err(log_err)?;
        writeln!(
            file,
            "--- shepherd: starting {} at {} ---",
            self.program.display(),
            Utc::now().to_rfc3339()
        )
        .map_err(log_err)?;
        Ok(file)
    }
}

impl Launcher for WorkerLauncher {
    fn launch(&self) -> Result<LaunchedWorker, LaunchError> {
        let dir_err = |e| LaunchError::WorkingDir {
            path: self.working_dir.clone(),
            source: e,
        };
        let meta = std::fs::metadata(&self.working_dir).map_err(dir_err)?;
        if !meta.is_dir() {
            return Err(dir_err(std::io::Error::other("not a directory")));
        }

        let stdout = self.open_log()?;
        // A second handle for stderr since File doesn't impl Clone
        let stderr = stdout.try_clone().map_err(|e| LaunchError::LogFile {
            path: self.log_file.clone(),
            source: e,
        })?;

        tracing::info!(
            program = %self.program.display(),
            args = ?self.args,
            cwd = %self.working_dir.display(),
            log = %self.log_file.display(),
            "spawning worker"
        );

        let spawn_err = |e| LaunchError::Spawn {
            program: self.program.clone(),
            source: e,
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0) // Own group: survives console signals, killable as a unit
            .spawn()
            .map_err(spawn_err)?;

        let pid = child
            .id()
            .ok_or_else(|| spawn_err(std::io::Error::other("worker exited before reporting a pid")))?;
        tracing::info!(pid, "worker started");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(pid, status = %status, "worker exited"),
                Err(e) => tracing::warn!(pid, error = %e, "failed to reap worker"),
            }
        });

        Ok(LaunchedWorker {
            pid,
            log_file: self.log_file.clone(),
            spawned_at: Utc::now(),
        })
    }
}

/// Errors that can occur while launching the worker.
#[derive(Debug)]
pub enum LaunchError {
    /// The deployment root is missing or not a directory.
    WorkingDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to open or append to the worker log.
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the worker process.
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::WorkingDir { path, source } => {
                write!(f, "bad working directory {}: {source}", path.display())
            }
            LaunchError::LogFile { path, source } => {
                write!(f, "failed to open log file {}: {source}", path.display())
            }
            LaunchError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {source}", program.display())
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::WorkingDir { source, .. } => Some(source),
            LaunchError::LogFile { source, .. } => Some(source),
            LaunchError::Spawn { source, .. } => Some(source),
        }
    }
}

use std::path::{Path, PathBuf};

use crate::config::WorkerConfig;

/// Resolves the worker's well-known files against the deployment root.
///
/// The worker runs with the root as its working directory, so every relative
/// path in the console config is interpreted from there, never from the
/// directory the console happened to be launched in.
#[derive(Debug, Clone)]
pub struct Deployment {
    root: PathBuf,
    log_file: PathBuf,
    config_file: PathBuf,
    history_file: PathBuf,
}

impl Deployment {
    /// Build from the `[worker]` section.
    pub fn from_config(worker: &WorkerConfig) -> Self {
        let root = worker.root.clone();
        Self {
            log_file: resolve(&root, &worker.log_file),
            config_file: resolve(&root, &worker.config_file),
            history_file: resolve(&root, &worker.history_file),
            root,
        }
    }

    /// The deployment root (worker working directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The worker's append-only log.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// The channels document the worker reads at startup.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// The worker's processed-items history.
    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// The console singleton lock.
    pub fn lock(&self) -> PathBuf {
        self.root.join(".shepherd.lock")
    }

    /// Resolve the program to execute. Bare names (`python3`) are left for
    /// PATH lookup; anything with a separator is taken relative to the root.
    pub fn program(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.components().count() > 1 {
            resolve(&self.root, path)
        } else {
            path.to_path_buf()
        }
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

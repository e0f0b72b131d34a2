/// Console singleton lock: one console supervises a deployment at a time.
///
/// The supervisor's guard only serializes operations inside one process; a
/// second console would have its own guard and could race the first. This is
/// an advisory `flock` on a file in the deployment root, released on drop.
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ConsoleLock {
    file: File,
    path: PathBuf,
}

impl ConsoleLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| LockError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;
        file.try_lock_exclusive().map_err(|e| LockError::Held {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "console lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConsoleLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug)]
pub enum LockError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Held {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Held { path, .. } => write!(
                f,
                "another console already supervises this deployment (lock {})",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Open { source, .. } => Some(source),
            LockError::Held { source, .. } => Some(source),
        }
    }
}

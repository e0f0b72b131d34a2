use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::signature::WorkerSignature;

/// Top-level configuration loaded from shepherd.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ConsoleConfig {
    pub worker: WorkerConfig,
    pub supervisor: SupervisorConfig,
    pub serve: ServeConfig,
    pub geo: GeoConfig,
}

/// How to launch, identify and find the files of the supervised worker.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deployment root. The worker runs here and relative paths resolve against it.
    pub root: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub log_file: PathBuf,
    pub config_file: PathBuf,
    pub history_file: PathBuf,
    pub signature: SignatureConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub executable: String,
    pub argument: String,
}

/// Escalation and settling windows, in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub grace_ms: u64,
    pub kill_wait_ms: u64,
    pub settle_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

// --- Default implementations ---

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            program: "venv/bin/python".to_string(),
            args: vec!["youtube_monitor.py".to_string()],
            env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
            log_file: PathBuf::from("youtube_monitor.log"),
            config_file: PathBuf::from("channels_config.json"),
            history_file: PathBuf::from("youtube_history.json"),
            signature: SignatureConfig::default(),
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            executable: r"(^|/)python[0-9.]*$".to_string(),
            argument: r"(^|/)youtube_monitor\.py$".to_string(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1500,
            kill_wait_ms: 500,
            settle_ms: 1500,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://ip-api.com/json".to_string(),
            timeout_secs: 5,
        }
    }
}

impl ConsoleConfig {
    /// Load config from the given path. A missing file yields the defaults;
    /// a file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no console config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ConsoleConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse {
                path: PathBuf::new(),
                source: e,
            })?;
        // Surface a bad pattern at load time rather than on the first status poll.
        config.worker_signature()?;
        Ok(config)
    }

    /// Compile the worker's signature patterns.
    pub fn worker_signature(&self) -> Result<WorkerSignature, ConfigError> {
        let sig = &self.worker.signature;
        WorkerSignature::new(&sig.executable, &sig.argument)
            .map_err(|e| ConfigError::Signature { source: e })
    }
}

/// Errors from loading the console configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Signature {
        source: regex::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
            ConfigError::Signature { source } => {
                write!(f, "invalid worker signature pattern: {source}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Signature { source } => Some(source),
        }
    }
}

/// The worker's channel configuration (`channels_config.json`).
///
/// The console never interprets these settings itself; the worker reads the
/// file at startup, so edits apply on the next start. `load` never fails and
/// `save` replaces the whole document atomically.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub settings: Settings,
    /// Keys the worker knows about and the console doesn't; kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default, alias = "youtube_url")]
    pub source_url: String,
    #[serde(default, alias = "tiktok_user")]
    pub destination_user: String,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Worker timing settings. Durations are in seconds, `check_interval` in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub check_interval: u64,
    pub min_duration: u64,
    pub max_duration: u64,
    pub target_duration: u64,
}

fn default_true() -> bool {
    true
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            settings: Settings::default(),
            extra: Map::new(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 8080,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: 2,
            min_duration: 45,
            max_duration: 180,
            target_duration: 60,
        }
    }
}

impl Configuration {
    /// Structural problems that would make the worker misbehave.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let s = &self.settings;
        if s.check_interval == 0 {
            problems.push("settings.check_interval must be at least 1".to_string());
        }
        if s.min_duration > s.max_duration {
            problems.push(format!(
                "settings.min_duration ({}) exceeds max_duration ({})",
                s.min_duration, s.max_duration
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for ch in &self.channels {
            if ch.id.trim().is_empty() {
                problems.push("channel with empty id".to_string());
            } else if !seen.insert(ch.id.as_str()) {
                problems.push(format!("duplicate channel id '{}'", ch.id));
            }
            if ch.proxy.enabled && (ch.proxy.host.trim().is_empty() || ch.proxy.port == 0) {
                problems.push(format!(
                    "channel '{}' enables a proxy without host and port",
                    ch.id
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// Parses the operator shorthand `host:port:user:pass`.
///
/// Missing trailing parts are empty; a missing or unparsable port falls back
/// to 8080. The result is disabled; enabling is a separate decision.
impl FromStr for ProxyConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(4, ':');
        let host = parts.next().unwrap_or_default().trim().to_string();
        if host.is_empty() {
            return Err("proxy host is empty".to_string());
        }
        let port = parts
            .next()
            .and_then(|p| p.trim().parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(8080);
        Ok(Self {
            enabled: false,
            host,
            port,
            username: parts.next().unwrap_or_default().to_string(),
            password: parts.next().unwrap_or_default().to_string(),
        })
    }
}

/// Reads and writes the configuration document on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored document, or the built-in default if missing or corrupt.
    pub fn load(&self) -> Configuration {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to read worker config");
                }
                return Configuration::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "worker config is corrupt, using defaults");
                Configuration::default()
            }
        }
    }

    /// Replace the document. Written to a temp file in the same directory and
    /// renamed, so the worker never reads a half-written file.
    pub fn save(&self, config: &Configuration) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| StoreError::Serialize { source: e })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::Write {
            path: dir.to_path_buf(),
            source: e,
        })?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::Write {
                path: tmp.path().to_path_buf(),
                source: e,
            })?;
        tmp.persist(&self.path).map_err(|e| StoreError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;

        tracing::info!(
            path = %self.path.display(),
            channels = config.channels.len(),
            "worker config saved"
        );
        Ok(())
    }
}

/// Errors from saving the worker configuration.
#[derive(Debug)]
pub enum StoreError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Serialize { source } => write!(f, "failed to serialize config: {source}"),
            StoreError::Write { path, source } => {
                write!(f, "failed to write temp config in {}: {source}", path.display())
            }
            StoreError::Persist { path, source } => {
                write!(f, "failed to replace {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Serialize { source } => Some(source),
            StoreError::Write { source, .. } => Some(source),
            StoreError::Persist { source, .. } => Some(source),
        }
    }
}

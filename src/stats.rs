/// Processing statistics read from the worker's history file.
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct History {
    #[serde(default)]
    processed_videos: Vec<serde_json::Value>,
}

/// The history lists the ids of items that completed, nothing else. Rates
/// and timings are derived from that alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_processed: usize,
    /// Id of the most recently recorded item.
    pub last_processed: Option<String>,
    /// Percent. Only completed items are recorded, so 100 once there are any.
    pub success_rate: f64,
    /// Seconds per item. Always 0: the history records no durations.
    pub average_time: f64,
    /// Always 0: the history records no timestamps.
    pub today_uploads: usize,
}

impl HistoryStats {
    /// Missing or unreadable history means nothing has been processed yet.
    pub fn load(path: &Path) -> Self {
        let history: History = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "history file is corrupt");
                History::default()
            }),
            Err(_) => History::default(),
        };
        let last_processed = history.processed_videos.last().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let total_processed = history.processed_videos.len();
        Self {
            total_processed,
            last_processed,
            success_rate: if total_processed > 0 { 100.0 } else { 0.0 },
            average_time: 0.0,
            today_uploads: 0,
        }
    }

    pub fn render(&self) -> String {
        let mut out = match &self.last_processed {
            Some(last) => format!("processed: {} (last: {last})", self.total_processed),
            None => format!("processed: {}", self.total_processed),
        };
        out.push_str(&format!("\nsuccess rate: {:.1}%", self.success_rate));
        out
    }
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Daemon configuration, loaded from TOML.
///
/// Every field has a default so a missing file (or any subset of keys) is
/// valid. The defaults encode the MediaHub organizer script's contract:
/// its completion/error markers, the post-spawn warm-up, and the 30 second
/// inactivity window for interactive selections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Program run for each scan session (the media-organizing script).
    pub worker_program: String,
    /// Arguments placed before the source path.
    pub worker_args: Vec<String>,
    /// Program used to resolve symlinks to their target.
    pub resolver_program: String,
    /// Substrings (matched case-insensitively) that mark a selection as
    /// successfully completed.
    pub completion_markers: Vec<String>,
    /// Substrings that mark a selection as failed.
    pub error_markers: Vec<String>,
    /// Delay after spawning the worker before input is accepted.
    pub warmup_ms: u64,
    /// Inactivity window for a pending selection; reset on every output line.
    pub idle_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker_program: "python3".to_string(),
            worker_args: vec!["MediaHub/main.py".to_string()],
            resolver_program: "readlink".to_string(),
            completion_markers: vec![
                "created symlink".to_string(),
                "processed file".to_string(),
                "updated existing symlink".to_string(),
            ],
            error_markers: vec!["ERROR".to_string()],
            warmup_ms: 1000,
            idle_timeout_ms: 30_000,
        }
    }
}

impl DaemonConfig {
    /// Load config from a TOML file path. Returns None if the file doesn't
    /// exist, so callers can fall back to defaults.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// True if `line` contains any completion marker, ignoring case.
    pub fn is_completion_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.completion_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
    }

    /// True if `line` contains any error marker. Markers are matched
    /// case-sensitively — the organizer logs `ERROR` in upper case, and
    /// matching loosely would trip on words like "error-free".
    pub fn is_error_line(&self, line: &str) -> bool {
        self.error_markers.iter().any(|m| line.contains(m.as_str()))
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    ParseFailed(PathBuf, #[source] toml::de::Error),
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to write settings file {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
}

/// One `key=value` pair as sent by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingPair {
    pub key: String,
    pub value: String,
}

/// Store over a line-oriented `KEY=VALUE` file (`.env` style).
///
/// Writers are intentionally NOT coordinated: two concurrent updates race
/// read-modify-write and the last writer wins. Acceptable for a
/// single-operator tool; do not add locking here without revisiting the
/// deployment assumptions.
#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the file into a map. Comment (`#`-prefixed) and blank lines are
    /// skipped; the first `=` splits key from value; both sides are trimmed.
    /// Lines with no `=` or an empty key/value are ignored.
    pub fn read(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SettingsError::Read(self.path.clone(), e))?;

        let mut settings = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let (key, value) = (key.trim(), value.trim());
                if !key.is_empty() && !value.is_empty() {
                    settings.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(settings)
    }

    /// For each pair, replace the first `KEY=...` line or append a new one,
    /// then write the whole file back with a single trailing newline.
    ///
    /// A missing file is treated as empty, so updates can create it.
    pub fn update(&self, pairs: &[SettingPair]) -> Result<(), SettingsError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(SettingsError::Read(self.path.clone(), e)),
        };

        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        for pair in pairs {
            let prefix = format!("{}=", pair.key);
            let new_line = format!("{}={}", pair.key, pair.value);
            match lines.iter().position(|l| l.starts_with(&prefix)) {
                Some(idx) => lines[idx] = new_line,
                None => lines.push(new_line),
            }
        }

        let output = format!("{}\n", lines.join("\n").trim());
        std::fs::write(&self.path, output)
            .map_err(|e| SettingsError::Write(self.path.clone(), e))
    }
}

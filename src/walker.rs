use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("failed to read directory {0}: {1}")]
    ReadDir(PathBuf, #[source] std::io::Error),

    #[error("failed to stat {0}: {1}")]
    Stat(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One filesystem entry in the shape the dashboard consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    #[serde(rename = "modifiedAt")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Enumerate `path` into a flat list.
///
/// Non-recursive: immediate children only. Recursive: every descendant,
/// directories included. Symlinked directories are listed but never
/// descended into, so no subtree is visited twice. Any I/O error fails the
/// whole call — there are no partial results.
pub fn walk(path: &Path, recursive: bool) -> Result<Vec<FileInfo>, WalkError> {
    let mut out = Vec::new();
    walk_into(path, recursive, &mut out)?;
    Ok(out)
}

fn walk_into(dir: &Path, recursive: bool, out: &mut Vec<FileInfo>) -> Result<(), WalkError> {
    let entries = fs::read_dir(dir).map_err(|e| WalkError::ReadDir(dir.to_path_buf(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| WalkError::ReadDir(dir.to_path_buf(), e))?;
        let full_path = entry.path();
        // symlink_metadata so a symlink to a directory is reported as a file
        // entry and never followed.
        let meta = fs::symlink_metadata(&full_path)
            .map_err(|e| WalkError::Stat(full_path.clone(), e))?;

        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);

        out.push(FileInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: full_path.clone(),
            kind,
            size: meta.len(),
            modified_at,
        });

        if recursive && kind == EntryKind::Directory {
            walk_into(&full_path, recursive, out)?;
        }
    }
    Ok(())
}

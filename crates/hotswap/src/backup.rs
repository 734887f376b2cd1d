// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Backup discovery
//!
//! Backups are written by the caller before a swap as
//! `<artifact-name>.backup.<token>`, where the token is normally a unix
//! timestamp. This module only reads them; nothing here creates or prunes
//! entries.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const BACKUP_MARKER: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Suffix after `.backup.`, `None` for loose matches
    pub token: Option<String>,
    pub modified: Option<SystemTime>,
}

impl BackupEntry {
    /// Creation time encoded in a numeric token
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.token.as_deref()?.parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn describe(&self) -> String {
        match self.created_at() {
            Some(at) => format!(
                "{} ({} bytes, taken {})",
                self.path.display(),
                self.size,
                at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
            None => format!("{} ({} bytes)", self.path.display(), self.size),
        }
    }
}

fn strict_prefix(artifact_name: &str) -> String {
    format!("{artifact_name}.{BACKUP_MARKER}.")
}

/// Numeric tokens newest first, then other tokens in descending order
fn compare_tokens(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => b.cmp(a),
    }
}

fn list_files(dir: &Path) -> Vec<(String, PathBuf, fs::Metadata)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let name = entry.file_name().to_str()?.to_owned();
            Some((name, entry.path(), meta))
        })
        .collect()
}

/// Restore candidates for `artifact_name`, most preferred first.
///
/// Strict `<name>.backup.<token>` entries win. Only when there are none does
/// any file containing "backup" qualify, ordered by modification time.
/// A missing or unreadable directory yields no candidates.
pub fn find_candidates(backup_dir: &Path, artifact_name: &str) -> Vec<BackupEntry> {
    let files = list_files(backup_dir);
    let prefix = strict_prefix(artifact_name);

    let mut strict: Vec<BackupEntry> = files
        .iter()
        .filter_map(|(name, path, meta)| {
            let token = name.strip_prefix(&prefix)?;
            if token.is_empty() {
                return None;
            }
            Some(BackupEntry {
                path: path.clone(),
                size: meta.len(),
                token: Some(token.to_owned()),
                modified: meta.modified().ok(),
            })
        })
        .collect();

    if !strict.is_empty() {
        strict.sort_by(|a, b| {
            compare_tokens(
                a.token.as_deref().unwrap_or_default(),
                b.token.as_deref().unwrap_or_default(),
            )
        });
        return strict;
    }

    let mut loose: Vec<BackupEntry> = files
        .into_iter()
        .filter(|(name, _, _)| name.contains(BACKUP_MARKER))
        .map(|(_, path, meta)| BackupEntry {
            path,
            size: meta.len(),
            token: None,
            modified: meta.modified().ok(),
        })
        .collect();
    loose.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    loose
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Durable phase marker
//!
//! Records which phase a run is in so that a run started after a crash can
//! tell whether the target may have been left half-written. The marker sits
//! next to the target and is removed once a run reaches a terminal outcome.

use crate::error::{Result, SwapError};
use crate::state::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub target: PathBuf,
    /// Size of the new artifact, known once replacement has started
    pub source_size: Option<u64>,
    /// Size of the target before the first copy attempt
    #[serde(default)]
    pub target_size: Option<u64>,
}

impl JournalEntry {
    pub fn new(target: &Path) -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::Init,
            started_at: now,
            updated_at: now,
            target: target.to_path_buf(),
            source_size: None,
            target_size: None,
        }
    }

    /// The run stopped while the target could hold neither a verified new
    /// artifact nor the original.
    ///
    /// Replacement goes through a staged rename, so a target whose size
    /// matches either the pre-swap target or the new artifact is intact. A
    /// run interrupted during rollback left a target that already failed.
    pub fn left_target_suspect(&self) -> bool {
        if !self.phase.touches_target() {
            return false;
        }
        if self.phase == Phase::Rollback {
            return true;
        }
        let Some(expected) = self.source_size else {
            return false;
        };
        match std::fs::metadata(&self.target) {
            Ok(meta) => meta.len() != expected && Some(meta.len()) != self.target_size,
            Err(_) => self.target_size.is_some(),
        }
    }
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    entry: JournalEntry,
}

/// `<dir>/<artifact>.swap-journal.json`
pub fn journal_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".swap-journal.json");
    target.with_file_name(name)
}

/// Marker left by an interrupted run, if any
pub fn load(path: &Path) -> Result<Option<JournalEntry>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SwapError::Journal(format!("Failed to parse {}: {e}", path.display())))
}

fn save(path: &Path, entry: &JournalEntry) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    let content = serde_json::to_string_pretty(entry)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

impl Journal {
    pub fn begin(target: &Path) -> Result<Self> {
        let journal = Self {
            path: journal_path(target),
            entry: JournalEntry::new(target),
        };
        save(&journal.path, &journal.entry)?;
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, phase: Phase) -> Result<()> {
        self.entry.phase = phase;
        self.entry.updated_at = Utc::now();
        save(&self.path, &self.entry)
    }

    /// Mark the start of replacement together with both sizes needed to
    /// judge the target after a crash
    pub fn record_replace(&mut self, source_size: u64, target_size: Option<u64>) -> Result<()> {
        self.entry.source_size = Some(source_size);
        self.entry.target_size = target_size;
        self.record(Phase::ReplaceFile)
    }

    pub fn finish(self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_journal_path_sits_next_to_target() {
        assert_eq!(
            journal_path(Path::new("/opt/agent/agent.exe")),
            PathBuf::from("/opt/agent/agent.exe.swap-journal.json")
        );
    }

    #[test]
    fn test_begin_record_finish() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");

        let mut journal = Journal::begin(&target).unwrap();
        let path = journal.path().to_path_buf();
        assert_eq!(load(&path).unwrap().unwrap().phase, Phase::Init);

        journal.record_replace(1000, Some(900)).unwrap();
        journal.record(Phase::StartProcess).unwrap();
        let entry = load(&path).unwrap().unwrap();
        assert_eq!(entry.phase, Phase::StartProcess);
        assert_eq!(entry.source_size, Some(1000));
        assert_eq!(entry.target_size, Some(900));
        assert!(!path.with_extension("json.tmp").exists());

        journal.finish().unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_journal_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.bin.swap-journal.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(matches!(load(&path), Err(SwapError::Journal(_))));
    }

    #[test]
    fn test_suspect_target_detection() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");
        std::fs::write(&target, vec![0_u8; 400]).unwrap();

        let mut entry = JournalEntry::new(&target);
        entry.phase = Phase::ReplaceFile;
        entry.source_size = Some(1000);
        entry.target_size = Some(900);
        assert!(entry.left_target_suspect());

        // Complete new artifact
        entry.source_size = Some(400);
        assert!(!entry.left_target_suspect());

        entry.phase = Phase::Rollback;
        assert!(entry.left_target_suspect());

        entry.phase = Phase::StartProcess;
        assert!(!entry.left_target_suspect());
    }

    #[test]
    fn test_untouched_target_is_not_suspect() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");
        std::fs::write(&target, vec![0_u8; 900]).unwrap();

        let mut entry = JournalEntry::new(&target);
        entry.phase = Phase::ReplaceFile;
        assert!(!entry.left_target_suspect());

        entry.source_size = Some(1000);
        entry.target_size = Some(900);
        assert!(!entry.left_target_suspect());
    }

    #[test]
    fn test_vanished_target_is_suspect_only_if_it_existed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");

        let mut entry = JournalEntry::new(&target);
        entry.phase = Phase::ReplaceFile;
        entry.source_size = Some(1000);
        assert!(!entry.left_target_suspect());

        entry.target_size = Some(900);
        assert!(entry.left_target_suspect());
    }

    #[test]
    fn test_entry_without_target_size_still_loads() {
        let json = r#"{"phase":"replace_file","started_at":"2026-01-01T00:00:00Z",
            "updated_at":"2026-01-01T00:00:01Z","target":"/opt/app/old.bin","source_size":1000}"#;
        let entry: JournalEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.source_size, Some(1000));
        assert!(entry.target_size.is_none());
    }
}

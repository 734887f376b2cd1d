// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Rollback module for restoring the previous artifact

use crate::backup::{BackupEntry, find_candidates};
use crate::config::SwapPolicy;
use crate::error::{Result, SwapError};
use crate::launcher;
use crate::platform::{Platform, image_name};
use crate::runlog::RunLog;
use crate::terminator;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub backup: BackupEntry,
    /// Whether the restored artifact was started again
    pub relaunched: bool,
}

fn restore_one(
    candidate: &BackupEntry,
    target: &Path,
    platform: &dyn Platform,
) -> Result<()> {
    platform
        .copy_artifact(&candidate.path, target)
        .map_err(|e| SwapError::RollbackRestore {
            path: candidate.path.clone(),
            reason: e.to_string(),
        })?;

    let actual = std::fs::metadata(target).map_or(0, |meta| meta.len());
    if actual != candidate.size {
        return Err(SwapError::RollbackRestore {
            path: candidate.path.clone(),
            reason: format!("restored {actual} bytes, backup has {}", candidate.size),
        });
    }
    Ok(())
}

/// Restore the best backup over `target` and relaunch it.
///
/// Candidates are tried in preference order until one restores with the
/// expected size. Success is judged on restoration alone; a failed relaunch
/// is logged and reported through [`Restored::relaunched`].
pub async fn roll_back(
    target: &Path,
    backup_dir: &Path,
    policy: &SwapPolicy,
    platform: &dyn Platform,
    log: &dyn RunLog,
) -> Result<Restored> {
    log.warning(&format!("Starting rollback of {}", target.display()));

    let image = image_name(target);
    let candidates = find_candidates(backup_dir, &image);
    if candidates.is_empty() {
        let err = SwapError::RollbackRestore {
            path: backup_dir.to_path_buf(),
            reason: "no backup found".to_owned(),
        };
        log.error(&err.to_string());
        return Err(err);
    }
    log.info(&format!(
        "Found {} backup candidate(s) in {}",
        candidates.len(),
        backup_dir.display()
    ));

    // Whatever was launched from the broken artifact must not hold the file
    if let Err(e) = terminator::ensure_terminated(&image, policy, platform, log).await {
        log.warning(&format!("Rollback continuing despite: {e}"));
    }

    let mut last_error = None;
    let mut restored = None;
    for candidate in candidates {
        log.info(&format!("Restoring {}", candidate.describe()));
        match restore_one(&candidate, target, platform) {
            Ok(()) => {
                restored = Some(candidate);
                break;
            }
            Err(e) => {
                log.warning(&e.to_string());
                last_error = Some(e);
            }
        }
    }

    let Some(backup) = restored else {
        let err = last_error.unwrap_or_else(|| SwapError::RollbackRestore {
            path: backup_dir.to_path_buf(),
            reason: "no candidate could be restored".to_owned(),
        });
        log.error(&format!("All backup candidates failed: {err}"));
        return Err(err);
    };
    log.info(&format!("Restored {}", backup.path.display()));

    let relaunched = match launcher::start(target, platform, log) {
        Ok(_) => {
            if let Err(e) = launcher::verify_running(target, policy, platform, log).await {
                log.warning(&format!("Restored artifact did not come up: {e}"));
            }
            true
        }
        Err(e) => {
            log.error(&format!("Relaunch after rollback failed: {e}"));
            false
        }
    };

    Ok(Restored { backup, relaunched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{CopyBehavior, FakePlatform, LaunchBehavior};
    use crate::runlog::{MemoryLog, Severity};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        target: std::path::PathBuf,
        backups: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");
        let backups = dir.path().join("backup");
        fs::create_dir(&backups).unwrap();
        fs::write(&target, vec![9_u8; 10]).unwrap();
        Fixture {
            _dir: dir,
            target,
            backups,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_newest_backup_and_relaunches() {
        let fx = fixture();
        fs::write(fx.backups.join("old.bin.backup.1"), vec![1_u8; 900]).unwrap();
        fs::write(fx.backups.join("old.bin.backup.2"), vec![2_u8; 800]).unwrap();
        let platform = FakePlatform::new();
        let log = MemoryLog::new();

        let restored = roll_back(
            &fx.target,
            &fx.backups,
            &SwapPolicy::default(),
            &platform,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(restored.backup.token.as_deref(), Some("2"));
        assert!(restored.relaunched);
        assert_eq!(fs::read(&fx.target).unwrap(), vec![2_u8; 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_candidate_falls_through_to_next() {
        let fx = fixture();
        fs::write(fx.backups.join("old.bin.backup.1"), vec![1_u8; 900]).unwrap();
        fs::write(fx.backups.join("old.bin.backup.2"), vec![2_u8; 800]).unwrap();
        let platform = FakePlatform::new().with_copies(&[CopyBehavior::Fail]);
        let log = MemoryLog::new();

        let restored = roll_back(
            &fx.target,
            &fx.backups,
            &SwapPolicy::default(),
            &platform,
            &log,
        )
        .await
        .unwrap();

        assert_eq!(restored.backup.token.as_deref(), Some("1"));
        assert_eq!(fs::metadata(&fx.target).unwrap().len(), 900);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_candidates_failing_is_an_error() {
        let fx = fixture();
        fs::write(fx.backups.join("old.bin.backup.1"), vec![1_u8; 900]).unwrap();
        let platform = FakePlatform::new().with_copies(&[CopyBehavior::Truncate(3)]);
        let log = MemoryLog::new();

        let err = roll_back(
            &fx.target,
            &fx.backups,
            &SwapPolicy::default(),
            &platform,
            &log,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SwapError::RollbackRestore { .. }));
        assert!(log.contains(Severity::Error, "All backup candidates failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_backup_dir_is_an_error() {
        let fx = fixture();
        let platform = FakePlatform::new();
        let log = MemoryLog::new();

        let err = roll_back(
            &fx.target,
            &fx.backups,
            &SwapPolicy::default(),
            &platform,
            &log,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("no backup found"));
        assert_eq!(fs::metadata(&fx.target).unwrap().len(), 10);
        assert_eq!(platform.count_calls("start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaunch_failure_still_counts_as_restored() {
        let fx = fixture();
        fs::write(fx.backups.join("old.bin.backup.1"), vec![1_u8; 900]).unwrap();
        let platform = FakePlatform::new().with_launches(&[LaunchBehavior::Fail]);
        let log = MemoryLog::new();

        let restored = roll_back(
            &fx.target,
            &fx.backups,
            &SwapPolicy::default(),
            &platform,
            &log,
        )
        .await
        .unwrap();

        assert!(!restored.relaunched);
        assert_eq!(fs::metadata(&fx.target).unwrap().len(), 900);
    }
}

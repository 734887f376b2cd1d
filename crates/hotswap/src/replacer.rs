// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! File replacer: copies the new artifact over the target and verifies it

use crate::config::SwapPolicy;
use crate::error::{Result, SwapError};
use crate::platform::Platform;
use crate::runlog::RunLog;
use std::path::Path;

/// Size of the new artifact, captured once before the first copy attempt
pub fn capture_source_size(source: &Path) -> Result<u64> {
    match std::fs::metadata(source) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(SwapError::SourceMissing(source.to_path_buf())),
    }
}

/// Copy `source` over `target` with bounded retries.
///
/// `attempts` is incremented for every copy attempt so the caller's run state
/// reflects how many were spent. A size mismatch after a copy that reported
/// success is never retried.
pub async fn replace_artifact(
    source: &Path,
    target: &Path,
    source_size: u64,
    policy: &SwapPolicy,
    platform: &dyn Platform,
    log: &dyn RunLog,
    attempts: &mut u32,
) -> Result<u64> {
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.copy_attempts {
        tokio::time::sleep(policy.units(policy.copy_settle_units)).await;

        if !source.exists() {
            return Err(SwapError::SourceVanished(source.to_path_buf()));
        }

        *attempts += 1;
        log.info(&format!(
            "Copying {} -> {} (attempt {attempt}/{})",
            source.display(),
            target.display(),
            policy.copy_attempts
        ));

        match platform.copy_artifact(source, target) {
            Ok(_) => {
                let actual = std::fs::metadata(target).map_or(0, |meta| meta.len());
                if actual != source_size {
                    return Err(SwapError::SizeMismatch {
                        expected: source_size,
                        actual,
                    });
                }
                log.info(&format!("Copy verified: {actual} bytes"));
                return Ok(actual);
            }
            Err(e) => {
                if !source.exists() {
                    return Err(SwapError::SourceVanished(source.to_path_buf()));
                }
                log.warning(&format!("Copy attempt {attempt} failed: {e}"));
                last_error = e.to_string();
            }
        }

        if attempt < policy.copy_attempts {
            tokio::time::sleep(policy.units(policy.copy_backoff_units)).await;
        }
    }

    Err(SwapError::FileCopy {
        attempts: policy.copy_attempts,
        reason: last_error,
    })
}

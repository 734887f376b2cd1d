// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Process launcher: starts the swapped artifact detached and checks that it
//! shows up in the process table

use crate::config::SwapPolicy;
use crate::error::{Result, SwapError};
use crate::platform::{Platform, image_name};
use crate::runlog::RunLog;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Seen running after the confirmation interval
    Confirmed,
    /// Launched, but not seen. It may have exited quickly or the listing lags.
    Unconfirmed,
}

pub fn start(target: &Path, platform: &dyn Platform, log: &dyn RunLog) -> Result<u32> {
    log.info(&format!("Starting {}", target.display()));
    let pid = platform
        .start_detached(target)
        .map_err(|e| SwapError::ProcessStart {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;
    log.info(&format!("Started {} (PID {pid})", target.display()));
    Ok(pid)
}

async fn observed(target: &Path, policy: &SwapPolicy, platform: &dyn Platform) -> bool {
    tokio::time::sleep(policy.units(policy.launch_confirm_units)).await;
    !platform
        .list_processes_by_image_name(&image_name(target))
        .is_empty()
}

/// Confirm the launched process is alive.
///
/// Lenient by default: a missing process only logs a warning. With
/// `strict_launch_check` the target is launched once more and a second miss
/// is a `ProcessStart` error.
pub async fn verify_running(
    target: &Path,
    policy: &SwapPolicy,
    platform: &dyn Platform,
    log: &dyn RunLog,
) -> Result<Presence> {
    if observed(target, policy, platform).await {
        log.info(&format!("{} is running", target.display()));
        return Ok(Presence::Confirmed);
    }

    if !policy.strict_launch_check {
        log.warning(&format!(
            "{} was started but is not visible in the process list",
            target.display()
        ));
        return Ok(Presence::Unconfirmed);
    }

    log.warning(&format!(
        "{} not visible after launch, relaunching once",
        target.display()
    ));
    start(target, platform, log)?;
    if observed(target, policy, platform).await {
        log.info(&format!("{} is running after relaunch", target.display()));
        return Ok(Presence::Confirmed);
    }

    Err(SwapError::ProcessStart {
        path: target.to_path_buf(),
        reason: "process not observed after relaunch".to_owned(),
    })
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Process terminator: makes sure no instance of the target image is running
//! before the file is replaced
//!
//! The wait is bounded. A process that refuses to die is logged and left for
//! the copy step's own retry handling; the swap never hangs here.

use crate::config::SwapPolicy;
use crate::error::{Result, SwapError};
use crate::platform::Platform;
use crate::runlog::RunLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing was running; only the grace period was spent
    NeverRunning,
    /// An instance was found, signalled and disappeared
    Terminated { waited_intervals: u32 },
}

/// Returns `ProcessTerminationTimeout` when an instance outlives the bound.
/// Callers treat that as advisory.
pub async fn ensure_terminated(
    image: &str,
    policy: &SwapPolicy,
    platform: &dyn Platform,
    log: &dyn RunLog,
) -> Result<Termination> {
    let mut observed = false;
    let mut signalled = false;
    let mut waited_intervals = 0;

    loop {
        let running = platform.list_processes_by_image_name(image);

        if running.is_empty() {
            if observed {
                log.info(&format!(
                    "{image} terminated after {waited_intervals} intervals"
                ));
                return Ok(Termination::Terminated { waited_intervals });
            }

            log.info(&format!(
                "{image} is not running, settling for {} ms",
                policy.grace().as_millis()
            ));
            tokio::time::sleep(policy.grace()).await;
            return Ok(Termination::NeverRunning);
        }

        if !observed {
            observed = true;
            let pids: Vec<String> = running.iter().map(|p| p.pid.to_string()).collect();
            log.info(&format!("{image} is running (PID {})", pids.join(", ")));
        }

        if !signalled {
            signalled = true;
            match platform.terminate_by_image_name(image) {
                Ok(count) => log.info(&format!("Sent terminate to {count} {image} process(es)")),
                Err(e) => log.warning(&format!("Failed to terminate {image}: {e}")),
            }
        }

        if waited_intervals >= policy.max_wait_intervals {
            let err = SwapError::ProcessTerminationTimeout {
                image: image.to_owned(),
                waited_intervals,
            };
            log.warning(&format!("{err}, proceeding anyway"));
            return Err(err);
        }

        log.debug(&format!(
            "Waiting for {image} to exit ({}/{})",
            waited_intervals + 1,
            policy.max_wait_intervals
        ));
        tokio::time::sleep(policy.poll_interval()).await;
        waited_intervals += 1;
    }
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Retry, polling and launch policy for a swap run

use crate::error::{Result, SwapError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_1000() -> u64 {
    1000
}

fn default_1() -> u32 {
    1
}

fn default_20() -> u32 {
    20
}

fn default_3() -> u32 {
    3
}

fn default_2() -> u32 {
    2
}

fn default_5() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// All delays are expressed in time units so tests and slow hosts can scale
/// the whole policy with a single knob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapPolicy {
    /// Length of one time unit in milliseconds
    #[serde(default = "default_1000")]
    pub time_unit_ms: u64,

    /// Interval between process presence polls
    #[serde(default = "default_1")]
    pub poll_interval_units: u32,

    /// Maximum number of poll intervals to wait for termination
    #[serde(default = "default_20")]
    pub max_wait_intervals: u32,

    /// Grace period when no running instance was ever observed
    #[serde(default = "default_3")]
    pub grace_units: u32,

    /// Copy attempts before escalating to rollback
    #[serde(default = "default_3")]
    pub copy_attempts: u32,

    /// Backoff between failed copy attempts
    #[serde(default = "default_2")]
    pub copy_backoff_units: u32,

    /// Delay before every copy attempt, lets file handles drain
    #[serde(default = "default_5")]
    pub copy_settle_units: u32,

    /// Wait between launch and the presence check
    #[serde(default = "default_2")]
    pub launch_confirm_units: u32,

    /// Treat "launched but not observed" as a soft failure: relaunch once,
    /// then escalate
    #[serde(default)]
    pub strict_launch_check: bool,

    /// Remove the service registration after stopping it
    #[serde(default = "default_true")]
    pub remove_service: bool,
}

impl Default for SwapPolicy {
    fn default() -> Self {
        Self {
            time_unit_ms: 1000,
            poll_interval_units: 1,
            max_wait_intervals: 20,
            grace_units: 3,
            copy_attempts: 3,
            copy_backoff_units: 2,
            copy_settle_units: 5,
            launch_confirm_units: 2,
            strict_launch_check: false,
            remove_service: true,
        }
    }
}

impl SwapPolicy {
    pub fn units(&self, count: u32) -> Duration {
        Duration::from_millis(self.time_unit_ms.saturating_mul(u64::from(count)))
    }

    pub fn poll_interval(&self) -> Duration {
        self.units(self.poll_interval_units)
    }

    pub fn grace(&self) -> Duration {
        self.units(self.grace_units)
    }

    /// Upper bound on the time the terminator may spend before proceeding
    pub fn max_termination_wait(&self) -> Duration {
        self.units(self.poll_interval_units.saturating_mul(self.max_wait_intervals)) + self.grace()
    }

    fn validate(&self) -> Result<()> {
        if self.copy_attempts == 0 {
            return Err(SwapError::Config(
                "copy_attempts must be at least 1".to_owned(),
            ));
        }
        if self.poll_interval_units == 0 {
            return Err(SwapError::Config(
                "poll_interval_units must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Load the policy from a JSON file, or the defaults when no file is given.
///
/// Defaults are never written back: nothing may touch the disk before the
/// request has been validated.
pub fn load_policy(path: Option<&Path>) -> Result<SwapPolicy> {
    let Some(path) = path else {
        return Ok(SwapPolicy::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        SwapError::Config(format!("Failed to read policy {}: {e}", path.display()))
    })?;
    let policy: SwapPolicy = serde_json::from_str(&content)
        .map_err(|e| SwapError::Config(format!("Failed to parse policy: {e}")))?;
    policy.validate()?;
    Ok(policy)
}

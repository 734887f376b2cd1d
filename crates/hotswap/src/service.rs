// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Service controller: stops and unregisters the service wrapping the target
//!
//! Every operation is best-effort. The terminator that runs next is the
//! authoritative guard against a running instance.

use crate::error::{Result, SwapError};
use crate::platform::{Platform, ServiceState};
use crate::runlog::RunLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// No identity in the request
    Skipped,
    /// Identity given but nothing registered under it
    NotRegistered,
    Stopped,
    Removed,
}

#[derive(Debug)]
pub struct ServiceController<'a> {
    platform: &'a dyn Platform,
    log: &'a dyn RunLog,
}

impl<'a> ServiceController<'a> {
    pub fn new(platform: &'a dyn Platform, log: &'a dyn RunLog) -> Self {
        Self { platform, log }
    }

    pub fn exists(&self, identity: &str) -> bool {
        match self.platform.query_service(identity) {
            Ok(ServiceState::NotFound) => false,
            Ok(_) => true,
            Err(e) => {
                // Unknown: assume it exists so stop/remove are attempted
                self.log
                    .warning(&format!("Could not query service {identity}: {e}"));
                true
            }
        }
    }

    pub fn stop(&self, identity: &str) -> Result<()> {
        self.platform
            .stop_service(identity)
            .map_err(|e| SwapError::ServiceOperation {
                identity: identity.to_owned(),
                reason: format!("stop: {e}"),
            })
    }

    pub fn remove(&self, identity: &str) -> Result<()> {
        self.platform
            .remove_service(identity)
            .map_err(|e| SwapError::ServiceOperation {
                identity: identity.to_owned(),
                reason: format!("remove: {e}"),
            })
    }

    /// Stop, then optionally remove, the service. Returns the first failure
    /// after attempting both steps.
    pub fn shut_down(&self, identity: Option<&str>, remove: bool) -> Result<ServiceOutcome> {
        let Some(identity) = identity else {
            self.log.info("No service identity given, skipping service management");
            return Ok(ServiceOutcome::Skipped);
        };

        if !self.exists(identity) {
            self.log
                .info(&format!("Service {identity} is not registered"));
            return Ok(ServiceOutcome::NotRegistered);
        }

        self.log.info(&format!("Stopping service {identity}"));
        let stopped = self.stop(identity);
        if let Err(ref e) = stopped {
            self.log.warning(&e.to_string());
        }

        if !remove {
            return stopped.map(|()| ServiceOutcome::Stopped);
        }

        self.log.info(&format!("Removing service {identity}"));
        let removed = self.remove(identity);
        if let Err(ref e) = removed {
            self.log.warning(&e.to_string());
        }

        stopped.and(removed).map(|()| ServiceOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::runlog::{MemoryLog, Severity};

    #[test]
    fn test_absent_identity_is_noop() {
        let platform = FakePlatform::new();
        let log = MemoryLog::new();
        let controller = ServiceController::new(&platform, &log);

        assert_eq!(controller.shut_down(None, true).unwrap(), ServiceOutcome::Skipped);
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_unregistered_service_is_not_an_error() {
        let platform = FakePlatform::new();
        let log = MemoryLog::new();
        let controller = ServiceController::new(&platform, &log);

        assert_eq!(
            controller.shut_down(Some("Svc"), true).unwrap(),
            ServiceOutcome::NotRegistered
        );
        assert_eq!(platform.count_calls("stop"), 0);
    }

    #[test]
    fn test_running_service_is_stopped_and_removed() {
        let platform = FakePlatform::new().with_service("Svc", ServiceState::Running);
        let log = MemoryLog::new();
        let controller = ServiceController::new(&platform, &log);

        assert_eq!(
            controller.shut_down(Some("Svc"), true).unwrap(),
            ServiceOutcome::Removed
        );
        assert_eq!(platform.service_state("Svc"), ServiceState::NotFound);
    }

    #[test]
    fn test_stop_only_keeps_registration() {
        let platform = FakePlatform::new().with_service("Svc", ServiceState::Running);
        let log = MemoryLog::new();
        let controller = ServiceController::new(&platform, &log);

        assert_eq!(
            controller.shut_down(Some("Svc"), false).unwrap(),
            ServiceOutcome::Stopped
        );
        assert_eq!(platform.service_state("Svc"), ServiceState::Stopped);
    }

    #[test]
    fn test_failures_on_existing_service_are_reported_after_both_steps() {
        let platform = FakePlatform::new()
            .with_service("Svc", ServiceState::Running)
            .with_failing_service_ops();
        let log = MemoryLog::new();
        let controller = ServiceController::new(&platform, &log);

        let err = controller.shut_down(Some("Svc"), true).unwrap_err();
        assert!(matches!(err, SwapError::ServiceOperation { .. }));
        assert_eq!(platform.count_calls("stop"), 1);
        assert_eq!(platform.count_calls("remove"), 1);
        assert!(log.contains(Severity::Warning, "stop"));
    }
}

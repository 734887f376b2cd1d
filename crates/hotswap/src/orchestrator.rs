// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update orchestrator: sequences the swap phases and produces the outcome
//!
//! ```text
//! Init -> ValidateParams -> StopService -> TerminateProcess -> ReplaceFile
//!      -> StartProcess -> VerifyRunning -> Success
//! ReplaceFile | StartProcess | VerifyRunning --failure--> Rollback -> Restored | FatalFailure
//! ```
//!
//! Service and termination failures are advisory and fall through to
//! `ReplaceFile`. Once the target may have been touched, every failure goes
//! through rollback before the run ends.

use crate::config::SwapPolicy;
use crate::error::{Result, SwapError};
use crate::journal::{self, Journal};
use crate::launcher::{self, Presence};
use crate::platform::{Platform, image_name};
use crate::replacer;
use crate::request::{self, UpdateRequest};
use crate::rollback;
use crate::runlog::RunLog;
use crate::service::ServiceController;
use crate::state::{Outcome, OutcomeKind, Phase, RunState};
use crate::terminator::{self, Termination};
use std::io;
use std::path::Path;

#[derive(Debug)]
struct Run {
    state: RunState,
    journal: Option<Journal>,
}

/// Drives one swap. Holds no state between runs.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    request: UpdateRequest,
    policy: SwapPolicy,
    platform: &'a dyn Platform,
    log: &'a dyn RunLog,
    expected_sha256: Option<String>,
    use_journal: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        request: UpdateRequest,
        policy: SwapPolicy,
        platform: &'a dyn Platform,
        log: &'a dyn RunLog,
    ) -> Self {
        Self {
            request,
            policy,
            platform,
            log,
            expected_sha256: None,
            use_journal: true,
        }
    }

    /// Verify the new artifact against this SHA256 before touching anything
    pub fn with_expected_sha256(mut self, checksum: Option<String>) -> Self {
        self.expected_sha256 = checksum;
        self
    }

    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.use_journal = enabled;
        self
    }

    /// Run the swap to a terminal state. Always yields exactly one outcome.
    pub async fn run(&self) -> Outcome {
        let mut run = Run {
            state: RunState::default(),
            journal: None,
        };

        self.log.info(&format!(
            "Hot swap requested: service={}, new={}, target={}, backups={}",
            self.request.service_identity.as_deref().unwrap_or("<none>"),
            self.request.new_artifact.display(),
            self.request.target_artifact.display(),
            self.request.backup_dir.display()
        ));
        self.inspect_previous_run(&mut run.state);

        let outcome = self.drive(&mut run).await;
        self.log.debug(&format!(
            "Run counters: termination intervals {}, copy attempts {}, launch attempts {}",
            run.state.termination_intervals, run.state.copy_attempts, run.state.launch_attempts
        ));

        if let Some(journal) = run.journal.take()
            && let Err(e) = journal.finish()
        {
            self.log.warning(&format!("Failed to remove journal: {e}"));
        }

        let summary = format!(
            "Outcome {} (exit {}): {}",
            outcome.kind, outcome.exit_code, outcome.message
        );
        match outcome.kind {
            OutcomeKind::Success => self.log.success(&summary),
            OutcomeKind::RolledBack => self.log.warning(&summary),
            OutcomeKind::FatalFailure => self.log.error(&summary),
        }
        outcome
    }

    fn inspect_previous_run(&self, state: &mut RunState) {
        if !self.use_journal || self.request.target_artifact.as_os_str().is_empty() {
            return;
        }
        let path = journal::journal_path(&self.request.target_artifact);
        match journal::load(&path) {
            Ok(None) => {}
            Ok(Some(entry)) => {
                self.log.warning(&format!(
                    "Previous swap was interrupted during {} (last update {})",
                    entry.phase,
                    entry.updated_at.to_rfc3339()
                ));
                if entry.left_target_suspect() {
                    self.log.warning(&format!(
                        "{} may be incomplete, repair pending",
                        self.request.target_artifact.display()
                    ));
                    state.repair_pending = true;
                } else {
                    self.discard_stale_journal(&path);
                }
            }
            Err(e) => {
                self.log.warning(&format!("Ignoring unreadable journal: {e}"));
                self.discard_stale_journal(&path);
            }
        }
    }

    /// The marker is kept only while it still points at a target to repair
    fn discard_stale_journal(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => self.log.info("Cleared journal of the interrupted swap"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self
                .log
                .warning(&format!("Failed to remove stale journal: {e}")),
        }
    }

    fn announce(&self, run: &mut Run, phase: Phase) {
        run.state.phase = phase;
        self.log.info(&format!("Phase {phase}: entered"));
    }

    fn enter(&self, run: &mut Run, phase: Phase) {
        self.announce(run, phase);
        // Terminal phases end the run, which removes the journal
        if !phase.is_terminal() {
            self.update_journal(run, |journal| journal.record(phase));
        }
    }

    fn update_journal(&self, run: &mut Run, update: impl FnOnce(&mut Journal) -> Result<()>) {
        if let Some(journal) = run.journal.as_mut()
            && let Err(e) = update(journal)
        {
            self.log.warning(&format!("Failed to update journal: {e}"));
        }
    }

    fn completed(&self, phase: Phase, detail: &str) {
        self.log.info(&format!("Phase {phase}: completed ({detail})"));
    }

    fn advisory(&self, run: &mut Run, phase: Phase, err: &SwapError) {
        run.state.last_error = Some(err.to_string());
        self.log
            .warning(&format!("Phase {phase}: failed, continuing ({err})"));
    }

    fn preflight(&self) -> Result<()> {
        request::validate(&self.request, self.platform)?;
        if let Some(expected) = self.expected_sha256.as_deref() {
            request::verify_checksum(&self.request.new_artifact, expected)?;
            self.log.info("New artifact checksum verified");
        }
        Ok(())
    }

    async fn drive(&self, run: &mut Run) -> Outcome {
        self.enter(run, Phase::ValidateParams);
        if let Err(e) = self.preflight() {
            run.state.last_error = Some(e.to_string());
            let kind = if e.is_preflight() {
                "failed"
            } else {
                "failed unexpectedly"
            };
            self.log
                .error(&format!("Phase {}: {kind} ({e})", Phase::ValidateParams));
            if run.state.repair_pending {
                return self.repair_after_failed_validation(run, &e).await;
            }
            self.enter(run, Phase::FatalFailure);
            return Outcome::new(OutcomeKind::FatalFailure, e.to_string());
        }
        self.completed(Phase::ValidateParams, "request valid");

        if self.use_journal {
            match Journal::begin(&self.request.target_artifact) {
                Ok(journal) => run.journal = Some(journal),
                Err(e) => self
                    .log
                    .warning(&format!("Continuing without journal: {e}")),
            }
        }

        self.stop_service(run);
        self.terminate_process(run).await;

        if let Err(e) = self.replace_file(run).await {
            return self.escalate(run, e).await;
        }
        if let Err(e) = self.start_process(run) {
            return self.escalate(run, e).await;
        }
        let presence = match self.verify_running(run).await {
            Ok(presence) => presence,
            Err(e) => return self.escalate(run, e).await,
        };

        self.enter(run, Phase::Success);
        let message = match presence {
            Presence::Confirmed => format!(
                "{} replaced and running",
                self.request.target_artifact.display()
            ),
            Presence::Unconfirmed => format!(
                "{} replaced and started, not confirmed running",
                self.request.target_artifact.display()
            ),
        };
        Outcome::new(OutcomeKind::Success, message)
    }

    fn stop_service(&self, run: &mut Run) {
        self.enter(run, Phase::StopService);
        let controller = ServiceController::new(self.platform, self.log);
        match controller.shut_down(
            self.request.service_identity.as_deref(),
            self.policy.remove_service,
        ) {
            Ok(outcome) => self.completed(Phase::StopService, &format!("{outcome:?}")),
            Err(e) => self.advisory(run, Phase::StopService, &e),
        }
    }

    async fn terminate_process(&self, run: &mut Run) {
        self.enter(run, Phase::TerminateProcess);
        let image = image_name(&self.request.target_artifact);
        match terminator::ensure_terminated(&image, &self.policy, self.platform, self.log).await {
            Ok(Termination::NeverRunning) => {
                self.completed(Phase::TerminateProcess, "not running");
            }
            Ok(Termination::Terminated { waited_intervals }) => {
                run.state.termination_intervals = waited_intervals;
                self.completed(
                    Phase::TerminateProcess,
                    &format!("terminated after {waited_intervals} intervals"),
                );
            }
            Err(e) => {
                if let SwapError::ProcessTerminationTimeout {
                    waited_intervals, ..
                } = &e
                {
                    run.state.termination_intervals = *waited_intervals;
                }
                self.advisory(run, Phase::TerminateProcess, &e);
            }
        }
    }

    async fn replace_file(&self, run: &mut Run) -> Result<()> {
        // Journaled only once both sizes are known
        self.announce(run, Phase::ReplaceFile);
        let size = replacer::capture_source_size(&self.request.new_artifact)?;
        run.state.source_size = Some(size);
        let target_size = std::fs::metadata(&self.request.target_artifact)
            .ok()
            .map(|meta| meta.len());
        self.update_journal(run, |journal| journal.record_replace(size, target_size));
        self.log.debug(&format!("Captured source size: {size} bytes"));

        let copied = replacer::replace_artifact(
            &self.request.new_artifact,
            &self.request.target_artifact,
            size,
            &self.policy,
            self.platform,
            self.log,
            &mut run.state.copy_attempts,
        )
        .await?;
        self.completed(
            Phase::ReplaceFile,
            &format!(
                "{copied} bytes after {} attempt(s)",
                run.state.copy_attempts
            ),
        );
        Ok(())
    }

    fn start_process(&self, run: &mut Run) -> Result<()> {
        self.enter(run, Phase::StartProcess);
        run.state.launch_attempts += 1;
        let pid = launcher::start(&self.request.target_artifact, self.platform, self.log)?;
        self.completed(Phase::StartProcess, &format!("PID {pid}"));
        Ok(())
    }

    async fn verify_running(&self, run: &mut Run) -> Result<Presence> {
        self.enter(run, Phase::VerifyRunning);
        let presence = launcher::verify_running(
            &self.request.target_artifact,
            &self.policy,
            self.platform,
            self.log,
        )
        .await?;
        self.completed(Phase::VerifyRunning, &format!("{presence:?}"));
        Ok(presence)
    }

    async fn escalate(&self, run: &mut Run, err: SwapError) -> Outcome {
        let failed = run.state.phase;
        run.state.last_error = Some(err.to_string());
        if err.is_escalating() {
            self.log.error(&format!("Phase {failed}: failed ({err})"));
        } else {
            self.log
                .error(&format!("Phase {failed}: failed unexpectedly ({err})"));
        }

        self.enter(run, Phase::Rollback);
        match rollback::roll_back(
            &self.request.target_artifact,
            &self.request.backup_dir,
            &self.policy,
            self.platform,
            self.log,
        )
        .await
        {
            Ok(restored) => {
                self.enter(run, Phase::Restored);
                Outcome::new(
                    OutcomeKind::RolledBack,
                    format!(
                        "{failed} failed ({err}); restored {}{}",
                        restored.backup.path.display(),
                        if restored.relaunched {
                            ""
                        } else {
                            ", relaunch failed"
                        }
                    ),
                )
            }
            Err(rollback_err) => {
                self.enter(run, Phase::FatalFailure);
                Outcome::new(
                    OutcomeKind::FatalFailure,
                    format!("{failed} failed ({err}); rollback failed ({rollback_err})"),
                )
            }
        }
    }

    /// The target was left suspect by an earlier crash and this run will not
    /// overwrite it, so restore a backup before giving up.
    async fn repair_after_failed_validation(&self, run: &mut Run, err: &SwapError) -> Outcome {
        self.log.warning("Repairing target left by the interrupted swap");
        self.enter(run, Phase::Rollback);
        match rollback::roll_back(
            &self.request.target_artifact,
            &self.request.backup_dir,
            &self.policy,
            self.platform,
            self.log,
        )
        .await
        {
            Ok(restored) => {
                self.enter(run, Phase::Restored);
                self.discard_stale_journal(&journal::journal_path(&self.request.target_artifact));
                Outcome::new(
                    OutcomeKind::RolledBack,
                    format!(
                        "{err}; repaired target from {}",
                        restored.backup.path.display()
                    ),
                )
            }
            Err(rollback_err) => {
                self.enter(run, Phase::FatalFailure);
                Outcome::new(
                    OutcomeKind::FatalFailure,
                    format!("{err}; repair failed ({rollback_err})"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use crate::runlog::{MemoryLog, Severity};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_every_transition_is_logged_once_on_success() {
        let dir = TempDir::new().unwrap();
        let new = dir.path().join("new.bin");
        let target = dir.path().join("old.bin");
        fs::write(&new, vec![1_u8; 64]).unwrap();
        fs::write(&target, vec![0_u8; 32]).unwrap();

        let platform = FakePlatform::new();
        let log = MemoryLog::new();
        let request = UpdateRequest::new(None, &new, &target, dir.path().join("backup"));
        let outcome = Orchestrator::new(request, SwapPolicy::default(), &platform, &log)
            .run()
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Success);
        let entered: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|(_, line)| line.ends_with(": entered"))
            .map(|(_, line)| line)
            .collect();
        assert_eq!(
            entered,
            [
                "Phase ValidateParams: entered",
                "Phase StopService: entered",
                "Phase TerminateProcess: entered",
                "Phase ReplaceFile: entered",
                "Phase StartProcess: entered",
                "Phase VerifyRunning: entered",
                "Phase Success: entered",
            ]
        );
        assert!(log.contains(Severity::Success, "Outcome Success (exit 0)"));
        assert!(log.contains(
            Severity::Debug,
            "termination intervals 0, copy attempts 1, launch attempts 1"
        ));
        assert!(!journal::journal_path(&target).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old.bin");
        fs::write(&target, vec![0_u8; 32]).unwrap();

        let platform = FakePlatform::new().with_elevated(false);
        let log = MemoryLog::new();
        let request = UpdateRequest::new(
            Some("Svc"),
            dir.path().join("new.bin"),
            &target,
            dir.path().join("backup"),
        );
        let outcome = Orchestrator::new(request, SwapPolicy::default(), &platform, &log)
            .run()
            .await;

        assert_eq!(outcome.kind, OutcomeKind::FatalFailure);
        assert_eq!(outcome.exit_code, 1);
        assert!(platform.calls().is_empty());
        assert!(!journal::journal_path(&target).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checksum_mismatch_is_fatal_before_mutation() {
        let dir = TempDir::new().unwrap();
        let new = dir.path().join("new.bin");
        let target = dir.path().join("old.bin");
        fs::write(&new, vec![1_u8; 64]).unwrap();
        fs::write(&target, vec![0_u8; 32]).unwrap();

        let platform = FakePlatform::new();
        let log = MemoryLog::new();
        let request = UpdateRequest::new(None, &new, &target, dir.path().join("backup"));
        let outcome = Orchestrator::new(request, SwapPolicy::default(), &platform, &log)
            .with_expected_sha256(Some("deadbeef".to_owned()))
            .run()
            .await;

        assert_eq!(outcome.kind, OutcomeKind::FatalFailure);
        assert!(outcome.message.contains("checksum mismatch"));
        assert_eq!(fs::metadata(&target).unwrap().len(), 32);
        assert_eq!(platform.count_calls("copy"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_artifact_is_reported_as_unexpected() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be hashed
        let new = dir.path().join("new.bin");
        fs::create_dir(&new).unwrap();
        let target = dir.path().join("old.bin");
        fs::write(&target, vec![0_u8; 32]).unwrap();

        let platform = FakePlatform::new();
        let log = MemoryLog::new();
        let request = UpdateRequest::new(None, &new, &target, dir.path().join("backup"));
        let outcome = Orchestrator::new(request, SwapPolicy::default(), &platform, &log)
            .with_expected_sha256(Some("deadbeef".to_owned()))
            .run()
            .await;

        assert_eq!(outcome.kind, OutcomeKind::FatalFailure);
        assert!(log.contains(Severity::Error, "Phase ValidateParams: failed unexpectedly"));
        assert!(platform.calls().is_empty());
    }
}

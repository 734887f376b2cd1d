// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Run state and outcome of a swap

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    ValidateParams,
    StopService,
    TerminateProcess,
    ReplaceFile,
    StartProcess,
    VerifyRunning,
    Rollback,
    Success,
    Restored,
    FatalFailure,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::ValidateParams => "ValidateParams",
            Self::StopService => "StopService",
            Self::TerminateProcess => "TerminateProcess",
            Self::ReplaceFile => "ReplaceFile",
            Self::StartProcess => "StartProcess",
            Self::VerifyRunning => "VerifyRunning",
            Self::Rollback => "Rollback",
            Self::Success => "Success",
            Self::Restored => "Restored",
            Self::FatalFailure => "FatalFailure",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Restored | Self::FatalFailure)
    }

    /// Phases during which the target file may not hold a verified artifact
    pub fn touches_target(self) -> bool {
        matches!(self, Self::ReplaceFile | Self::Rollback)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Working state threaded through the phases of one run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub phase: Phase,
    pub copy_attempts: u32,
    pub termination_intervals: u32,
    pub launch_attempts: u32,
    pub last_error: Option<String>,
    /// Size of the new artifact, captured once before replacement
    pub source_size: Option<u64>,
    /// A previous run was interrupted while the target was being written
    pub repair_pending: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            copy_attempts: 0,
            termination_intervals: 0,
            launch_attempts: 0,
            last_error: None,
            source_size: None,
            repair_pending: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    RolledBack,
    FatalFailure,
}

impl OutcomeKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::FatalFailure => 1,
            Self::RolledBack => 2,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "Success",
            Self::RolledBack => "RolledBack",
            Self::FatalFailure => "FatalFailure",
        })
    }
}

/// The single externally visible result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub exit_code: i32,
    pub message: String,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            exit_code: kind.exit_code(),
            message: message.into(),
        }
    }
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the hotswap crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("insufficient privileges: {0}")]
    Permission(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("service operation failed on {identity}: {reason}")]
    ServiceOperation { identity: String, reason: String },

    #[error("process {image} still running after {waited_intervals} intervals")]
    ProcessTerminationTimeout {
        image: String,
        waited_intervals: u32,
    },

    #[error("new artifact not found: {0}")]
    SourceMissing(PathBuf),

    #[error("new artifact vanished during replacement: {0}")]
    SourceVanished(PathBuf),

    #[error("copy failed after {attempts} attempts: {reason}")]
    FileCopy { attempts: u32, reason: String },

    #[error("size mismatch after copy: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("failed to start {path}: {reason}")]
    ProcessStart { path: PathBuf, reason: String },

    #[error("failed to restore backup {path}: {reason}")]
    RollbackRestore { path: PathBuf, reason: String },

    #[error("journal error: {0}")]
    Journal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwapError {
    /// Errors raised before anything on disk or in the process table changed
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Parameter(_) | Self::Permission(_) | Self::ChecksumMismatch { .. }
        )
    }

    /// Errors that must route through the rollback manager
    pub fn is_escalating(&self) -> bool {
        matches!(
            self,
            Self::SourceMissing(_)
                | Self::SourceVanished(_)
                | Self::FileCopy { .. }
                | Self::SizeMismatch { .. }
                | Self::ProcessStart { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SwapError>;

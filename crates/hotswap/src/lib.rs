// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Hotswap - replaces a running executable in place and rolls back on failure
//!
//! A swap stops the owning service, terminates the running image, copies the
//! new artifact over the target with retries and size verification, then
//! launches it. Any failure after the target may have been touched restores
//! the newest usable backup.

pub mod backup;
pub mod config;
pub mod error;
pub mod journal;
pub mod launcher;
pub mod orchestrator;
pub mod platform;
pub mod replacer;
pub mod request;
pub mod rollback;
pub mod runlog;
pub mod service;
pub mod state;
pub mod terminator;

pub use config::{SwapPolicy, load_policy};
pub use error::SwapError;
pub use orchestrator::Orchestrator;
pub use platform::{Platform, SystemPlatform};
pub use request::UpdateRequest;
pub use runlog::{FileLog, MemoryLog, RunLog, Severity};
pub use state::{Outcome, OutcomeKind, Phase};

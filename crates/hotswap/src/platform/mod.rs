// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Operating system primitives consumed by the swap phases
//!
//! The orchestrator never shells out or touches the process table directly;
//! everything goes through [`Platform`] so the state machine can be driven by
//! [`fake::FakePlatform`] in tests.

pub mod fake;
mod system;

pub use system::SystemPlatform;

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotFound,
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

pub trait Platform: std::fmt::Debug {
    /// Whether the caller may manage services and system file locations
    fn is_elevated(&self) -> bool;

    fn query_service(&self, identity: &str) -> io::Result<ServiceState>;

    fn stop_service(&self, identity: &str) -> io::Result<()>;

    fn remove_service(&self, identity: &str) -> io::Result<()>;

    fn list_processes_by_image_name(&self, image: &str) -> Vec<ProcessEntry>;

    /// Forcefully terminate every process with this image name, returns how
    /// many were signalled
    fn terminate_by_image_name(&self, image: &str) -> io::Result<usize>;

    /// Start `path` so that it outlives the calling process, returns its pid
    fn start_detached(&self, path: &Path) -> io::Result<u32>;

    /// Copy an artifact, returns the number of bytes written
    fn copy_artifact(&self, from: &Path, to: &Path) -> io::Result<u64> {
        staged_copy(from, to)
    }
}

/// Copy next to the destination, then rename over it, so `to` always holds
/// either the old or the complete new content.
pub fn staged_copy(from: &Path, to: &Path) -> io::Result<u64> {
    let mut staging = to.as_os_str().to_owned();
    staging.push(".swap-tmp");
    let staging = PathBuf::from(staging);

    let bytes = match copy_to_staging(from, &staging) {
        Ok(bytes) => bytes,
        Err(e) => {
            discard_staging(&staging);
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&staging, to) {
        discard_staging(&staging);
        return Err(e);
    }
    Ok(bytes)
}

fn copy_to_staging(from: &Path, staging: &Path) -> io::Result<u64> {
    let bytes = std::fs::copy(from, staging)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(staging)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(staging, perms)?;
    }

    Ok(bytes)
}

fn discard_staging(staging: &Path) {
    match std::fs::remove_file(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {e}", staging.display()),
    }
}

/// Image name used to find running instances of an artifact
pub fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

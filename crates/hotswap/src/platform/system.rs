// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Real platform backed by the host service manager and process table

use super::{Platform, ProcessEntry, ServiceState};
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use sysinfo::{Process, ProcessStatus, ProcessesToUpdate, System};

/// `systemctl` on unix hosts, `sc` on Windows
#[derive(Debug, Default)]
pub struct SystemPlatform;

impl SystemPlatform {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
    }
}

fn run_tool(program: &str, args: &[&str]) -> io::Result<Output> {
    tracing::debug!("Running {program} {}", args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
}

fn check_status(program: &str, output: &Output) -> io::Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim().to_owned()
    } else {
        stderr.trim().to_owned()
    };
    Err(io::Error::other(format!(
        "{program} exited with {}: {detail}",
        output.status
    )))
}

/// Linux truncates the process name to 15 bytes, so the executable path is
/// checked as well.
fn matches_image(process: &Process, image: &str) -> bool {
    if process.status() == ProcessStatus::Zombie {
        return false;
    }
    if process.name() == OsStr::new(image) {
        return true;
    }
    process
        .exe()
        .and_then(Path::file_name)
        .is_some_and(|name| name == OsStr::new(image))
}

impl Platform for SystemPlatform {
    #[cfg(unix)]
    fn is_elevated(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(windows)]
    fn is_elevated(&self) -> bool {
        // `net session` is refused without an elevated token
        run_tool("net", &["session"]).is_ok_and(|output| output.status.success())
    }

    #[cfg(not(any(unix, windows)))]
    fn is_elevated(&self) -> bool {
        false
    }

    #[cfg(not(windows))]
    fn query_service(&self, identity: &str) -> io::Result<ServiceState> {
        let output = run_tool(
            "systemctl",
            &["show", "--property=LoadState", "--value", identity],
        )?;
        check_status("systemctl", &output)?;
        if String::from_utf8_lossy(&output.stdout).trim() == "not-found" {
            return Ok(ServiceState::NotFound);
        }

        let active = run_tool("systemctl", &["is-active", "--quiet", identity])?;
        if active.status.success() {
            Ok(ServiceState::Running)
        } else {
            Ok(ServiceState::Stopped)
        }
    }

    #[cfg(windows)]
    fn query_service(&self, identity: &str) -> io::Result<ServiceState> {
        // 1060: ERROR_SERVICE_DOES_NOT_EXIST
        let output = run_tool("sc", &["query", identity])?;
        if output.status.code() == Some(1060) {
            return Ok(ServiceState::NotFound);
        }
        check_status("sc", &output)?;
        if String::from_utf8_lossy(&output.stdout).contains("RUNNING") {
            Ok(ServiceState::Running)
        } else {
            Ok(ServiceState::Stopped)
        }
    }

    #[cfg(not(windows))]
    fn stop_service(&self, identity: &str) -> io::Result<()> {
        let output = run_tool("systemctl", &["stop", identity])?;
        check_status("systemctl", &output)
    }

    #[cfg(windows)]
    fn stop_service(&self, identity: &str) -> io::Result<()> {
        let output = run_tool("sc", &["stop", identity])?;
        // 1062: ERROR_SERVICE_NOT_ACTIVE
        if output.status.code() == Some(1062) {
            return Ok(());
        }
        check_status("sc", &output)
    }

    #[cfg(not(windows))]
    fn remove_service(&self, identity: &str) -> io::Result<()> {
        let output = run_tool("systemctl", &["disable", identity])?;
        check_status("systemctl", &output)
    }

    #[cfg(windows)]
    fn remove_service(&self, identity: &str) -> io::Result<()> {
        let output = run_tool("sc", &["delete", identity])?;
        check_status("sc", &output)
    }

    fn list_processes_by_image_name(&self, image: &str) -> Vec<ProcessEntry> {
        let system = Self::snapshot();
        system
            .processes()
            .values()
            .filter(|process| matches_image(process, image))
            .map(|process| ProcessEntry {
                pid: process.pid().as_u32(),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect()
    }

    fn terminate_by_image_name(&self, image: &str) -> io::Result<usize> {
        let system = Self::snapshot();
        let own_pid = std::process::id();
        let mut signalled = 0;

        for process in system.processes().values() {
            if !matches_image(process, image) || process.pid().as_u32() == own_pid {
                continue;
            }
            if force_kill(process) {
                signalled += 1;
            } else {
                tracing::warn!("Failed to signal {image} (PID {})", process.pid());
            }
        }

        Ok(signalled)
    }

    fn start_detached(&self, path: &Path) -> io::Result<u32> {
        let mut command = Command::new(path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            command.current_dir(parent);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: a signal to ours must not reach the child
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        // Dropping the handle leaves the child running
        let child = command.spawn()?;
        Ok(child.id())
    }
}

#[cfg(unix)]
fn force_kill(process: &Process) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(process.pid().as_u32()) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => true,
        Err(e) => {
            tracing::debug!("SIGKILL to {raw} failed: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
fn force_kill(process: &Process) -> bool {
    process.kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_image_is_not_listed() {
        let platform = SystemPlatform::new();
        let found = platform.list_processes_by_image_name("hotswap-no-such-image-7f3a");
        assert!(found.is_empty());
    }

    #[test]
    fn test_terminate_unknown_image_signals_nothing() {
        let platform = SystemPlatform::new();
        let count = platform
            .terminate_by_image_name("hotswap-no-such-image-7f3a")
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_start_detached_missing_binary_fails() {
        let platform = SystemPlatform::new();
        let dir = tempfile::TempDir::new().unwrap();
        let result = platform.start_detached(&dir.path().join("missing-binary"));
        assert!(result.is_err());
    }

    #[test]
    fn test_check_status_reports_stderr() {
        let output = run_tool(
            if cfg!(windows) { "cmd" } else { "sh" },
            if cfg!(windows) {
                &["/C", "echo boom 1>&2 & exit 3"]
            } else {
                &["-c", "echo boom >&2; exit 3"]
            },
        )
        .unwrap();
        let err = check_status("tool", &output).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}

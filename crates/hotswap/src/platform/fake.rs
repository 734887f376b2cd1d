// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! In-memory platform for driving the swap phases in tests
//!
//! Models a single target image: whether an instance is running, how it
//! reacts to a forceful terminate, what the next launches do, and how the
//! next copies behave. Every call is recorded in order.

use super::{Platform, ProcessEntry, ServiceState};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchBehavior {
    /// Spawns and stays visible in the process table
    Start,
    /// Spawns but never shows up (exited fast, or listing lags)
    StartInvisible,
    /// The launch command itself fails
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyBehavior {
    /// Real copy
    Normal,
    /// Copy fails as if the target were locked
    Fail,
    /// Copy "succeeds" but writes only this many bytes
    Truncate(u64),
    /// The source is deleted and the copy fails
    RemoveSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillBehavior {
    /// Gone after this many further polls
    DiesAfter(u32),
    /// Ignores the terminate signal
    Stubborn,
}

#[derive(Debug)]
struct FakeState {
    elevated: bool,
    services: HashMap<String, ServiceState>,
    fail_service_ops: bool,
    running: bool,
    killed: bool,
    kill_behavior: KillBehavior,
    polls_until_gone: u32,
    launches: VecDeque<LaunchBehavior>,
    copies: VecDeque<CopyBehavior>,
    next_pid: u32,
    calls: Vec<String>,
}

#[derive(Debug)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    /// Elevated, no services, nothing running, every launch and copy works
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                elevated: true,
                services: HashMap::new(),
                fail_service_ops: false,
                running: false,
                killed: false,
                kill_behavior: KillBehavior::DiesAfter(0),
                polls_until_gone: 0,
                launches: VecDeque::new(),
                copies: VecDeque::new(),
                next_pid: 4000,
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_elevated(self, elevated: bool) -> Self {
        self.state.lock().elevated = elevated;
        self
    }

    pub fn with_service(self, identity: &str, state: ServiceState) -> Self {
        self.state
            .lock()
            .services
            .insert(identity.to_owned(), state);
        self
    }

    pub fn with_failing_service_ops(self) -> Self {
        self.state.lock().fail_service_ops = true;
        self
    }

    /// An instance of the target image is running
    pub fn with_running(self, kill_behavior: KillBehavior) -> Self {
        {
            let mut state = self.state.lock();
            state.running = true;
            state.kill_behavior = kill_behavior;
        }
        self
    }

    pub fn with_launches(self, launches: &[LaunchBehavior]) -> Self {
        self.state.lock().launches.extend(launches.iter().copied());
        self
    }

    pub fn with_copies(self, copies: &[CopyBehavior]) -> Self {
        self.state.lock().copies.extend(copies.iter().copied());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn service_state(&self, identity: &str) -> ServiceState {
        self.state
            .lock()
            .services
            .get(identity)
            .copied()
            .unwrap_or(ServiceState::NotFound)
    }

    fn service_op(&self, op: &str, identity: &str, next: Option<ServiceState>) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{op} {identity}"));
        if !state.services.contains_key(identity) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("service {identity} does not exist"),
            ));
        }
        if state.fail_service_ops {
            return Err(io::Error::other(format!("{op} {identity} refused")));
        }
        match next {
            Some(next) => {
                state.services.insert(identity.to_owned(), next);
            }
            None => {
                state.services.remove(identity);
            }
        }
        Ok(())
    }
}

impl Platform for FakePlatform {
    fn is_elevated(&self) -> bool {
        self.state.lock().elevated
    }

    fn query_service(&self, identity: &str) -> io::Result<ServiceState> {
        let mut state = self.state.lock();
        state.calls.push(format!("query {identity}"));
        Ok(state
            .services
            .get(identity)
            .copied()
            .unwrap_or(ServiceState::NotFound))
    }

    fn stop_service(&self, identity: &str) -> io::Result<()> {
        self.service_op("stop", identity, Some(ServiceState::Stopped))
    }

    fn remove_service(&self, identity: &str) -> io::Result<()> {
        self.service_op("remove", identity, None)
    }

    fn list_processes_by_image_name(&self, image: &str) -> Vec<ProcessEntry> {
        let mut state = self.state.lock();
        state.calls.push(format!("list {image}"));

        if state.running && state.killed {
            let behavior = state.kill_behavior;
            match behavior {
                KillBehavior::Stubborn => {}
                KillBehavior::DiesAfter(_) if state.polls_until_gone == 0 => {
                    state.running = false;
                }
                KillBehavior::DiesAfter(_) => state.polls_until_gone -= 1,
            }
        }

        if state.running {
            vec![ProcessEntry {
                pid: state.next_pid,
                name: image.to_owned(),
            }]
        } else {
            Vec::new()
        }
    }

    fn terminate_by_image_name(&self, image: &str) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.calls.push(format!("terminate {image}"));
        if !state.running {
            return Ok(0);
        }
        if !state.killed {
            state.killed = true;
            let behavior = state.kill_behavior;
            if let KillBehavior::DiesAfter(polls) = behavior {
                state.polls_until_gone = polls;
            }
        }
        Ok(1)
    }

    fn start_detached(&self, path: &Path) -> io::Result<u32> {
        let mut state = self.state.lock();
        state.calls.push(format!("start {}", path.display()));
        let behavior = state.launches.pop_front().unwrap_or(LaunchBehavior::Start);
        match behavior {
            LaunchBehavior::Fail => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "launch refused",
            )),
            LaunchBehavior::Start | LaunchBehavior::StartInvisible => {
                state.next_pid += 1;
                state.running = behavior == LaunchBehavior::Start;
                state.killed = false;
                Ok(state.next_pid)
            }
        }
    }

    fn copy_artifact(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let behavior = {
            let mut state = self.state.lock();
            state
                .calls
                .push(format!("copy {} -> {}", from.display(), to.display()));
            state.copies.pop_front().unwrap_or(CopyBehavior::Normal)
        };

        match behavior {
            CopyBehavior::Normal => super::staged_copy(from, to),
            CopyBehavior::Fail => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "target is locked",
            )),
            CopyBehavior::Truncate(bytes) => {
                let content = std::fs::read(from)?;
                let keep = usize::try_from(bytes).map_or(content.len(), |b| b.min(content.len()));
                std::fs::write(to, &content[..keep])?;
                Ok(bytes)
            }
            CopyBehavior::RemoveSource => {
                std::fs::remove_file(from)?;
                Err(io::Error::new(io::ErrorKind::NotFound, "source removed"))
            }
        }
    }
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Append-only run log
//!
//! Every significant step of a swap is written as one line prefixed with a
//! local timestamp and a severity tag. The log is injected into the
//! orchestrator so tests can capture it in memory.

use chrono::Local;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Debug,
    Success,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
            Self::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub trait RunLog: fmt::Debug {
    fn record(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.record(Severity::Info, message);
    }

    fn warning(&self, message: &str) {
        self.record(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.record(Severity::Error, message);
    }

    fn debug(&self, message: &str) {
        self.record(Severity::Debug, message);
    }

    fn success(&self, message: &str) {
        self.record(Severity::Success, message);
    }
}

fn format_line(severity: Severity, message: &str) -> String {
    format!(
        "{} [{}] {message}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        severity.tag()
    )
}

fn mirror_to_tracing(severity: Severity, message: &str) {
    match severity {
        Severity::Info | Severity::Success => tracing::info!("{message}"),
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error => tracing::error!("{message}"),
        Severity::Debug => tracing::debug!("{message}"),
    }
}

/// Log file appended to across runs, mirrored to `tracing`
#[derive(Debug)]
pub struct FileLog {
    file: Mutex<File>,
}

impl FileLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl RunLog for FileLog {
    fn record(&self, severity: Severity, message: &str) {
        mirror_to_tracing(severity, message);

        let line = format_line(severity, message);
        let mut file = self.file.lock();
        // A full disk must not abort a swap halfway through
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("Failed to append to run log: {e}");
        }
    }
}

/// In-memory log used by tests
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<(Severity, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(s, line)| *s == severity && line.contains(needle))
    }
}

impl RunLog for MemoryLog {
    fn record(&self, severity: Severity, message: &str) {
        self.lines.lock().push((severity, message.to_string()));
    }
}

//! Per-run execution log.
//!
//! Every accepted webhook run gets `agents/<run_id>/execution.log`, an
//! append-only plain-text log that survives the process. This is separate
//! from the operator-facing `tracing` output: it is the durable record a
//! developer reads after the fact to see what a run did.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct RunLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl RunLogger {
    /// Creates (or appends to) `<root>/<run_id>/execution.log`.
    pub fn new(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run directory {}", dir.display()))?;
        let path = dir.join("execution.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one timestamped line. Logging failures are swallowed: a run
    /// must never die because its log file did.
    pub fn log(&self, level: Level, message: &str) {
        let line = format!("{} [{}] {}\n", format_timestamp(), level, message);
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

fn format_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

//! Per-experiment append-only log (`results.log`).
//!
//! Lines are mirrored to `tracing`. A log claims its experiment directory
//! for as long as it is alive, so two live models in one process can never
//! write to the same experiment.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;

use crate::{Error, Result};

/// File name of the experiment log.
pub const RESULTS_LOG_FILE: &str = "results.log";

fn claimed_directories() -> &'static Mutex<HashSet<PathBuf>> {
    static CLAIMED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    CLAIMED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Progress and results
    Info,
    /// Best-effort operation failed
    Warning,
    /// Persistence fault that was swallowed
    Error,
}

impl Level {
    /// Name written into the log line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Append-only writer for `results.log`.
#[derive(Debug)]
pub struct ResultsLog {
    path: PathBuf,
    claim: PathBuf,
    file: Mutex<File>,
}

impl ResultsLog {
    /// Open (or create) `results.log` inside `directory` and claim it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be opened or another
    /// live log in this process already owns the directory.
    pub fn open(directory: &Path) -> Result<Self> {
        Self::open_unclaimed(directory)?.ok_or_else(|| {
            Error::storage(directory, "experiment directory is already owned by a live model")
        })
    }

    /// Like [`open`](Self::open), but returns `None` instead of failing when
    /// another live log owns the directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the file cannot be opened.
    pub fn open_unclaimed(directory: &Path) -> Result<Option<Self>> {
        let claim = directory
            .canonicalize()
            .map_err(|e| Error::storage(directory, e))?;
        {
            let mut claimed = claimed_directories()
                .lock()
                .map_err(|_| Error::Other("experiment claim registry poisoned".to_string()))?;
            if !claimed.insert(claim.clone()) {
                return Ok(None);
            }
        }

        let path = directory.join(RESULTS_LOG_FILE);
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                release(&claim);
                return Err(Error::storage(&path, e));
            }
        };
        Ok(Some(Self {
            path,
            claim,
            file: Mutex::new(file),
        }))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an INFO line.
    pub fn info(&self, message: &str) {
        tracing::info!("{message}");
        self.append(Level::Info, message);
    }

    /// Append a WARNING line.
    pub fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        self.append(Level::Warning, message);
    }

    /// Append an ERROR line.
    pub fn error(&self, message: &str) {
        tracing::error!("{message}");
        self.append(Level::Error, message);
    }

    /// Write one line. A failing log write is reported through `tracing`
    /// and otherwise ignored, like any logging handler.
    fn append(&self, level: Level, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        let Ok(mut file) = self.file.lock() else {
            tracing::warn!("results log lock poisoned, dropping line");
            return;
        };
        if let Err(e) = writeln!(file, "{stamp} {} {message}", level.as_str()) {
            tracing::warn!("cannot append to '{}': {e}", self.path.display());
        }
    }
}

impl Drop for ResultsLog {
    fn drop(&mut self) {
        release(&self.claim);
    }
}

fn release(claim: &Path) {
    if let Ok(mut claimed) = claimed_directories().lock() {
        claimed.remove(claim);
    }
}

//! Experiment directory resolution.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

use crate::config::ExperimentConfig;
use crate::{Error, Result};

/// Minute-resolution timestamp format used for experiment names.
pub const EXPERIMENT_NAME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A directory holding one experiment's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentDirectory {
    path: PathBuf,
}

impl ExperimentDirectory {
    /// Resolve the experiment directory.
    ///
    /// With `explicit` set, the directory is reopened and must already exist.
    /// Otherwise a new directory named after the current local minute (plus
    /// the host tag, if any) is created under `config.root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the reopened directory is missing or
    /// the new one cannot be created.
    pub fn resolve(explicit: Option<&Path>, config: &ExperimentConfig) -> Result<Self> {
        match explicit {
            Some(path) => Self::open(path),
            None => Self::create_named(config, &Local::now()),
        }
    }

    /// Reopen an existing experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if `path` is not a directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(Error::storage(path, "experiment directory does not exist"));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Create (or reuse) the directory for an experiment started at `now`.
    ///
    /// Creation is idempotent: resolving the same minute twice yields the
    /// same, already existing, directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the directory cannot be created.
    pub fn create_named<Tz>(config: &ExperimentConfig, now: &DateTime<Tz>) -> Result<Self>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let name = experiment_name(now, config.host_tag());
        let path = config.root.join(name);
        fs::create_dir_all(&path).map_err(|e| Error::storage(&path, e))?;
        tracing::info!("Experiment directory: '{}'", path.display());
        Ok(Self { path })
    }

    /// Create (or reuse) the sibling `"<name> (n)"` of this directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFault`] if the directory cannot be created.
    pub fn sibling(&self, n: usize) -> Result<Self> {
        let mut name = self.path.file_name().map(OsStr::to_os_string).unwrap_or_default();
        name.push(format!(" ({n})"));
        let path = self.path.with_file_name(name);
        fs::create_dir_all(&path).map_err(|e| Error::storage(&path, e))?;
        tracing::info!("Experiment directory: '{}'", path.display());
        Ok(Self { path })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `file` inside the experiment.
    #[must_use]
    pub fn join(&self, file: &str) -> PathBuf {
        self.path.join(file)
    }
}

/// Experiment name for `now`, optionally suffixed with a deployment tag.
#[must_use]
pub fn experiment_name<Tz>(now: &DateTime<Tz>, host_tag: Option<&str>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let stamp = now.format(EXPERIMENT_NAME_FORMAT).to_string();
    match host_tag {
        Some(tag) => format!("{stamp} {tag}"),
        None => stamp,
    }
}

/// HPC checkpoints: numbered `hpc_ckpt_<n>.ckpt` files written before a job
/// is preempted, and picked up again when the requeued job starts.
use crate::logger::{ExperimentLogger, LoggerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const HPC_PREFIX: &str = "hpc_ckpt_";
const HPC_SUFFIX: &str = ".ckpt";

/// Position of the training loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub epoch: u64,
    pub global_step: u64,
}

/// Contents of an HPC checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpcCheckpoint {
    pub progress: Progress,
    pub saved_at: DateTime<Utc>,
    pub logger_name: Option<String>,
    pub logger_version: Option<u32>,
}

/// Errors that can occur while saving or restoring checkpoints.
#[derive(Debug)]
pub enum CheckpointError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    Logger(LoggerError),
    /// No checkpoint number is left after the highest one in `folder`.
    VersionOverflow {
        folder: PathBuf,
    },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io { path, source } => {
                write!(f, "checkpoint I/O error at {}: {}", path.display(), source)
            }
            CheckpointError::Serialize { path, source } => {
                write!(f, "malformed checkpoint {}: {}", path.display(), source)
            }
            CheckpointError::Logger(e) => write!(f, "failed to save logger state: {e}"),
            CheckpointError::VersionOverflow { folder } => {
                write!(f, "no hpc checkpoint number left in {}", folder.display())
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Serialize { source, .. } => Some(source),
            CheckpointError::Logger(e) => Some(e),
            CheckpointError::VersionOverflow { .. } => None,
        }
    }
}

impl From<LoggerError> for CheckpointError {
    fn from(e: LoggerError) -> Self {
        CheckpointError::Logger(e)
    }
}

/// Save an HPC checkpoint into `folder` and return its path.
///
/// The file is numbered one past the highest existing HPC checkpoint so an
/// earlier checkpoint is never overwritten. If another writer claims that
/// number first, the next free one is used. The logger, if any, is saved
/// first so its state matches the checkpoint.
pub fn hpc_save(
    folder: &Path,
    progress: Progress,
    logger: Option<&dyn ExperimentLogger>,
) -> Result<PathBuf, CheckpointError> {
    std::fs::create_dir_all(folder).map_err(|source| CheckpointError::Io {
        path: folder.to_path_buf(),
        source,
    })?;

    if let Some(logger) = logger {
        logger.save()?;
    }

    let checkpoint = HpcCheckpoint {
        progress,
        saved_at: Utc::now(),
        logger_name: logger.map(|l| l.name().to_string()),
        logger_version: logger.map(|l| l.version()),
    };
    let json = serde_json::to_vec_pretty(&checkpoint).map_err(|source| {
        CheckpointError::Serialize {
            path: folder.to_path_buf(),
            source,
        }
    })?;

    let mut version = match max_ckpt_version_in_folder(folder)? {
        Some(v) => next_version(folder, v)?,
        None => 1,
    };
    let path = loop {
        let path = folder.join(format!("{HPC_PREFIX}{version}{HPC_SUFFIX}"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(&json).map_err(|source| CheckpointError::Io {
                    path: path.clone(),
                    source,
                })?;
                break path;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "hpc checkpoint number taken, trying the next");
                version = next_version(folder, version)?;
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        }
    };

    tracing::info!(
        path = %path.display(),
        epoch = progress.epoch,
        global_step = progress.global_step,
        "saved hpc checkpoint"
    );
    Ok(path)
}

fn next_version(folder: &Path, version: u64) -> Result<u64, CheckpointError> {
    version
        .checked_add(1)
        .ok_or_else(|| CheckpointError::VersionOverflow {
            folder: folder.to_path_buf(),
        })
}

/// Highest `n` among `hpc_ckpt_<n>.ckpt` files in `folder`.
///
/// A missing folder has no checkpoints.
pub fn max_ckpt_version_in_folder(folder: &Path) -> Result<Option<u64>, CheckpointError> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckpointError::Io {
                path: folder.to_path_buf(),
                source,
            })
        }
    };
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| parse_version(&entry.file_name().to_string_lossy()))
        .max())
}

/// Path of the most recent HPC checkpoint, if one exists.
pub fn hpc_resume_path(folder: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    Ok(max_ckpt_version_in_folder(folder)?
        .map(|v| folder.join(format!("{HPC_PREFIX}{v}{HPC_SUFFIX}"))))
}

/// Load a checkpoint written by [`hpc_save`].
pub fn restore(path: &Path) -> Result<HpcCheckpoint, CheckpointError> {
    let bytes = std::fs::read(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Serialize {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_version(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(HPC_PREFIX)?
        .strip_suffix(HPC_SUFFIX)?
        .parse()
        .ok()
}

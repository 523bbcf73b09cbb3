/// Experiment loggers: record run metadata and close the record cleanly
/// when a run ends or is torn down by the scheduler.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Errors produced by logger operations.
#[derive(Debug)]
pub enum LoggerError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(serde_json::Error),
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::Io { path, source } => {
                write!(f, "logger I/O error at {}: {}", path.display(), source)
            }
            LoggerError::Serialize(e) => write!(f, "failed to serialize experiment: {e}"),
        }
    }
}

impl std::error::Error for LoggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggerError::Io { source, .. } => Some(source),
            LoggerError::Serialize(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for LoggerError {
    fn from(e: serde_json::Error) -> Self {
        LoggerError::Serialize(e)
    }
}

/// An experiment tracker attached to a training session.
pub trait ExperimentLogger: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    /// Flush pending state to storage.
    fn save(&self) -> Result<(), LoggerError>;

    /// Close the experiment with a final status such as `"finished"`.
    ///
    /// The first final status sticks; later calls leave the record alone.
    fn finalize(&self, status: &str) -> Result<(), LoggerError>;
}

/// On-disk record kept by [`JsonLogger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub name: String,
    pub version: u32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// Writes `<save_dir>/<name>/version_<n>/experiment.json`.
#[derive(Debug)]
pub struct JsonLogger {
    name: String,
    dir: PathBuf,
    record: Mutex<ExperimentRecord>,
}

impl JsonLogger {
    const FILE_NAME: &'static str = "experiment.json";

    /// Create a logger using the next free version under `save_dir/name`.
    pub fn create(save_dir: &Path, name: &str) -> Result<Self, LoggerError> {
        let base = save_dir.join(name);
        let version = next_version(&base)?;
        let dir = base.join(format!("version_{version}"));
        std::fs::create_dir_all(&dir).map_err(|source| LoggerError::Io {
            path: dir.clone(),
            source,
        })?;

        let now = Utc::now();
        let logger = Self {
            name: name.to_string(),
            dir,
            record: Mutex::new(ExperimentRecord {
                name: name.to_string(),
                version,
                status: "running".to_string(),
                started_at: now,
                updated_at: now,
                finalized_at: None,
            }),
        };
        logger.save()?;
        tracing::info!(experiment = name, version, dir = %logger.dir.display(), "experiment logger created");
        Ok(logger)
    }

    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    pub fn record(&self) -> ExperimentRecord {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExperimentRecord> {
        // A poisoned record is still a valid record.
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, record: &ExperimentRecord) -> Result<(), LoggerError> {
        let path = self.record_path();
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json).map_err(|source| LoggerError::Io { path, source })
    }
}

impl ExperimentLogger for JsonLogger {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.lock().version
    }

    fn save(&self) -> Result<(), LoggerError> {
        let mut record = self.lock();
        record.updated_at = Utc::now();
        self.write(&record)
    }

    fn finalize(&self, status: &str) -> Result<(), LoggerError> {
        let mut record = self.lock();
        if record.finalized_at.is_some() {
            tracing::debug!(
                status,
                kept = %record.status,
                "experiment already finalized, keeping first status"
            );
            return Ok(());
        }
        let now = Utc::now();
        record.status = status.to_string();
        record.updated_at = now;
        record.finalized_at = Some(now);
        self.write(&record)?;
        tracing::info!(status, version = record.version, "experiment finalized");
        Ok(())
    }
}

/// One past the highest existing `version_<n>` directory, or 0.
fn next_version(base: &Path) -> Result<u32, LoggerError> {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(LoggerError::Io {
                path: base.to_path_buf(),
                source,
            })
        }
    };
    let max = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("version_"))
                .and_then(|v| v.parse::<u32>().ok())
        })
        .max();
    Ok(max.map_or(0, |v| v + 1))
}

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from trainer.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct TrainerConfig {
    pub trainer: RunConfig,
    pub cluster: ClusterConfig,
    pub requeue: RequeueConfig,
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_steps: u64,
    pub steps_per_epoch: u64,
    pub step_interval_ms: u64,
    pub fault_tolerant: bool,
    pub weights_save_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub auto_requeue: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// Argument vector prefix; the job id is appended as the last argument.
    pub command: Vec<String>,
    pub job_id_var: String,
    pub shell: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub enabled: bool,
    pub save_dir: PathBuf,
    pub name: String,
}

/// Errors that can occur while loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl TrainerConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: the defaults are returned instead.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

impl RequeueConfig {
    /// Full argument vector for requeueing `job_id`.
    pub fn argv(&self, job_id: &str) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push(job_id.to_string());
        argv
    }
}

// --- Default implementations ---

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            steps_per_epoch: 100,
            step_interval_ms: 100,
            fault_tolerant: false,
            weights_save_path: PathBuf::from("checkpoints"),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { auto_requeue: true }
    }
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            command: vec!["scontrol".to_string(), "requeue".to_string()],
            job_id_var: "SLURM_JOB_ID".to_string(),
            shell: "sh".to_string(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save_dir: PathBuf::from("training_logs"),
            name: "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainerConfig::default();
        assert!(!config.trainer.fault_tolerant);
        assert!(config.cluster.auto_requeue);
        assert_eq!(config.requeue.job_id_var, "SLURM_JOB_ID");
        assert_eq!(config.requeue.command, vec!["scontrol", "requeue"]);
        assert_eq!(config.trainer.weights_save_path, PathBuf::from("checkpoints"));
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = TrainerConfig::parse(
            r#"
            [trainer]
            fault_tolerant = true
            max_steps = 5

            [requeue]
            job_id_var = "MY_JOB"
            "#,
        )
        .unwrap();
        assert!(config.trainer.fault_tolerant);
        assert_eq!(config.trainer.max_steps, 5);
        assert_eq!(config.trainer.step_interval_ms, 100);
        assert_eq!(config.requeue.job_id_var, "MY_JOB");
        assert_eq!(config.requeue.shell, "sh");
        assert!(config.logger.enabled);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(TrainerConfig::parse("[trainer]\nmax_steps = \"many\"\n").is_err());
    }

    #[test]
    fn test_argv_appends_job_id() {
        let requeue = RequeueConfig::default();
        assert_eq!(requeue.argv("12345"), vec!["scontrol", "requeue", "12345"]);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.trainer.max_steps, 1000);
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.toml");
        std::fs::write(&path, "[cluster\n").unwrap();
        let err = TrainerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("trainer.toml"));
    }
}

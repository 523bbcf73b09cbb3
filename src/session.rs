/// Shared state of a single training run: configuration, cluster placement,
/// the attached experiment logger, loop progress and the termination flag.
use crate::checkpoint::{self, CheckpointError, Progress};
use crate::cluster::{self, ClusterEnvironment};
use crate::config::TrainerConfig;
use crate::env::EnvSource;
use crate::logger::{ExperimentLogger, JsonLogger, LoggerError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A training run shared between the training loop and signal handlers.
///
/// The termination flag has exactly one writer that sets it: the
/// fault-tolerant signal handler. The loop only reads it.
///
/// Stopping the run (saving the last checkpoint and closing the experiment)
/// can start from both the loop and a signal handler thread; [`begin_stop`]
/// serializes the two.
///
/// [`begin_stop`]: TrainingSession::begin_stop
#[derive(Debug)]
pub struct TrainingSession {
    config: TrainerConfig,
    cluster: Box<dyn ClusterEnvironment>,
    logger: Option<Arc<dyn ExperimentLogger>>,
    progress: Mutex<Progress>,
    terminate_gracefully: AtomicBool,
    stop_checkpoint: Mutex<Option<(Progress, PathBuf)>>,
}

/// Exclusive access to the stop sequence of a session.
///
/// Held while the last checkpoint is written and the experiment finalized.
pub struct StopGuard<'a> {
    session: &'a TrainingSession,
    last: MutexGuard<'a, Option<(Progress, PathBuf)>>,
}

impl StopGuard<'_> {
    /// Save an HPC checkpoint of the current progress.
    ///
    /// If a stop checkpoint of the same progress was already written, its
    /// path is returned instead of writing a duplicate.
    pub fn checkpoint(&mut self) -> Result<PathBuf, CheckpointError> {
        let progress = self.session.progress();
        if let Some((saved, path)) = self.last.as_ref() {
            if *saved == progress && path.exists() {
                tracing::debug!(
                    path = %path.display(),
                    global_step = progress.global_step,
                    "stop checkpoint already saved"
                );
                return Ok(path.clone());
            }
        }
        let path = checkpoint::hpc_save(
            self.session.weights_save_path(),
            progress,
            self.session.logger(),
        )?;
        *self.last = Some((progress, path.clone()));
        Ok(path)
    }
}

impl TrainingSession {
    pub fn new(
        config: TrainerConfig,
        cluster: Box<dyn ClusterEnvironment>,
        logger: Option<Arc<dyn ExperimentLogger>>,
    ) -> Self {
        Self {
            config,
            cluster,
            logger,
            progress: Mutex::new(Progress::default()),
            terminate_gracefully: AtomicBool::new(false),
            stop_checkpoint: Mutex::new(None),
        }
    }

    /// Detect the cluster from `env` and create the configured logger.
    ///
    /// Only global rank zero writes experiment records.
    pub fn from_config(config: TrainerConfig, env: &dyn EnvSource) -> Result<Self, LoggerError> {
        let cluster = cluster::detect_environment(env, &config.cluster);
        let logger: Option<Arc<dyn ExperimentLogger>> =
            if config.logger.enabled && cluster.global_rank() == 0 {
                Some(Arc::new(JsonLogger::create(
                    &config.logger.save_dir,
                    &config.logger.name,
                )?))
            } else {
                None
            };
        Ok(Self::new(config, cluster, logger))
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn cluster_environment(&self) -> &dyn ClusterEnvironment {
        self.cluster.as_ref()
    }

    pub fn global_rank(&self) -> usize {
        self.cluster.global_rank()
    }

    pub fn is_global_zero(&self) -> bool {
        self.global_rank() == 0
    }

    pub fn weights_save_path(&self) -> &Path {
        &self.config.trainer.weights_save_path
    }

    pub fn logger(&self) -> Option<&dyn ExperimentLogger> {
        self.logger.as_deref()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_progress(&self, progress: Progress) {
        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = progress;
    }

    /// Save an HPC checkpoint of the current progress into `folder`.
    pub fn hpc_save(
        &self,
        folder: &Path,
        logger: Option<&dyn ExperimentLogger>,
    ) -> Result<PathBuf, CheckpointError> {
        checkpoint::hpc_save(folder, self.progress(), logger)
    }

    /// Take the stop sequence, waiting while another thread holds it.
    pub fn begin_stop(&self) -> StopGuard<'_> {
        StopGuard {
            session: self,
            last: self
                .stop_checkpoint
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Whether the loop has been asked to stop at the next safe point.
    pub fn terminate_gracefully(&self) -> bool {
        self.terminate_gracefully.load(Ordering::Acquire)
    }

    pub(crate) fn reset_termination(&self) {
        self.terminate_gracefully.store(false, Ordering::Release);
    }

    pub(crate) fn request_termination(&self) {
        self.terminate_gracefully.store(true, Ordering::Release);
    }
}

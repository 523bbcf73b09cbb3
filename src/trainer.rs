/// The training loop: resume from the latest HPC checkpoint, run steps,
/// and stop cooperatively when the termination flag is raised.
use crate::checkpoint::{self, CheckpointError, Progress};
use crate::logger::LoggerError;
use crate::session::TrainingSession;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// How a call to [`fit`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitOutcome {
    /// Ran until `max_steps`.
    Completed { progress: Progress },
    /// Stopped early on request; `checkpoint` is set on global rank zero.
    Interrupted {
        progress: Progress,
        checkpoint: Option<PathBuf>,
    },
}

#[derive(Debug)]
pub enum FitError {
    Checkpoint(CheckpointError),
    Logger(LoggerError),
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitError::Checkpoint(e) => write!(f, "{e}"),
            FitError::Logger(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FitError::Checkpoint(e) => Some(e),
            FitError::Logger(e) => Some(e),
        }
    }
}

impl From<CheckpointError> for FitError {
    fn from(e: CheckpointError) -> Self {
        FitError::Checkpoint(e)
    }
}

impl From<LoggerError> for FitError {
    fn from(e: LoggerError) -> Self {
        FitError::Logger(e)
    }
}

/// Restore progress from the latest HPC checkpoint in the weights path.
///
/// Returns the checkpoint that was loaded, if any.
pub fn resume(session: &TrainingSession) -> Result<Option<PathBuf>, CheckpointError> {
    let Some(path) = checkpoint::hpc_resume_path(session.weights_save_path())? else {
        return Ok(None);
    };
    let restored = checkpoint::restore(&path)?;
    session.set_progress(restored.progress);
    info!(
        path = %path.display(),
        epoch = restored.progress.epoch,
        global_step = restored.progress.global_step,
        "resumed from hpc checkpoint"
    );
    Ok(Some(path))
}

/// Run the training loop until `max_steps` or until termination is requested.
pub fn fit(session: &TrainingSession) -> Result<FitOutcome, FitError> {
    resume(session)?;

    let run = &session.config().trainer;
    let interval = Duration::from_millis(run.step_interval_ms);
    let steps_per_epoch = run.steps_per_epoch.max(1);
    let mut progress = session.progress();

    while progress.global_step < run.max_steps {
        if session.terminate_gracefully() {
            info!(
                global_step = progress.global_step,
                "termination requested, stopping at step boundary"
            );
            let mut stop = session.begin_stop();
            let checkpoint = if session.is_global_zero() {
                Some(stop.checkpoint()?)
            } else {
                None
            };
            if let Some(logger) = session.logger() {
                logger.finalize("interrupted")?;
            }
            drop(stop);
            return Ok(FitOutcome::Interrupted {
                progress,
                checkpoint,
            });
        }

        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
        progress.global_step += 1;
        progress.epoch = progress.global_step / steps_per_epoch;
        session.set_progress(progress);
        debug!(epoch = progress.epoch, global_step = progress.global_step, "step");
    }

    info!(global_step = progress.global_step, "training complete");
    if let Some(logger) = session.logger() {
        logger.finalize("success")?;
    }
    Ok(FitOutcome::Completed { progress })
}

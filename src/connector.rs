/// Signal connector: wires SIGUSR1/SIGTERM handlers for SLURM
/// checkpoint-and-requeue and for fault-tolerant graceful termination.
use crate::cluster::ClusterKind;
use crate::env::{self, EnvSource, ProcessEnv};
use crate::platform;
use crate::requeue::{self, CommandRunner, SystemRunner};
use crate::session::TrainingSession;
use crate::signals::{
    HandlerError, HandlersCompose, OsSignalRegistry, SignalFrame, SignalHandler, SignalRegistry,
};
use nix::sys::signal::Signal;
use std::sync::Arc;
use tracing::{debug, info, warn};

type HandlerFn = fn(&SignalConnector, Signal, &SignalFrame) -> Result<(), HandlerError>;

/// Installs the signal handlers a training run needs and implements them.
#[derive(Clone)]
pub struct SignalConnector {
    session: Arc<TrainingSession>,
    registry: Arc<dyn SignalRegistry>,
    runner: Arc<dyn CommandRunner>,
    env: Arc<dyn EnvSource>,
}

impl SignalConnector {
    /// Create a connector for `session` and clear its termination flag.
    pub fn new(session: Arc<TrainingSession>) -> Self {
        session.reset_termination();
        let runner = SystemRunner::new(session.config().requeue.shell.clone());
        Self {
            session,
            registry: Arc::new(OsSignalRegistry),
            runner: Arc::new(runner),
            env: Arc::new(ProcessEnv),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn SignalRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn session(&self) -> &Arc<TrainingSession> {
        &self.session
    }

    /// Install handlers for SIGUSR1 and SIGTERM as the run configuration
    /// requires.
    ///
    /// A signal is left alone when no handler is needed for it, when a
    /// handler is already installed, on Windows, and when called off the
    /// main thread. None of these are errors.
    pub fn register_signal_handlers(&self) {
        let mut sigusr1_handlers: Vec<SignalHandler> = Vec::new();
        let mut sigterm_handlers: Vec<SignalHandler> = Vec::new();

        if self.fault_tolerant_enabled() {
            sigusr1_handlers.push(self.handler(Self::fault_tolerant_sigusr1_handler_fn));
        }

        let environment = self.session.cluster_environment();
        if environment.kind() == ClusterKind::Slurm && environment.auto_requeue() {
            info!("SLURM auto-requeueing enabled. Setting signal handlers.");
            sigusr1_handlers.push(self.handler(Self::slurm_sigusr1_handler_fn));
            sigterm_handlers.push(self.handler(Self::sigterm_handler_fn));
        }

        // SIGUSR1 does not exist on Windows.
        if platform::is_on_windows() {
            return;
        }

        self.register_if_free(Signal::SIGUSR1, sigusr1_handlers);
        self.register_if_free(Signal::SIGTERM, sigterm_handlers);
    }

    /// Save a checkpoint and ask the scheduler to requeue this job.
    ///
    /// Only global rank zero acts; other ranks return immediately.
    pub fn slurm_sigusr1_handler_fn(
        &self,
        _signal: Signal,
        _frame: &SignalFrame,
    ) -> Result<(), HandlerError> {
        if !self.session.is_global_zero() {
            return Ok(());
        }

        info!("handling SIGUSR1");
        // Held until the experiment is finalized so a stopping loop waits.
        let mut stop = self.session.begin_stop();
        stop.checkpoint()?;

        let requeue_config = &self.session.config().requeue;
        let job_id = self
            .env
            .var(&requeue_config.job_id_var)
            .ok_or_else(|| HandlerError::MissingJobId {
                var: requeue_config.job_id_var.clone(),
            })?;
        let argv = requeue_config.argv(&job_id);

        info!("requeuing job {job_id}...");
        let exit_code = requeue::run_requeue(self.runner.as_ref(), &argv)
            .map_err(|source| HandlerError::Requeue { source })?;

        if exit_code == 0 {
            info!("requeued exp {job_id}");
        } else {
            warn!(exit_code, job_id = %job_id, "requeue failed...");
        }

        // Close the experiment before the scheduler tears the process down.
        if let Some(logger) = self.session.logger() {
            logger.finalize("finished")?;
        }
        drop(stop);
        Ok(())
    }

    /// Ask the training loop to stop at its next safe point.
    pub fn fault_tolerant_sigusr1_handler_fn(
        &self,
        _signal: Signal,
        _frame: &SignalFrame,
    ) -> Result<(), HandlerError> {
        self.session.request_termination();
        Ok(())
    }

    /// Swallow SIGTERM so the requeue flow can finish.
    pub fn sigterm_handler_fn(
        &self,
        _signal: Signal,
        _frame: &SignalFrame,
    ) -> Result<(), HandlerError> {
        info!("bypassing sigterm");
        Ok(())
    }

    fn fault_tolerant_enabled(&self) -> bool {
        self.session.config().trainer.fault_tolerant
            || env::fault_tolerant_training(self.env.as_ref())
    }

    fn handler(&self, f: HandlerFn) -> SignalHandler {
        let this = self.clone();
        Arc::new(move |signal: Signal, frame: &SignalFrame| f(&this, signal, frame))
    }

    fn register_if_free(&self, signal: Signal, handlers: Vec<SignalHandler>) {
        if handlers.is_empty() {
            return;
        }
        if self.registry.has_handler(signal) {
            debug!(signal = signal.as_str(), "handler already installed, leaving it in place");
            return;
        }
        self.register_signal(signal, HandlersCompose::new(handlers));
    }

    fn register_signal(&self, signal: Signal, handlers: HandlersCompose) {
        if !self.registry.on_main_thread() {
            debug!(signal = signal.as_str(), "not on the main thread, skipping registration");
            return;
        }
        if let Err(e) = self.registry.install(signal, handlers) {
            warn!(signal = signal.as_str(), error = %e, "failed to install signal handler");
        }
    }
}

impl std::fmt::Debug for SignalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalConnector")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

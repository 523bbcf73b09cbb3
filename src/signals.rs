/// Composed signal handlers and their installation into the OS signal table.
///
/// The OS-level trap only records that a signal arrived. A dispatcher thread
/// per installed signal then runs the composed handler, so handlers are free
/// to do I/O, spawn processes and log.
use crate::checkpoint::CheckpointError;
use crate::logger::LoggerError;
use crate::platform;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use std::io;
use std::sync::Arc;

/// Context of a delivered signal, passed to every handler in a composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFrame {
    pub signal: Signal,
    pub received_at: DateTime<Utc>,
    /// Name of the thread the handler runs on.
    pub thread: Option<String>,
}

impl SignalFrame {
    pub fn capture(signal: Signal) -> Self {
        Self {
            signal,
            received_at: Utc::now(),
            thread: std::thread::current().name().map(str::to_string),
        }
    }
}

/// Errors raised by signal handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// Saving the preemption checkpoint failed.
    Checkpoint(CheckpointError),
    /// The scheduler job id variable is not set.
    MissingJobId { var: String },
    /// The requeue command could not be run.
    Requeue { source: io::Error },
    /// Finalizing the experiment logger failed.
    Logger(LoggerError),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Checkpoint(e) => write!(f, "failed to save hpc checkpoint: {e}"),
            HandlerError::MissingJobId { var } => {
                write!(f, "environment variable {var} is not set, cannot requeue")
            }
            HandlerError::Requeue { source } => {
                write!(f, "failed to run requeue command: {source}")
            }
            HandlerError::Logger(e) => write!(f, "failed to finalize logger: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Checkpoint(e) => Some(e),
            HandlerError::MissingJobId { .. } => None,
            HandlerError::Requeue { source } => Some(source),
            HandlerError::Logger(e) => Some(e),
        }
    }
}

impl From<CheckpointError> for HandlerError {
    fn from(e: CheckpointError) -> Self {
        HandlerError::Checkpoint(e)
    }
}

impl From<LoggerError> for HandlerError {
    fn from(e: LoggerError) -> Self {
        HandlerError::Logger(e)
    }
}

/// A single signal callback.
pub type SignalHandler = Arc<dyn Fn(Signal, &SignalFrame) -> Result<(), HandlerError> + Send + Sync>;

/// An ordered list of handlers invoked as one.
///
/// Handlers run in the order given. The first failing handler stops the
/// sequence and its error is returned; later handlers do not run.
#[derive(Clone, Default)]
pub struct HandlersCompose {
    handlers: Vec<SignalHandler>,
}

impl HandlersCompose {
    pub fn new(handlers: Vec<SignalHandler>) -> Self {
        Self { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn call(&self, signal: Signal, frame: &SignalFrame) -> Result<(), HandlerError> {
        for handler in &self.handlers {
            handler(signal, frame)?;
        }
        Ok(())
    }
}

impl From<SignalHandler> for HandlersCompose {
    fn from(handler: SignalHandler) -> Self {
        Self::new(vec![handler])
    }
}

impl std::fmt::Debug for HandlersCompose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlersCompose")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Access to the process signal table.
pub trait SignalRegistry: Send + Sync {
    /// Whether a handler is already installed for `signal`.
    fn has_handler(&self, signal: Signal) -> bool;

    /// Install `handlers` for `signal`.
    fn install(&self, signal: Signal, handlers: HandlersCompose) -> io::Result<()>;

    /// Whether installation is allowed from the calling thread.
    fn on_main_thread(&self) -> bool {
        platform::is_main_thread()
    }
}

/// The real OS signal table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignalRegistry;

impl SignalRegistry for OsSignalRegistry {
    fn has_handler(&self, signal: Signal) -> bool {
        platform::has_os_handler(signal)
    }

    fn install(&self, signal: Signal, handlers: HandlersCompose) -> io::Result<()> {
        let mut signals = signal_hook::iterator::Signals::new([signal as libc::c_int])?;
        std::thread::Builder::new()
            .name(format!("{}-dispatch", signal.as_str().to_lowercase()))
            .spawn(move || {
                for raw in signals.forever() {
                    let Ok(signal) = Signal::try_from(raw) else {
                        continue;
                    };
                    let frame = SignalFrame::capture(signal);
                    if let Err(e) = handlers.call(signal, &frame) {
                        tracing::error!(signal = signal.as_str(), error = %e, "signal handler failed");
                        std::process::exit(1);
                    }
                }
            })?;
        tracing::debug!(signal = signal.as_str(), "signal handler installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<(String, Signal)>>>, name: &str) -> SignalHandler {
        let log = Arc::clone(log);
        let name = name.to_string();
        Arc::new(move |signal: Signal, _frame: &SignalFrame| {
            log.lock().unwrap().push((name.clone(), signal));
            Ok(())
        })
    }

    #[test]
    fn test_compose_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let compose = HandlersCompose::new(vec![
            recording(&log, "a"),
            recording(&log, "b"),
            recording(&log, "c"),
        ]);
        let frame = SignalFrame::capture(Signal::SIGUSR1);
        compose.call(Signal::SIGUSR1, &frame).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a".to_string(), Signal::SIGUSR1),
                ("b".to_string(), Signal::SIGUSR1),
                ("c".to_string(), Signal::SIGUSR1),
            ]
        );
    }

    #[test]
    fn test_compose_forwards_same_frame() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = |seen: &Arc<Mutex<Vec<SignalFrame>>>| -> SignalHandler {
            let seen = Arc::clone(seen);
            Arc::new(move |_signal: Signal, frame: &SignalFrame| {
                seen.lock().unwrap().push(frame.clone());
                Ok(())
            })
        };
        let compose = HandlersCompose::new(vec![handler(&seen), handler(&seen)]);
        let frame = SignalFrame::capture(Signal::SIGTERM);
        compose.call(Signal::SIGTERM, &frame).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|f| *f == frame));
    }

    #[test]
    fn test_single_handler_wraps_as_one_element() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let compose = HandlersCompose::from(recording(&log, "only"));
        assert_eq!(compose.len(), 1);
        compose
            .call(Signal::SIGUSR1, &SignalFrame::capture(Signal::SIGUSR1))
            .unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_handler_aborts_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: SignalHandler = Arc::new(|_signal: Signal, _frame: &SignalFrame| {
            Err(HandlerError::MissingJobId {
                var: "SLURM_JOB_ID".to_string(),
            })
        });
        let compose = HandlersCompose::new(vec![
            recording(&log, "a"),
            failing,
            recording(&log, "c"),
        ]);
        let err = compose
            .call(Signal::SIGUSR1, &SignalFrame::capture(Signal::SIGUSR1))
            .unwrap_err();

        assert!(matches!(err, HandlerError::MissingJobId { .. }));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_compose_is_a_no_op() {
        let compose = HandlersCompose::default();
        assert!(compose.is_empty());
        assert!(compose
            .call(Signal::SIGTERM, &SignalFrame::capture(Signal::SIGTERM))
            .is_ok());
    }
}

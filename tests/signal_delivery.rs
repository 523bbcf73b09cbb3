//! End-to-end signal delivery.
//!
//! Runs without the libtest harness so that `main` executes on the process's
//! main thread, where handler installation is allowed.

use nix::sys::signal::{raise, Signal};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trainer_signals::checkpoint;
use trainer_signals::cluster::SlurmEnvironment;
use trainer_signals::config::TrainerConfig;
use trainer_signals::platform;
use trainer_signals::requeue::CommandRunner;
use trainer_signals::{SignalConnector, TrainingSession};

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommandRunner for RecordingRunner {
    fn call(&self, argv: &[String]) -> io::Result<i32> {
        self.calls.lock().unwrap().push(argv.to_vec());
        Ok(0)
    }

    fn call_shell(&self, command: &str) -> io::Result<i32> {
        self.calls.lock().unwrap().push(vec![command.to_string()]);
        Ok(0)
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn main() {
    assert!(platform::is_main_thread());

    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("weights");

    // Someone else already owns SIGTERM; it must stay theirs.
    let sigterm_seen = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&sigterm_seen)).unwrap();
    assert!(platform::has_os_handler(Signal::SIGTERM));
    assert!(!platform::has_os_handler(Signal::SIGUSR1));

    let mut config = TrainerConfig::default();
    config.trainer.fault_tolerant = true;
    config.trainer.weights_save_path = weights.clone();
    let session = Arc::new(TrainingSession::new(
        config,
        Box::new(SlurmEnvironment::new(true, 0, Some("4242".to_string()))),
        None,
    ));

    let runner = Arc::new(RecordingRunner::default());
    let env: HashMap<String, String> = [("SLURM_JOB_ID".to_string(), "4242".to_string())]
        .into_iter()
        .collect();
    let connector = SignalConnector::new(Arc::clone(&session))
        .with_runner(runner.clone())
        .with_env(Arc::new(env));

    connector.register_signal_handlers();
    assert!(platform::has_os_handler(Signal::SIGUSR1));

    // A second registration finds SIGUSR1 taken and leaves it alone.
    connector.register_signal_handlers();

    raise(Signal::SIGUSR1).unwrap();
    wait_until("SIGUSR1 handlers", || {
        session.terminate_gracefully() && runner.count() >= 1
    });
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(runner.count(), 1, "SIGUSR1 handlers ran more than once");
    assert_eq!(
        runner.calls.lock().unwrap()[0],
        vec!["scontrol", "requeue", "4242"]
    );
    assert!(checkpoint::hpc_resume_path(&weights).unwrap().is_some());

    // SIGTERM reaches the pre-existing handler and the process survives.
    raise(Signal::SIGTERM).unwrap();
    wait_until("pre-existing SIGTERM handler", || {
        sigterm_seen.load(Ordering::SeqCst)
    });

    println!("signal_delivery: ok");
}

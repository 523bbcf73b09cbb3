use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trainer_signals::config::TrainerConfig;
use trainer_signals::env::ProcessEnv;
use trainer_signals::trainer::{self, FitOutcome};
use trainer_signals::{SignalConnector, TrainingSession};

/// Run a training loop that checkpoints and requeues itself when the
/// scheduler sends SIGUSR1, and stops cleanly under fault-tolerant training.
#[derive(Parser, Debug)]
#[command(name = "trainer-signals", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "trainer.toml")]
    config: PathBuf,

    /// Override max training steps (default: from config)
    #[arg(long)]
    max_steps: Option<u64>,

    /// Checkpoint directory (overrides config)
    #[arg(short, long)]
    weights_save_path: Option<PathBuf>,

    /// Stop gracefully on SIGUSR1
    #[arg(long)]
    fault_tolerant: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-step progress, registration decisions)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut TrainerConfig) {
        if let Some(max_steps) = self.max_steps {
            config.trainer.max_steps = max_steps;
        }
        if let Some(ref path) = self.weights_save_path {
            config.trainer.weights_save_path = path.clone();
        }
        if self.fault_tolerant {
            config.trainer.fault_tolerant = true;
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match TrainerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        println!("{config:#?}");
        return;
    }

    let session = match TrainingSession::from_config(config, &ProcessEnv) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let connector = SignalConnector::new(Arc::clone(&session));
    connector.register_signal_handlers();

    tracing::info!(
        pid = std::process::id(),
        global_rank = session.global_rank(),
        "trainer-signals starting"
    );

    match trainer::fit(&session) {
        Ok(FitOutcome::Completed { progress }) => {
            tracing::info!(global_step = progress.global_step, "run finished");
        }
        Ok(FitOutcome::Interrupted {
            progress,
            checkpoint,
        }) => {
            tracing::info!(
                global_step = progress.global_step,
                checkpoint = ?checkpoint,
                "run interrupted"
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

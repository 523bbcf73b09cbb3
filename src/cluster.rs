/// Cluster environment detection.
///
/// Decides whether the run is managed by SLURM and which global rank this
/// process holds.
use crate::config::ClusterConfig;
use crate::env::EnvSource;

/// Job names SLURM assigns to interactive allocations, which are not
/// treated as scheduler-managed batch jobs.
const INTERACTIVE_JOB_NAMES: [&str; 2] = ["bash", "interactive"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// Batch job managed by the SLURM scheduler.
    Slurm,
    /// Plain process, no scheduler.
    Local,
}

/// What the signal connector needs to know about where it runs.
pub trait ClusterEnvironment: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ClusterKind;

    /// Whether the scheduler should resubmit the job when it is preempted.
    fn auto_requeue(&self) -> bool;

    fn global_rank(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmEnvironment {
    auto_requeue: bool,
    global_rank: usize,
    job_id: Option<String>,
}

impl SlurmEnvironment {
    pub fn new(auto_requeue: bool, global_rank: usize, job_id: Option<String>) -> Self {
        Self {
            auto_requeue,
            global_rank,
            job_id,
        }
    }

    /// Returns `Some` when the environment describes a SLURM batch job.
    pub fn detect(env: &dyn EnvSource, auto_requeue: bool) -> Option<Self> {
        env.var("SLURM_NTASKS")?;
        if let Some(name) = env.var("SLURM_JOB_NAME") {
            if INTERACTIVE_JOB_NAMES.contains(&name.as_str()) {
                tracing::debug!(job_name = %name, "interactive SLURM allocation, not managing");
                return None;
            }
        }
        Some(Self {
            auto_requeue,
            global_rank: parse_rank(env.var("SLURM_PROCID")),
            job_id: env.var("SLURM_JOB_ID"),
        })
    }

    /// Scheduler job id, if SLURM exported one.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
}

impl ClusterEnvironment for SlurmEnvironment {
    fn kind(&self) -> ClusterKind {
        ClusterKind::Slurm
    }

    fn auto_requeue(&self) -> bool {
        self.auto_requeue
    }

    fn global_rank(&self) -> usize {
        self.global_rank
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalEnvironment {
    global_rank: usize,
}

impl LocalEnvironment {
    pub fn new(global_rank: usize) -> Self {
        Self { global_rank }
    }

    pub fn detect(env: &dyn EnvSource) -> Self {
        Self {
            global_rank: parse_rank(env.var("RANK")),
        }
    }
}

impl ClusterEnvironment for LocalEnvironment {
    fn kind(&self) -> ClusterKind {
        ClusterKind::Local
    }

    fn auto_requeue(&self) -> bool {
        false
    }

    fn global_rank(&self) -> usize {
        self.global_rank
    }
}

/// Pick the cluster environment for this process.
pub fn detect_environment(
    env: &dyn EnvSource,
    config: &ClusterConfig,
) -> Box<dyn ClusterEnvironment> {
    match SlurmEnvironment::detect(env, config.auto_requeue) {
        Some(slurm) => {
            tracing::info!(
                global_rank = slurm.global_rank,
                job_id = slurm.job_id().unwrap_or("-"),
                auto_requeue = slurm.auto_requeue,
                "detected SLURM environment"
            );
            Box::new(slurm)
        }
        None => Box::new(LocalEnvironment::detect(env)),
    }
}

fn parse_rank(value: Option<String>) -> usize {
    match value {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(value = %v, "unparseable rank, assuming 0");
            0
        }),
        None => 0,
    }
}

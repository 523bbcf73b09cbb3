/// Read-only view of process environment variables.
use std::collections::HashMap;

/// Environment variable that enables fault-tolerant training when set to a
/// non-zero integer.
pub const FAULT_TOLERANT_VAR: &str = "FAULT_TOLERANT_TRAINING";

/// Source of environment variables.
///
/// Handlers and cluster detection read through this trait so tests can
/// supply a fixed environment without mutating the real one.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Whether fault-tolerant training was requested through the environment.
pub fn fault_tolerant_training(env: &dyn EnvSource) -> bool {
    let Some(value) = env.var(FAULT_TOLERANT_VAR) else {
        return false;
    };
    match value.trim().parse::<i64>() {
        Ok(n) => n != 0,
        Err(_) => {
            tracing::warn!(var = FAULT_TOLERANT_VAR, value = %value, "not an integer, fault-tolerant training stays off");
            false
        }
    }
}

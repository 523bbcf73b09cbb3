/// Scheduler requeue command invocation.
use std::io;
use std::process::{Command, ExitStatus};

/// Runs external commands and reports their exit code.
pub trait CommandRunner: Send + Sync {
    /// Run `argv[0]` with the remaining arguments, without a shell.
    fn call(&self, argv: &[String]) -> io::Result<i32>;

    /// Run a single command string through a shell.
    fn call_shell(&self, command: &str) -> io::Result<i32>;
}

/// Runs commands as child processes and waits for them.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    shell: String,
}

impl SystemRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner for SystemRunner {
    fn call(&self, argv: &[String]) -> io::Result<i32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let status = Command::new(program).args(args).status()?;
        Ok(exit_code(status))
    }

    fn call_shell(&self, command: &str) -> io::Result<i32> {
        let status = Command::new(&self.shell).arg("-c").arg(command).status()?;
        Ok(exit_code(status))
    }
}

/// Exit code of a finished process; a process killed by a signal counts
/// as failed.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Run the requeue command and return its exit code.
///
/// The argument vector is tried first. If the executable cannot be found
/// that way (no shell context to resolve it), the arguments are joined into
/// a single string and run once more through the shell. Errors from the
/// second attempt, and any other error from the first, are returned.
pub fn run_requeue(runner: &dyn CommandRunner, argv: &[String]) -> io::Result<i32> {
    match runner.call(argv) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let joined = argv.join(" ");
            tracing::debug!(error = %e, command = %joined, "requeue command not found, retrying through shell");
            runner.call_shell(&joined)
        }
        result => result,
    }
}

/// Platform checks used before touching the OS signal table.
use nix::sys::signal::Signal;

pub fn is_on_windows() -> bool {
    cfg!(windows)
}

/// Whether the calling thread is the process's main thread.
///
/// Signal dispositions may only be installed from the main thread.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn is_main_thread() -> bool {
    nix::unistd::gettid() == nix::unistd::getpid()
}

#[cfg(target_os = "macos")]
pub fn is_main_thread() -> bool {
    // SAFETY: pthread_main_np has no preconditions.
    unsafe { libc::pthread_main_np() != 0 }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
pub fn is_main_thread() -> bool {
    std::thread::current().name() == Some("main")
}

/// Whether a handler function is installed for `signal`.
///
/// The default and ignore dispositions do not count as handlers.
pub fn has_os_handler(signal: Signal) -> bool {
    // SAFETY: a null `act` only queries the current disposition into `old`,
    // which is a plain C struct for which all-zero is a valid value.
    unsafe {
        let mut old: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal as libc::c_int, std::ptr::null(), &mut old) != 0 {
            return false;
        }
        old.sa_sigaction != libc::SIG_DFL && old.sa_sigaction != libc::SIG_IGN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_thread_is_not_main() {
        let on_main = std::thread::spawn(is_main_thread).join().unwrap();
        assert!(!on_main);
    }

    #[test]
    fn test_default_disposition_is_not_a_handler() {
        // Nothing in the unit test binary installs a SIGUSR2 handler.
        assert!(!has_os_handler(Signal::SIGUSR2));
    }

    #[test]
    fn test_not_windows() {
        assert!(!is_on_windows());
    }
}

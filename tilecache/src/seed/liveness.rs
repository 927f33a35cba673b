//! Process liveness probes.

use std::fmt;
use std::sync::Arc;

/// Answers whether a process id belongs to a running process.
///
/// Used to reclaim seed locks left behind by crashed holders. When in
/// doubt an implementation must answer `true`; reclaiming the lock of a
/// live process breaks exclusivity.
pub trait ProcessLiveness: Send + Sync + fmt::Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe using `kill(pid, 0)`.
///
/// `ESRCH` means the process is gone. `EPERM` means it exists but belongs
/// to another user, so it counts as alive.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixLiveness;

#[cfg(unix)]
impl ProcessLiveness for PosixLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return true;
        };
        if pid <= 0 {
            return true;
        }
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => false,
            _ => true,
        }
    }
}

/// Probe for platforms without a cheap process check.
///
/// Only the current process is known; every other pid is assumed alive, so
/// locks of crashed holders must be cleared by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableLiveness;

impl ProcessLiveness for PortableLiveness {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Best probe for the current platform.
#[cfg(unix)]
pub fn default_liveness() -> Arc<dyn ProcessLiveness> {
    Arc::new(PosixLiveness)
}

/// Best probe for the current platform.
#[cfg(not(unix))]
pub fn default_liveness() -> Arc<dyn ProcessLiveness> {
    Arc::new(PortableLiveness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_assumes_alive() {
        assert!(PortableLiveness.is_alive(std::process::id()));
        assert!(PortableLiveness.is_alive(u32::MAX));
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_current_process_is_alive() {
        assert!(PosixLiveness.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_exited_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!PosixLiveness.is_alive(pid));
    }
}

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Answers whether an OS process still exists.
///
/// Results are taken as ground truth by the registry sweep; a false "dead"
/// answer frees a live process's slot.
pub trait LivenessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes with signal 0, i.e. `kill(pid, 0)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

impl LivenessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(SignalProbe.is_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_are_dead() {
        assert!(!SignalProbe.is_alive(0));
        assert!(!SignalProbe.is_alive(u32::MAX));
    }
}

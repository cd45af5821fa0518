use nix::unistd::{fork, ForkResult};

/// Which side of a successful duplication the caller ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicated {
    Parent { child_pid: u32 },
    Child,
}

/// OS-level process duplication primitive
pub trait Duplicator: Send {
    fn duplicate(&mut self) -> nix::Result<Duplicated>;

    /// Pid of the calling process; only meaningful right after `duplicate`
    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// Duplicates with `fork()`.
///
/// # Safety
///
/// Only the calling thread survives in the child. Callers must not fork while
/// other threads hold locks (allocator, stdio, registry) the child will need.
/// The exploration engine runs single-threaded, which is what makes this
/// sound in practice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkDuplicator;

impl Duplicator for ForkDuplicator {
    #[allow(unsafe_code)]
    fn duplicate(&mut self) -> nix::Result<Duplicated> {
        // SAFETY: see the type-level contract above.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(Duplicated::Parent {
                child_pid: child.as_raw() as u32,
            }),
            ForkResult::Child => Ok(Duplicated::Child),
        }
    }
}

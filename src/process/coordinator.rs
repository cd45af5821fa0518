//! Process duplication protocol on top of the shared registry.
//!
//! A duplication reserves capacity and a logical index first, then asks the
//! OS for a copy of the process. Only the child knows its own pid, so the
//! child claims the registry slot; the parent just carries on. The child
//! reopens the registry lock file before touching the registry.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::errors::{ForkscopeError, Result};
use crate::process::duplicate::{Duplicated, Duplicator};
use crate::process::identity::WorkerIdentity;
use crate::shared::registry::SharedRegistry;

/// Result of [`ProcessCoordinator::request_duplication`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicationOutcome {
    /// Running in the original process; a sibling now explores elsewhere
    ParentContinue { child_pid: u32, logical_index: u32 },
    /// Running in the new process, already registered
    ChildContinue { identity: WorkerIdentity },
    /// No capacity left or the OS refused; nothing was duplicated
    ResourceExhausted,
}

impl DuplicationOutcome {
    pub fn is_child(&self) -> bool {
        matches!(self, Self::ChildContinue { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }
}

pub struct ProcessCoordinator {
    registry: Arc<SharedRegistry>,
    identity: WorkerIdentity,
    duplicator: Box<dyn Duplicator>,
    retired: bool,
}

impl ProcessCoordinator {
    /// Register the calling process as the first process of the run
    pub fn bootstrap(
        registry: Arc<SharedRegistry>,
        duplicator: Box<dyn Duplicator>,
    ) -> Result<Self> {
        let os_pid = duplicator.current_pid();
        registry.register_initial_process(os_pid)?;
        Ok(Self {
            registry,
            identity: WorkerIdentity::initial(os_pid),
            duplicator,
            retired: false,
        })
    }

    /// Wrap an identity that is already registered
    pub fn attach(
        registry: Arc<SharedRegistry>,
        identity: WorkerIdentity,
        duplicator: Box<dyn Duplicator>,
    ) -> Self {
        Self {
            registry,
            identity,
            duplicator,
            retired: false,
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    pub fn max_processes(&self) -> u32 {
        self.registry.max_processes()
    }

    /// Try to split the calling process in two.
    ///
    /// `ResourceExhausted` leaves the registry exactly as it was, except that a
    /// failed OS duplication keeps the logical index it consumed.
    pub fn request_duplication(&mut self) -> Result<DuplicationOutcome> {
        let max = self.registry.max_processes();

        let reserved = self.registry.acquire()?.reserve_duplication(max);
        let Some(logical_index) = reserved else {
            debug!("Duplication refused: {} processes already running", max);
            return Ok(DuplicationOutcome::ResourceExhausted);
        };

        match self.duplicator.duplicate() {
            Err(e) => {
                warn!("Process duplication failed: {}", e);
                self.registry.acquire()?.rollback_reservation();
                Ok(DuplicationOutcome::ResourceExhausted)
            }
            Ok(Duplicated::Parent { child_pid }) => {
                info!(
                    "Duplicated process {} into pid {} (logical index {})",
                    self.identity, child_pid, logical_index
                );
                Ok(DuplicationOutcome::ParentContinue {
                    child_pid,
                    logical_index,
                })
            }
            Ok(Duplicated::Child) => {
                let os_pid = self.duplicator.current_pid();
                self.registry.reopen_lock()?;
                let claimed = self
                    .registry
                    .acquire()?
                    .claim_free_slot(max, logical_index, os_pid);
                let Some(slot) = claimed else {
                    self.registry.acquire()?.rollback_reservation();
                    return Err(ForkscopeError::internal(format!(
                        "no free registry slot for child {} with logical index {}",
                        os_pid, logical_index
                    )));
                };

                self.identity = WorkerIdentity {
                    slot,
                    logical_index,
                    os_pid,
                };
                self.retired = false;
                debug!("Child {} registered as {}", os_pid, self.identity);
                Ok(DuplicationOutcome::ChildContinue {
                    identity: self.identity,
                })
            }
        }
    }

    /// Give this process's slot back so siblings may duplicate again.
    ///
    /// Idempotent; returns whether a slot was freed by this call.
    pub fn retire(&mut self) -> Result<bool> {
        if self.retired {
            return Ok(false);
        }
        let released = self
            .registry
            .acquire()?
            .release_slot(self.identity.slot, self.identity.logical_index);
        if released {
            debug!("Process {} released its registry slot", self.identity);
        } else {
            warn!(
                "Registry slot {} no longer belongs to process {}",
                self.identity.slot, self.identity
            );
        }
        self.retired = true;
        Ok(released)
    }
}

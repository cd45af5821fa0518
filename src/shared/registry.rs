//! Fixed-capacity registry shared by every worker process of a run.
//!
//! Holds the process count, the state-id and logical-index counters and one
//! slot per live process. All reads and writes go through a
//! [`RegistryGuard`], which holds the cross-process lock for its lifetime.

use tracing::{debug, info, warn};

use crate::core::errors::Result;
use crate::core::limits::{ProcessLimits, MAX_PROCESSES};
use crate::process::liveness::LivenessProbe;
use crate::shared::lock::{ProcessLock, ProcessLockGuard};

/// Marker for an unoccupied slot field
pub const FREE: u32 = u32::MAX;

/// One registry slot: which logical process lives here and under which pid
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub logical_index: u32,
    pub os_pid: u32,
}

impl SlotRecord {
    pub const FREE: Self = Self {
        logical_index: FREE,
        os_pid: FREE,
    };

    pub fn is_free(&self) -> bool {
        self.os_pid == FREE
    }
}

/// Registry contents. Only reachable through a [`RegistryGuard`].
#[repr(C)]
#[derive(Debug)]
pub struct RegistryState {
    process_count: u32,
    last_file_id: u32,
    last_state_id: u64,
    slots: [SlotRecord; MAX_PROCESSES as usize],
}

impl RegistryState {
    const fn empty() -> Self {
        Self {
            process_count: 0,
            last_file_id: 0,
            last_state_id: 0,
            slots: [SlotRecord::FREE; MAX_PROCESSES as usize],
        }
    }

    /// Reset the counters and claim slot 0 for the first process of the run.
    pub fn register_initial_process(&mut self, os_pid: u32) {
        self.slots = [SlotRecord::FREE; MAX_PROCESSES as usize];
        self.process_count = 1;
        self.last_state_id = 0;
        self.last_file_id = 1;
        self.slots[0] = SlotRecord {
            logical_index: 0,
            os_pid,
        };
    }

    /// Return the current state id and advance the counter
    pub fn fetch_and_increment_state_id(&mut self) -> u64 {
        let id = self.last_state_id;
        self.last_state_id += 1;
        id
    }

    pub fn process_count(&self) -> u32 {
        self.process_count
    }

    pub fn last_state_id(&self) -> u64 {
        self.last_state_id
    }

    pub fn last_file_id(&self) -> u32 {
        self.last_file_id
    }

    pub fn slot(&self, slot: usize) -> Option<SlotRecord> {
        self.slots.get(slot).copied()
    }

    /// Logical index of the process in `slot`, `None` when the slot is free
    pub fn process_index_for_slot(&self, slot: usize) -> Option<u32> {
        self.slots
            .get(slot)
            .filter(|record| !record.is_free())
            .map(|record| record.logical_index)
    }

    pub fn occupied_slots(&self) -> usize {
        self.slots.iter().filter(|record| !record.is_free()).count()
    }

    /// Reserve a logical index for a process about to be duplicated.
    ///
    /// Returns `None` without touching anything when `max_processes` are
    /// already counted. Otherwise bumps the process count before any OS
    /// work happens, so concurrent reservations cannot overshoot.
    pub fn reserve_duplication(&mut self, max_processes: u32) -> Option<u32> {
        if self.process_count >= max_processes {
            return None;
        }
        let index = self.last_file_id;
        self.last_file_id += 1;
        self.process_count += 1;
        Some(index)
    }

    /// Undo the count bump of a reservation whose duplication failed.
    ///
    /// `last_file_id` stays advanced: a later index may already be in use.
    pub fn rollback_reservation(&mut self) {
        self.process_count = self.process_count.saturating_sub(1);
    }

    /// Claim the first free slot below `max_processes` for a new process
    pub fn claim_free_slot(
        &mut self,
        max_processes: u32,
        logical_index: u32,
        os_pid: u32,
    ) -> Option<usize> {
        let limit = (max_processes as usize).min(self.slots.len());
        let slot = self.slots[..limit].iter().position(SlotRecord::is_free)?;
        self.slots[slot] = SlotRecord {
            logical_index,
            os_pid,
        };
        Some(slot)
    }

    /// Free `slot` if it still belongs to `logical_index`
    pub fn release_slot(&mut self, slot: usize, logical_index: u32) -> bool {
        match self.slots.get_mut(slot) {
            Some(record) if !record.is_free() && record.logical_index == logical_index => {
                *record = SlotRecord::FREE;
                self.process_count = self.process_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Free every occupied slot whose process is reported dead.
    ///
    /// Returns how many slots were reclaimed.
    pub fn reclaim_dead(&mut self, max_processes: u32, probe: &dyn LivenessProbe) -> usize {
        let limit = (max_processes as usize).min(self.slots.len());
        let mut reclaimed = 0;

        for (slot, record) in self.slots[..limit].iter_mut().enumerate() {
            if record.is_free() {
                continue;
            }
            let alive = probe.is_alive(record.os_pid);
            if !alive {
                warn!(
                    "Process {} (logical index {}) in slot {} is dead, reclaiming",
                    record.os_pid, record.logical_index, slot
                );
                *record = SlotRecord::FREE;
                self.process_count = self.process_count.saturating_sub(1);
                reclaimed += 1;
            }
        }
        reclaimed
    }
}

pub type RegistryGuard<'a> = ProcessLockGuard<'a, RegistryState>;

/// The registry block, mapped once by the initial process and inherited by
/// every process forked from it.
pub struct SharedRegistry {
    lock: ProcessLock<RegistryState>,
    max_processes: u32,
}

impl SharedRegistry {
    /// Map a new registry sized for `limits`.
    pub fn create(limits: ProcessLimits) -> Result<Self> {
        limits.validate()?;
        let lock = ProcessLock::create(RegistryState::empty())?;
        debug!(
            "Shared registry created for up to {} processes",
            limits.max_processes
        );
        Ok(Self {
            lock,
            max_processes: limits.max_processes,
        })
    }

    /// Exclusive view of the registry, released when dropped
    pub fn acquire(&self) -> Result<RegistryGuard<'_>> {
        self.lock.acquire()
    }

    /// Detach this process from the lock description inherited over `fork()`
    pub fn reopen_lock(&self) -> Result<()> {
        self.lock.reopen()
    }

    pub fn max_processes(&self) -> u32 {
        self.max_processes
    }

    pub fn register_initial_process(&self, os_pid: u32) -> Result<()> {
        self.acquire()?.register_initial_process(os_pid);
        info!("Registered initial process {} in slot 0", os_pid);
        Ok(())
    }

    pub fn fetch_and_increment_state_id(&self) -> Result<u64> {
        Ok(self.acquire()?.fetch_and_increment_state_id())
    }

    pub fn current_process_count(&self) -> Result<u32> {
        Ok(self.acquire()?.process_count())
    }

    pub fn process_index_for_slot(&self, slot: usize) -> Result<Option<u32>> {
        if slot >= self.max_processes as usize {
            return Ok(None);
        }
        Ok(self.acquire()?.process_index_for_slot(slot))
    }

    /// Sweep all slots under one acquisition; true iff any slot was reclaimed
    pub fn check_dead_processes(&self, probe: &dyn LivenessProbe) -> Result<bool> {
        Ok(self.reclaim_dead_processes(probe)? > 0)
    }

    pub fn reclaim_dead_processes(&self, probe: &dyn LivenessProbe) -> Result<usize> {
        let reclaimed = self.acquire()?.reclaim_dead(self.max_processes, probe);
        if reclaimed > 0 {
            info!("Reclaimed {} dead process slot(s)", reclaimed);
        }
        Ok(reclaimed)
    }
}

use serde::{Deserialize, Serialize};

/// This process's own registry entry, cached after registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Position in the shared slot table
    pub slot: usize,
    /// Never-reused index assigned when the process was created
    pub logical_index: u32,
    pub os_pid: u32,
}

impl WorkerIdentity {
    pub fn initial(os_pid: u32) -> Self {
        Self {
            slot: 0,
            logical_index: 0,
            os_pid,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.logical_index == 0
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.logical_index, self.slot)
    }
}

//! Memory shared by every process of a run.

pub mod lock;
pub mod region;
pub mod registry;

pub use lock::{ProcessLock, ProcessLockGuard};
pub use region::SharedRegion;
pub use registry::{RegistryGuard, RegistryState, SharedRegistry, SlotRecord, FREE};

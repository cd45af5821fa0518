//! Worker-process coordination: duplication, identity and liveness.

pub mod coordinator;
pub mod duplicate;
pub mod identity;
pub mod liveness;

pub use coordinator::*;
pub use duplicate::*;
pub use identity::*;
pub use liveness::*;

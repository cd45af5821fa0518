// Core infrastructure shared by the registry, coordinator and plugin layers

pub mod errors;
pub mod limits;

// Re-export commonly used types
pub use errors::{ForkscopeError, Result};
pub use limits::{ProcessLimits, MAX_PROCESSES};

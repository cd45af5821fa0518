// Lets `#[plugin]` expansions inside this crate resolve `::forkscope::...`
extern crate self as forkscope;

// Core infrastructure modules
pub mod core;
pub mod config;

// Cross-process coordination
pub mod shared;     // Shared-memory registry and its lock
pub mod process;    // Duplication protocol and liveness
pub mod session;    // Per-process output directories and sinks

// In-process extension components
pub mod plugin;

pub mod runtime;

#[doc(hidden)]
pub use linkme;

pub use forkscope_macros::plugin;

// Re-exports for convenience
pub use crate::core::errors::{ForkscopeError, Result};
pub use crate::core::limits::{ProcessLimits, MAX_PROCESSES};
pub use config::RunConfig;
pub use plugin::{
    CapabilityRegistry, CorePlugin, ForkEvent, Plugin, PluginCatalog, PluginContext,
    PluginDescriptor, PluginHandle, PluginKind, PluginState,
};
pub use process::{
    DuplicationOutcome, ForkDuplicator, LivenessProbe, ProcessCoordinator, SignalProbe,
    WorkerIdentity,
};
pub use runtime::{ProcessLocal, Runtime, RuntimeOptions, RuntimeStatistics};
pub use session::{LogKind, OutputSession, SessionOptions};
pub use shared::SharedRegistry;

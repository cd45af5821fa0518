//! The plugin trait and what plugins see while running.

use std::any::Any;

use serde_json::Value;

use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::registry::CapabilityRegistry;
use crate::process::identity::WorkerIdentity;

/// Lifecycle of one plugin instance inside a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Created,
    DependencyChecked,
    Initialized,
    Destroyed,
}

/// Notification around a process duplication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkEvent {
    /// About to duplicate; sent in the requesting process only
    Prefork { identity: WorkerIdentity },
    /// Duplication succeeded; sent in both the parent and the child
    Postfork {
        identity: WorkerIdentity,
        is_child: bool,
        parent_index: u32,
    },
}

/// Downcasting support for plugin trait objects
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Context handed to [`Plugin::initialize`]
pub struct PluginContext<'a> {
    /// Registry for lazy collaborator lookup
    pub registry: &'a CapabilityRegistry,
    /// Process the plugin is being activated in
    pub identity: WorkerIdentity,
    /// This plugin's settings block, `Value::Null` when absent
    pub settings: &'a Value,
}

/// An extension component living in one process.
///
/// `initialize` runs in registration order, so a plugin must not assume its
/// dependencies are initialized yet. Look collaborators up through the
/// registry when they are needed and keep only weak handles to them.
pub trait Plugin: AsAny {
    fn descriptor(&self) -> &'static PluginDescriptor;

    fn initialize(&mut self, _ctx: &PluginContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-read runtime configuration. Must be idempotent.
    fn refresh(&mut self) {}

    fn on_process_fork(&mut self, _event: &ForkEvent) {}
}

pub(crate) fn downcast_ref<T: Plugin + 'static>(plugin: &dyn Plugin) -> Option<&T> {
    AsAny::as_any(plugin).downcast_ref::<T>()
}

pub(crate) fn downcast_mut<T: Plugin + 'static>(plugin: &mut dyn Plugin) -> Option<&mut T> {
    AsAny::as_any_mut(plugin).downcast_mut::<T>()
}

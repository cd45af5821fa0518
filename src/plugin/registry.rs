//! Per-process plugin registry.
//!
//! Plugins are registered by name from a [`PluginCatalog`], checked for
//! name and capability clashes, dependency-checked as a whole, and only then
//! initialized in registration order. Lookups go by name first and fall back
//! to the capability key.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::errors::{ForkscopeError, Result};
use crate::plugin::catalog::PluginCatalog;
use crate::plugin::core_plugin::CorePlugin;
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::instance::{
    downcast_mut, downcast_ref, ForkEvent, Plugin, PluginContext, PluginState,
};
use crate::process::identity::WorkerIdentity;

/// Shared handle to an active plugin; hold it weakly inside other plugins
pub type PluginHandle = Rc<RefCell<Box<dyn Plugin>>>;

static NO_SETTINGS: Value = Value::Null;

struct ActivePlugin {
    descriptor: &'static PluginDescriptor,
    handle: PluginHandle,
    state: Cell<PluginState>,
    refreshes: Cell<u32>,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    by_name: HashMap<&'static str, usize>,
    by_capability: HashMap<&'static str, usize>,
    active: Vec<ActivePlugin>,
    graph: DiGraph<&'static str, ()>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full activation: core plugin, configured plugins, dependency check,
    /// then initialization on behalf of the process `identity`.
    pub fn build(
        catalog: &PluginCatalog,
        names: &[String],
        settings: &HashMap<String, Value>,
        identity: WorkerIdentity,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register_core()?;
        registry.register_all(catalog, names)?;
        registry.validate_dependencies()?;
        registry.initialize_all(settings, identity)?;
        info!(
            "Activated {} plugins: {}",
            registry.len(),
            registry.names().join(", ")
        );
        Ok(registry)
    }

    /// Registers the mandatory core plugin; must come before anything else
    pub fn register_core(&mut self) -> Result<()> {
        if !self.active.is_empty() {
            return Err(ForkscopeError::internal(
                "core plugin must be registered before any other plugin",
            ));
        }
        self.insert(Box::<CorePlugin>::default())
    }

    /// Registers one configured plugin by name
    pub fn register(&mut self, catalog: &PluginCatalog, name: &str) -> Result<()> {
        let Some(descriptor) = catalog.resolve_descriptor(name) else {
            return Err(ForkscopeError::unknown_plugin(name));
        };
        self.check_admissible(descriptor)?;
        let plugin = catalog
            .instantiate(name)
            .ok_or_else(|| ForkscopeError::unknown_plugin(name))?;
        self.insert(plugin)
    }

    pub fn register_all(&mut self, catalog: &PluginCatalog, names: &[String]) -> Result<()> {
        for name in names {
            self.register(catalog, name)?;
        }
        Ok(())
    }

    fn check_admissible(&self, descriptor: &PluginDescriptor) -> Result<()> {
        if self.by_name.contains_key(descriptor.name) {
            return Err(ForkscopeError::duplicate_plugin(descriptor.name));
        }
        if let Some(capability) = descriptor.capability {
            if let Some(&provider) = self.by_capability.get(capability) {
                return Err(ForkscopeError::capability_collision(
                    descriptor.name,
                    capability,
                    self.active[provider].descriptor.name,
                ));
            }
        }
        Ok(())
    }

    fn insert(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let descriptor = plugin.descriptor();
        self.check_admissible(descriptor)?;

        let index = self.active.len();
        self.by_name.insert(descriptor.name, index);
        if let Some(capability) = descriptor.capability {
            self.by_capability.insert(capability, index);
        }
        self.active.push(ActivePlugin {
            descriptor,
            handle: Rc::new(RefCell::new(plugin)),
            state: Cell::new(PluginState::Created),
            refreshes: Cell::new(0),
        });
        debug!("Registered plugin {}", descriptor.name);
        Ok(())
    }

    /// Every declared dependency must name an active plugin. Cycles are
    /// allowed since nothing orders initialization by dependency.
    pub fn validate_dependencies(&mut self) -> Result<()> {
        let mut graph = DiGraph::new();
        let indices: Vec<NodeIndex> = self
            .active
            .iter()
            .map(|entry| graph.add_node(entry.descriptor.name))
            .collect();

        for (position, entry) in self.active.iter().enumerate() {
            for dependency in entry.descriptor.dependencies {
                let Some(&target) = self.by_name.get(dependency) else {
                    return Err(ForkscopeError::unresolved_dependency(
                        entry.descriptor.name,
                        *dependency,
                    ));
                };
                graph.add_edge(indices[position], indices[target], ());
            }
        }

        if is_cyclic_directed(&graph) {
            warn!("Plugin dependency graph contains a cycle");
        }

        for entry in &self.active {
            entry.state.set(PluginState::DependencyChecked);
        }
        self.graph = graph;
        Ok(())
    }

    /// Initializes every plugin in registration order.
    ///
    /// `settings` is keyed by plugin name.
    pub fn initialize_all(
        &self,
        settings: &HashMap<String, Value>,
        identity: WorkerIdentity,
    ) -> Result<()> {
        if let Some(entry) = self
            .active
            .iter()
            .find(|entry| entry.state.get() != PluginState::DependencyChecked)
        {
            return Err(ForkscopeError::internal(format!(
                "plugin {} is {:?}; dependencies must be validated before initialization",
                entry.descriptor.name,
                entry.state.get()
            )));
        }

        for entry in &self.active {
            let ctx = PluginContext {
                registry: self,
                identity,
                settings: settings.get(entry.descriptor.name).unwrap_or(&NO_SETTINGS),
            };
            entry
                .handle
                .borrow_mut()
                .initialize(&ctx)
                .map_err(|e| ForkscopeError::plugin_initialization(entry.descriptor.name, e))?;
            entry.state.set(PluginState::Initialized);
            debug!("Initialized plugin {}", entry.descriptor.name);
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<&ActivePlugin> {
        self.by_name
            .get(key)
            .or_else(|| self.by_capability.get(key))
            .map(|&index| &self.active[index])
    }

    /// Active plugin by name, else by capability key
    pub fn get_plugin(&self, key: &str) -> Option<PluginHandle> {
        self.lookup(key).map(|entry| entry.handle.clone())
    }

    /// Runs `f` on the plugin found under `key` if it is a `T`.
    ///
    /// Returns `None` when the plugin is absent, of another type, or already
    /// mutably borrowed (e.g. looking yourself up during `initialize`).
    pub fn with_plugin<T, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: Plugin + 'static,
    {
        let entry = self.lookup(key)?;
        let guard = entry.handle.try_borrow().ok()?;
        let plugin = downcast_ref::<T>(&**guard)?;
        Some(f(plugin))
    }

    pub fn with_plugin_mut<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Plugin + 'static,
    {
        let entry = self.lookup(key)?;
        let mut guard = entry.handle.try_borrow_mut().ok()?;
        let plugin = downcast_mut::<T>(&mut **guard)?;
        Some(f(plugin))
    }

    /// Asks every plugin to re-read configuration, in activation order
    pub fn refresh_plugins(&self) {
        for entry in &self.active {
            entry.handle.borrow_mut().refresh();
            entry.refreshes.set(entry.refreshes.get() + 1);
        }
    }

    pub fn notify_fork(&self, event: &ForkEvent) {
        for entry in &self.active {
            entry.handle.borrow_mut().on_process_fork(event);
        }
    }

    /// Plugin names in activation order
    pub fn names(&self) -> Vec<&'static str> {
        self.active.iter().map(|entry| entry.descriptor.name).collect()
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.by_name
            .get(name)
            .map(|&index| self.active[index].state.get())
    }

    pub fn refresh_count(&self, name: &str) -> Option<u32> {
        self.by_name
            .get(name)
            .map(|&index| self.active[index].refreshes.get())
    }

    /// Edges point from a plugin to each of its dependencies. Empty until
    /// dependencies have been validated.
    pub fn dependency_graph(&self) -> &DiGraph<&'static str, ()> {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Drop for CapabilityRegistry {
    fn drop(&mut self) {
        self.by_name.clear();
        self.by_capability.clear();
        for entry in self.active.drain(..) {
            entry.state.set(PluginState::Destroyed);
            if Rc::strong_count(&entry.handle) > 1 {
                warn!(
                    "Plugin {} is still referenced elsewhere and outlives its registry",
                    entry.descriptor.name
                );
            }
            debug!("Destroying plugin {}", entry.descriptor.name);
            drop(entry);
        }
    }
}

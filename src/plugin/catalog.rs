use std::collections::HashMap;

use linkme::distributed_slice;
use tracing::{debug, warn};

use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::instance::Plugin;

/// A constructible plugin kind: its descriptor and a factory
#[derive(Clone, Copy)]
pub struct PluginKind {
    pub descriptor: &'static PluginDescriptor,
    pub factory: fn() -> Box<dyn Plugin>,
}

impl std::fmt::Debug for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginKind")
            .field("descriptor", self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Every plugin kind linked into the binary via `#[plugin(...)]`
#[distributed_slice]
pub static PLUGIN_KINDS: [PluginKind] = [..];

/// Name-indexed set of plugin kinds a registry may instantiate
#[derive(Debug, Default, Clone)]
pub struct PluginCatalog {
    kinds: HashMap<&'static str, PluginKind>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of all kinds linked into this binary
    pub fn linked() -> Self {
        let mut catalog = Self::new();
        for kind in PLUGIN_KINDS.iter() {
            if !catalog.insert(*kind) {
                warn!(
                    "Plugin kind {} is linked more than once; keeping the first",
                    kind.descriptor.name
                );
            }
        }
        debug!("Linked plugin catalog holds {} kinds", catalog.len());
        catalog
    }

    pub fn with(mut self, kind: PluginKind) -> Self {
        self.insert(kind);
        self
    }

    /// Returns false and keeps the existing entry if the name is taken
    pub fn insert(&mut self, kind: PluginKind) -> bool {
        let name = kind.descriptor.name;
        if self.kinds.contains_key(name) {
            return false;
        }
        self.kinds.insert(name, kind);
        true
    }

    pub fn resolve_descriptor(&self, name: &str) -> Option<&'static PluginDescriptor> {
        self.kinds.get(name).map(|kind| kind.descriptor)
    }

    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Plugin>> {
        self.kinds.get(name).map(|kind| (kind.factory)())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Sorted kind names
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.kinds.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

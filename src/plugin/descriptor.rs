use serde::Serialize;

/// Static description of one plugin kind.
///
/// Usually generated by the `#[plugin(...)]` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// Optional secondary lookup key; at most one active plugin may claim it
    pub capability: Option<&'static str>,
    /// Names of plugins that must be active alongside this one
    pub dependencies: &'static [&'static str],
}

impl PluginDescriptor {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            description: "No description provided",
            capability: None,
            dependencies: &[],
        }
    }

    pub const fn with_capability(mut self, capability: &'static str) -> Self {
        self.capability = Some(capability);
        self
    }

    pub const fn with_dependencies(mut self, dependencies: &'static [&'static str]) -> Self {
        self.dependencies = dependencies;
        self
    }
}

use thiserror::Error;

/// Unified error type for the whole crate.
///
/// Every variant is fatal for the owning process. Running out of process
/// capacity is not an error: it is reported through
/// `DuplicationOutcome::ResourceExhausted`.
#[derive(Debug, Error)]
pub enum ForkscopeError {
    /// A configured plugin name is not present in the catalog
    #[error("Plugin '{name}' does not exist in this installation")]
    UnknownPlugin { name: String },

    /// The same plugin name was configured twice
    #[error("Plugin '{name}' was already loaded (is it enabled multiple times?)")]
    DuplicatePlugin { name: String },

    /// Two active plugins claim the same capability key
    #[error("Plugin '{plugin}' with capability '{capability}' cannot be loaded because this capability is already provided by '{provider}'")]
    CapabilityCollision {
        plugin: String,
        capability: String,
        provider: String,
    },

    /// A declared dependency is not an active plugin
    #[error("Plugin '{plugin}' depends on plugin '{dependency}' which is not enabled in config")]
    UnresolvedDependency { plugin: String, dependency: String },

    /// A plugin's initialize hook failed
    #[error("Plugin '{plugin}' failed to initialize: {message}")]
    PluginInitialization {
        plugin: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Filesystem and stream failures
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// System call failures (mapping, fork, signals)
    #[error("System call failed: {operation}")]
    Os {
        operation: String,
        #[source]
        source: nix::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ForkscopeError {
    pub fn unknown_plugin<S: Into<String>>(name: S) -> Self {
        Self::UnknownPlugin { name: name.into() }
    }

    pub fn duplicate_plugin<S: Into<String>>(name: S) -> Self {
        Self::DuplicatePlugin { name: name.into() }
    }

    pub fn capability_collision<P, C, Q>(plugin: P, capability: C, provider: Q) -> Self
    where
        P: Into<String>,
        C: Into<String>,
        Q: Into<String>,
    {
        Self::CapabilityCollision {
            plugin: plugin.into(),
            capability: capability.into(),
            provider: provider.into(),
        }
    }

    pub fn unresolved_dependency<P: Into<String>, D: Into<String>>(plugin: P, dependency: D) -> Self {
        Self::UnresolvedDependency {
            plugin: plugin.into(),
            dependency: dependency.into(),
        }
    }

    /// Wrap a failure returned by a plugin hook
    pub fn plugin_initialization<S: Into<String>>(plugin: S, source: anyhow::Error) -> Self {
        Self::PluginInitialization {
            plugin: plugin.into(),
            message: format!("{:#}", source),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
            expected: None,
            actual: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S, F, E, A>(message: S, field: F, expected: E, actual: A) -> Self
    where
        S: Into<String>,
        F: Into<String>,
        E: Into<String>,
        A: Into<String>,
    {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a system call error
    pub fn os<S: Into<String>>(operation: S, source: nix::Error) -> Self {
        Self::Os {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error comes from the plugin list or process ceiling
    pub fn is_configuration(&self) -> bool {
        self.category() == "configuration"
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnknownPlugin { .. }
            | Self::DuplicatePlugin { .. }
            | Self::CapabilityCollision { .. }
            | Self::UnresolvedDependency { .. }
            | Self::Configuration { .. } => "configuration",
            Self::PluginInitialization { .. } => "plugin",
            Self::Io { .. } | Self::Os { .. } => "os",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ForkscopeError>;

impl From<std::io::Error> for ForkscopeError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_yaml::Error> for ForkscopeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<serde_json::Error> for ForkscopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_errors_are_configuration() {
        let err = ForkscopeError::duplicate_plugin("A");
        assert_eq!(err.category(), "configuration");
        assert!(err.is_configuration());

        let err = ForkscopeError::unresolved_dependency("B", "C");
        assert_eq!(
            err.to_string(),
            "Plugin 'B' depends on plugin 'C' which is not enabled in config"
        );
    }

    #[test]
    fn test_collision_names_both_plugins() {
        let err = ForkscopeError::capability_collision("Second", "search", "First");
        let text = err.to_string();
        assert!(text.contains("Second"));
        assert!(text.contains("First"));
        assert!(text.contains("search"));
    }

    #[test]
    fn test_initialization_keeps_source() {
        let err = ForkscopeError::plugin_initialization("A", anyhow::anyhow!("no solver"));
        assert_eq!(err.category(), "plugin");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_os_failures_are_not_configuration() {
        let err = ForkscopeError::os("fork", nix::Error::EAGAIN);
        assert_eq!(err.category(), "os");
        assert!(!err.is_configuration());
    }
}

//! Run configuration loaded from YAML.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{ForkscopeError, Result};
use crate::core::limits::ProcessLimits;

fn default_max_processes() -> u32 {
    ProcessLimits::default().max_processes
}

/// Everything needed to start a run.
///
/// ```yaml
/// plugins: [Tracer, Searcher]
/// max_processes: 8
/// plugin_settings:
///   Searcher:
///     depth: 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Plugins to activate, in registration order. The core plugin is implied.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Free-form settings handed to each plugin, keyed by plugin name
    #[serde(default)]
    pub plugin_settings: HashMap<String, Value>,
    #[serde(default = "default_max_processes")]
    pub max_processes: u32,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            plugin_settings: HashMap::new(),
            max_processes: default_max_processes(),
            output_dir: None,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| ForkscopeError::io(format!("open config {}", path.display()), e))?;
        let mut yaml = String::new();
        file.read_to_string(&mut yaml)
            .map_err(|e| ForkscopeError::io(format!("read config {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn limits(&self) -> ProcessLimits {
        ProcessLimits::new(self.max_processes)
    }

    pub fn validate(&self) -> Result<()> {
        self.limits().validate()?;
        if let Some(blank) = self.plugins.iter().position(|name| name.trim().is_empty()) {
            return Err(ForkscopeError::configuration_field(
                "Plugin names cannot be empty",
                format!("plugins[{}]", blank),
                "a plugin name",
                "empty string",
            ));
        }
        if let Some(orphan) = self
            .plugin_settings
            .keys()
            .find(|name| !self.plugins.contains(name) && name.as_str() != "CorePlugin")
        {
            tracing::warn!("Settings given for plugin {} which is not enabled", orphan);
        }
        Ok(())
    }

    pub fn settings_for(&self, plugin: &str) -> Option<&Value> {
        self.plugin_settings.get(plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_yaml_str("plugins: []").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.limits(), ProcessLimits::new(1));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
plugins:
  - Tracer
  - Searcher
max_processes: 8
output_dir: /tmp/run
verbose: true
plugin_settings:
  Searcher:
    depth: 3
    strategy: dfs
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.plugins, vec!["Tracer", "Searcher"]);
        assert_eq!(config.max_processes, 8);
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/run")));
        assert!(config.verbose);
        assert_eq!(
            config.settings_for("Searcher"),
            Some(&serde_json::json!({ "depth": 3, "strategy": "dfs" }))
        );
        assert_eq!(config.settings_for("Tracer"), None);
    }

    #[test]
    fn test_out_of_range_ceiling_rejected() {
        for yaml in ["max_processes: 0", "max_processes: 49"] {
            let err = RunConfig::from_yaml_str(yaml).unwrap_err();
            assert!(err.is_configuration(), "{yaml}: {err}");
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RunConfig::from_yaml_str("plugin: [A]").unwrap_err();
        assert_eq!(err.category(), "serialization");
    }

    #[test]
    fn test_blank_plugin_name_rejected() {
        let err = RunConfig::from_yaml_str("plugins: [A, '  ']").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "plugins: [A]\nmax_processes: 2").unwrap();
        let config = RunConfig::load_yaml_file(file.path()).unwrap();
        assert_eq!(config.plugins, vec!["A"]);
        assert!(config.limits().is_multi_process());

        let round_trip = RunConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }
}

use crate::core::errors::{ForkscopeError, Result};
use serde::{Deserialize, Serialize};

/// Compile-time ceiling on concurrently live worker processes.
///
/// The shared registry reserves exactly this many slots.
pub const MAX_PROCESSES: u32 = 48;

/// Process-count limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLimits {
    /// Maximum number of worker processes alive at the same time
    pub max_processes: u32,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self { max_processes: 1 }
    }
}

impl ProcessLimits {
    pub fn new(max_processes: u32) -> Self {
        Self { max_processes }
    }

    /// Checks `1 <= max_processes <= MAX_PROCESSES`.
    pub fn validate(&self) -> Result<()> {
        if self.max_processes < 1 {
            return Err(ForkscopeError::configuration_field(
                "at least one process must be allowed",
                "max_processes",
                ">= 1",
                self.max_processes.to_string(),
            ));
        }
        if self.max_processes > MAX_PROCESSES {
            return Err(ForkscopeError::configuration_field(
                format!(
                    "at most {} processes are supported; raise MAX_PROCESSES",
                    MAX_PROCESSES
                ),
                "max_processes",
                format!("<= {}", MAX_PROCESSES),
                self.max_processes.to_string(),
            ));
        }
        Ok(())
    }

    /// Whether more than one process may ever exist in this run
    pub fn is_multi_process(&self) -> bool {
        self.max_processes > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_limits_validation() {
        assert!(ProcessLimits::default().validate().is_ok());
        assert!(ProcessLimits::new(MAX_PROCESSES).validate().is_ok());

        let err = ProcessLimits::new(0).validate().unwrap_err();
        assert!(err.is_configuration());

        let err = ProcessLimits::new(MAX_PROCESSES + 1).validate().unwrap_err();
        match err {
            ForkscopeError::Configuration { field, actual, .. } => {
                assert_eq!(field.as_deref(), Some("max_processes"));
                assert_eq!(actual, Some((MAX_PROCESSES + 1).to_string()));
            }
            other => panic!("Expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_multi_process() {
        assert!(!ProcessLimits::new(1).is_multi_process());
        assert!(ProcessLimits::new(4).is_multi_process());
    }
}

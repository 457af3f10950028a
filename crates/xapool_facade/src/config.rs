//! Facade configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration carried by facade factories.
///
/// This is the only part of a pooling provider that survives a restart, so
/// it must not reference live connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XaConfig {
    /// Name of the resource manager the facades connect to.
    pub resource_name: String,

    /// Transaction timeout applied to each branch (`None` = driver default).
    pub transaction_timeout: Option<Duration>,
}

impl Default for XaConfig {
    fn default() -> Self {
        Self {
            resource_name: "default".to_string(),
            transaction_timeout: None,
        }
    }
}

impl XaConfig {
    /// Creates a configuration for the named resource manager.
    #[must_use]
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            ..Self::default()
        }
    }

    /// Sets the branch transaction timeout.
    #[must_use]
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

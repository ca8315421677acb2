//! Dialer configuration
//!
//! The only tunable that matters to the dialing core is the dial ratio: how
//! many speculative calls are raced per agent in one round. The rest of the
//! configuration controls how the [`PowerDialer`](crate::PowerDialer) facade
//! reacts to agent events.
//!
//! ```rust
//! use power_dialer_core::DialerConfig;
//!
//! let config = DialerConfig::from_toml_str("dial_ratio = 3\nauto_dial = true").unwrap();
//! assert_eq!(config.dial_ratio, 3);
//! assert!(config.auto_dial);
//!
//! let defaults = DialerConfig::default();
//! assert_eq!(defaults.dial_ratio, 2);
//! assert!(!defaults.auto_dial);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};

/// Number of simultaneous speculative calls per agent unless configured otherwise
pub const DEFAULT_DIAL_RATIO: usize = 2;

/// Power dialer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Candidates raced per round
    pub dial_ratio: usize,

    /// Start dialing automatically on login and whenever a call ends with the
    /// agent still wanting work
    pub auto_dial: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            dial_ratio: DEFAULT_DIAL_RATIO,
            auto_dial: false,
        }
    }
}

impl DialerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dial ratio
    pub fn with_dial_ratio(mut self, dial_ratio: usize) -> Self {
        self.dial_ratio = dial_ratio;
        self
    }

    /// Enable or disable automatic dialing
    pub fn with_auto_dial(mut self, auto_dial: bool) -> Self {
        self.auto_dial = auto_dial;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| DialerError::config(format!("Invalid dialer configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            DialerError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Check that the configuration can drive a dialing round
    pub fn validate(&self) -> Result<()> {
        if self.dial_ratio == 0 {
            return Err(DialerError::config("dial_ratio must be at least 1"));
        }
        Ok(())
    }
}

#![forbid(unsafe_code)]

//! Batcher configuration.
//!
//! [`BatcherConfig`] is plain data with builder-style setters. With the
//! `policy-config` feature it can also be loaded from TOML or JSON text;
//! every field is optional there and falls back to its default.
//!
//! ```toml
//! auto_flush = true
//! label = "profile-writer"
//! ```

use std::fmt;

/// Label used when none is configured.
pub const DEFAULT_LABEL: &str = "batcher";

/// Tunables for a [`Batcher`](crate::Batcher).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "policy-config", derive(serde::Deserialize))]
#[cfg_attr(feature = "policy-config", serde(default, deny_unknown_fields))]
pub struct BatcherConfig {
    /// Arm a deferred flush on the first `set_data` of each batch.
    ///
    /// When `false`, only manual `flush()` calls write to the store.
    pub auto_flush: bool,
    /// Name attached to this batcher's tracing spans and events.
    pub label: String,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            auto_flush: true,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl BatcherConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether deferred flushes are armed automatically.
    #[must_use]
    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.auto_flush = enabled;
        self
    }

    /// Set the tracing label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[cfg(feature = "policy-config")]
impl BatcherConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Toml`] if the text is not valid TOML or names an
    /// unknown field.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] if the text is not valid JSON or names an
    /// unknown field.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))
    }
}

/// Error type for configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// TOML parse or schema error.
    Toml(String),
    /// JSON parse or schema error.
    Json(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toml(msg) => write!(f, "invalid TOML batcher config: {msg}"),
            Self::Json(msg) => write!(f, "invalid JSON batcher config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

//! Capture settings from the environment.
//!
//! [`Settings`] reads `APITRACE_*` variables (optionally seeded from a
//! `.env` file) and turns them into the options and builder the capture
//! layer needs.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `APITRACE_API_KEY` | collector API key (required) |
//! | `APITRACE_HOST` | collector base URL (required) |
//! | `APITRACE_BUFFER_LENGTH` | records per batch, default 10 |
//! | `APITRACE_DENYLIST` | comma separated fields to hide |
//! | `APITRACE_ALLOWLIST` | comma separated fields to keep |
//! | `APITRACE_DEVELOPMENT` | mark records as development traffic |
//! | `APITRACE_TIMEOUT_SECS` | collector request timeout, default 30 |
//!
//! # Example
//!
//! ```ignore
//! use apitrace_extras::config::{load_dotenv, Settings};
//!
//! load_dotenv();
//! let capture = Settings::from_env()?
//!     .layer_builder()
//!     .group(|req| Group::new(req.uri().path()))
//!     .build()?;
//! ```

use apitrace_core::config::{DEFAULT_BUFFER_LENGTH, DEFAULT_TIMEOUT_SECS};
use apitrace_core::{CaptureLayer, CaptureLayerBuilder, CaptureOptions};
use serde::Deserialize;

/// Prefix shared by every variable.
pub const ENV_PREFIX: &str = "APITRACE_";

/// Error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("configuration error: {0}")]
    Envy(envy::Error),

    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
}

impl From<envy::Error> for ConfigError {
    fn from(err: envy::Error) -> Self {
        match err {
            envy::Error::MissingValue(field) => {
                ConfigError::MissingVar(format!("{}{}", ENV_PREFIX, field.to_uppercase()))
            }
            other => ConfigError::Envy(other),
        }
    }
}

fn default_buffer_length() -> usize {
    DEFAULT_BUFFER_LENGTH
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Capture settings read from `APITRACE_*` variables.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Collector API key.
    pub api_key: String,
    /// Collector base URL.
    pub host: String,
    /// Records per batch.
    #[serde(default = "default_buffer_length")]
    pub buffer_length: usize,
    /// Fields to hide.
    #[serde(default)]
    pub denylist: Option<Vec<String>>,
    /// Fields to keep.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    /// Mark records as development traffic.
    #[serde(default)]
    pub development: bool,
    /// Collector request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &apitrace_core::mask_credential(&self.api_key))
            .field("host", &self.host)
            .field("buffer_length", &self.buffer_length)
            .field("denylist", &self.denylist)
            .field("allowlist", &self.allowlist)
            .field("development", &self.development)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }

    /// Read settings from explicit `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?)
    }

    /// Capture options these settings describe.
    pub fn capture_options(&self) -> CaptureOptions {
        let mut options = CaptureOptions::new()
            .buffer_length(self.buffer_length)
            .development(self.development);
        options.denylist = non_empty(&self.denylist);
        options.allowlist = non_empty(&self.allowlist);
        options
    }

    /// A layer builder with key, host, timeout and options applied.
    ///
    /// Only the group function is left to the caller.
    pub fn layer_builder(&self) -> CaptureLayerBuilder {
        CaptureLayer::builder()
            .api_key(self.api_key.clone())
            .host(self.host.clone())
            .timeout(self.timeout_secs)
            .options(self.capture_options())
    }
}

/// Trim entries and drop blanks, so `APITRACE_DENYLIST=""` means no list.
fn non_empty(list: &Option<Vec<String>>) -> Option<Vec<String>> {
    let fields: Vec<String> = list
        .iter()
        .flatten()
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect();
    (!fields.is_empty()).then_some(fields)
}

/// Load environment variables from a `.env` file in the current directory.
///
/// Existing variables take precedence. A missing file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "No .env file loaded");
    }
}

/// Load environment variables from a specific file.
pub fn load_dotenv_from<P: AsRef<std::path::Path>>(path: P) {
    if let Err(e) = dotenvy::from_path(path.as_ref()) {
        tracing::debug!(error = %e, path = %path.as_ref().display(), "Env file not loaded");
    }
}

/// Read a variable that must be set.
pub fn require_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

/// Read a variable, falling back to `default`.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

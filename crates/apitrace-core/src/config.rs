//! Configuration for the capture layer.
//!
//! [`CaptureOptions`] mirrors the options integrators pass at setup,
//! including the legacy `blacklist`/`whitelist` spellings. It is resolved
//! once, when the layer is built, into a [`RedactionPolicy`] and a flush
//! threshold.

use crate::error::{ConfigError, Result};
use crate::redact::{FieldNames, RedactionPolicy};
use serde::Deserialize;

/// Number of records buffered before a flush when nothing else is set.
pub const DEFAULT_BUFFER_LENGTH: usize = 10;

/// Collector request timeout when nothing else is set.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Options recognized by the capture layer.
///
/// ```ignore
/// use apitrace_core::CaptureOptions;
///
/// let options = CaptureOptions::new()
///     .denylist(["password", "x-api-key"])
///     .buffer_length(25);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    /// Fields to hide.
    #[serde(alias = "blacklist")]
    pub denylist: Option<Vec<String>>,

    /// Fields to keep; everything else is hidden. Ignored when a denylist
    /// is set.
    #[serde(alias = "whitelist")]
    pub allowlist: Option<Vec<String>>,

    /// Records buffered before they are sent. `1` sends every record
    /// as soon as its transaction finishes.
    #[serde(alias = "buffer_length")]
    pub buffer_length: usize,

    /// Mark records as coming from a development environment.
    pub development: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureOptions {
    /// Defaults: no redaction, buffer of [`DEFAULT_BUFFER_LENGTH`],
    /// production traffic.
    pub fn new() -> Self {
        Self {
            denylist: None,
            allowlist: None,
            buffer_length: DEFAULT_BUFFER_LENGTH,
            development: false,
        }
    }

    /// Hide the given fields in headers and bodies.
    pub fn denylist(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.denylist = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Send only the given fields of headers and bodies.
    pub fn allowlist(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowlist = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Set the flush threshold. Values below 1 are raised to 1.
    pub fn buffer_length(mut self, length: usize) -> Self {
        self.buffer_length = length.max(1);
        self
    }

    pub fn development(mut self, development: bool) -> Self {
        self.development = development;
        self
    }

    /// The redaction policy these options describe.
    pub fn policy(&self) -> RedactionPolicy {
        let names = |list: &Option<Vec<String>>| {
            list.as_ref()
                .map(|fields| fields.iter().cloned().collect::<FieldNames>())
        };
        RedactionPolicy::resolve(names(&self.denylist), names(&self.allowlist))
    }

    /// The flush threshold, never below 1.
    pub fn threshold(&self) -> usize {
        self.buffer_length.max(1)
    }
}

/// Where records are delivered and with which credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Base URL of the collector; records go to `<host>/request`.
    pub host: String,
    /// API key identifying the sender.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl CollectorConfig {
    /// Create a collector configuration.
    ///
    /// Fails when the key is blank or the host is not an absolute URL.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let host = host.into();
        let api_key = api_key.into();

        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if let Err(e) = url::Url::parse(&host) {
            return Err(ConfigError::InvalidHost {
                host,
                reason: e.to_string(),
            });
        }

        Ok(Self {
            host,
            api_key,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        })
    }

    /// Set the request timeout.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Full URL records are posted to.
    pub fn endpoint(&self) -> String {
        format!("{}/request", self.host.trim_end_matches('/'))
    }
}

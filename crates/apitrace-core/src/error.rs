//! Error types for the capture pipeline.
//!
//! Only setup mistakes surface to the integrating application. Malformed
//! traffic never produces an error here: the pipeline degrades to empty or
//! placeholder values instead, and delivery failures are logged and dropped.

/// Errors raised while building a capture layer or collector.
///
/// These are programmer errors and are reported at setup time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No API key was supplied.
    #[error("an API key is required to send traffic to the collector")]
    MissingApiKey,

    /// No group resolution function was supplied.
    #[error("a group function is required to attribute traffic to a caller")]
    MissingGroup,

    /// The collector host could not be parsed as an absolute URL.
    #[error("invalid collector host `{host}`: {reason}")]
    InvalidHost {
        /// The configured host value.
        host: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client backing the collector could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors raised while sending a batch to the collector.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request never completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector returned status {0}")]
    Status(u16),

    /// The batch could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for setup operations.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

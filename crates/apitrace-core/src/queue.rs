//! Batching and delivery of trace records.
//!
//! Records accumulate in a [`DeliveryQueue`] until the configured threshold
//! is reached. The whole batch is then detached in one step and posted to
//! the collector. Delivery is best effort: a failed batch is logged and
//! dropped, never retried or requeued.

use crate::config::CollectorConfig;
use crate::error::{ConfigError, DeliveryError};
use crate::har::TraceRecord;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// `Authorization` header value derived from an API key.
///
/// Computed once; the key itself is not kept.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// `Basic base64(api_key + ":")`.
    pub fn from_api_key(api_key: &str) -> Self {
        Self(format!("Basic {}", STANDARD.encode(format!("{}:", api_key))))
    }

    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// Destination for batches of records.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Deliver one batch.
    async fn send(&self, batch: &[TraceRecord]) -> Result<(), DeliveryError>;
}

/// Posts batches as a JSON array to `<host>/request`.
#[derive(Clone)]
pub struct HttpCollector {
    endpoint: String,
    credential: Credential,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(config: &CollectorConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint(),
            credential: Credential::from_api_key(&config.api_key),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for HttpCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCollector")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn send(&self, batch: &[TraceRecord]) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(http::header::AUTHORIZATION, self.credential.header_value())
            .json(batch)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(response.status().as_u16()))
        }
    }
}

/// Pending records plus the collector they are flushed to.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct DeliveryQueue {
    pending: Arc<Mutex<Vec<TraceRecord>>>,
    threshold: usize,
    collector: Arc<dyn Collector>,
}

impl DeliveryQueue {
    /// Create a queue that flushes once `threshold` records are pending.
    pub fn new(collector: Arc<dyn Collector>, threshold: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            threshold: threshold.max(1),
            collector,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of records waiting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record. Never touches the network.
    pub fn enqueue(&self, record: TraceRecord) {
        let mut pending = self.lock();
        pending.push(record);
        tracing::debug!(pending = pending.len(), threshold = self.threshold, "Trace record queued");
    }

    /// Detach the whole buffer if it reached the threshold.
    ///
    /// The check and the swap happen under one lock, so a record enqueued
    /// concurrently lands either in this batch or in the next one.
    pub fn take_ready(&self) -> Option<Vec<TraceRecord>> {
        let mut pending = self.lock();
        if pending.len() >= self.threshold {
            Some(std::mem::take(&mut *pending))
        } else {
            None
        }
    }

    /// Send the buffer if it reached the threshold.
    ///
    /// Returns the size of the batch that was attempted, if any.
    pub async fn maybe_flush(&self) -> Option<usize> {
        let batch = self.take_ready()?;
        self.deliver(batch).await
    }

    /// Send whatever is pending, regardless of the threshold.
    pub async fn flush(&self) -> Option<usize> {
        let batch = std::mem::take(&mut *self.lock());
        if batch.is_empty() {
            return None;
        }
        self.deliver(batch).await
    }

    /// Enqueue a record and, once the threshold is reached, flush on the
    /// current tokio runtime without waiting for the result.
    pub fn push(&self, record: TraceRecord) {
        self.enqueue(record);
        let Some(batch) = self.take_ready() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    queue.deliver(batch).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    dropped = batch.len(),
                    "No tokio runtime available to deliver trace records"
                );
            }
        }
    }

    async fn deliver(&self, batch: Vec<TraceRecord>) -> Option<usize> {
        let count = batch.len();
        match self.collector.send(&batch).await {
            Ok(()) => tracing::debug!(count, "Delivered trace records"),
            Err(e) => tracing::warn!(error = %e, dropped = count, "Trace delivery failed"),
        }
        Some(count)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TraceRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("pending", &self.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}

//! The capture middleware.
//!
//! [`CaptureLayer`] normalizes each request as it arrives, lets the rest of
//! the chain produce a response, then decorates the response body with a
//! [`CaptureBody`]. When the client has been sent the whole body, the
//! transaction is assembled into a record and handed to the delivery queue.

use crate::assemble::{ResponseHead, TraceAssembler, Transaction};
use crate::capture::{CaptureBody, Completion};
use crate::config::{CaptureOptions, CollectorConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{ConfigError, Result};
use crate::har::Group;
use crate::middleware::{BoxedNext, MiddlewareLayer, Request, Response, ResponseFuture, Transport};
use crate::normalize::RequestNormalizer;
use crate::queue::{Collector, DeliveryQueue, HttpCollector};
use http_body_util::BodyExt;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Resolves the caller a transaction is attributed to.
pub type GroupFn = Arc<dyn Fn(&Request) -> Group + Send + Sync>;

/// Middleware that records every finished transaction.
///
/// # Example
///
/// ```ignore
/// use apitrace_core::{CaptureLayer, CaptureOptions, Group};
///
/// let capture = CaptureLayer::builder()
///     .api_key(std::env::var("APITRACE_API_KEY")?)
///     .host("https://collector.example.com")
///     .group(|req| Group::new(req.headers()["x-account-id"].to_str().unwrap_or("anonymous")))
///     .options(CaptureOptions::new().denylist(["password"]).buffer_length(25))
///     .build()?;
///
/// stack.push(Box::new(capture));
/// ```
#[derive(Clone)]
pub struct CaptureLayer {
    normalizer: RequestNormalizer,
    assembler: TraceAssembler,
    group: GroupFn,
    queue: DeliveryQueue,
}

impl CaptureLayer {
    pub fn builder() -> CaptureLayerBuilder {
        CaptureLayerBuilder::default()
    }

    /// The queue records are delivered through.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Send everything pending now, regardless of the buffer length.
    ///
    /// Never called automatically; integrators call it on shutdown if they
    /// want the tail of the buffer delivered.
    pub async fn flush(&self) -> Option<usize> {
        self.queue.flush().await
    }

    fn begin(&self, req: &Request) -> Transaction {
        Transaction::begin(
            self.normalizer.normalize(req),
            (self.group)(req),
            client_ip(req),
        )
    }

    fn observe(&self, tx: Transaction, response: Response) -> Response {
        let (parts, body) = response.into_parts();
        let head = ResponseHead::from_parts(&parts);
        let assembler = self.assembler.clone();
        let queue = self.queue.clone();

        let body = CaptureBody::new(body, move |completion: Completion| {
            if !completion.is_finished() {
                tracing::debug!(
                    url = %tx.request.url,
                    termination = ?completion.termination,
                    "Response did not finish, transaction not recorded"
                );
                return;
            }
            let record = assembler.assemble(tx, &head, &completion.body);
            queue.push(record);
        });

        http::Response::from_parts(parts, body.boxed())
    }
}

impl fmt::Debug for CaptureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureLayer")
            .field("policy", self.normalizer.policy())
            .field("queue", &self.queue)
            .finish()
    }
}

impl MiddlewareLayer for CaptureLayer {
    fn call(&self, req: Request, next: BoxedNext) -> ResponseFuture {
        let layer = self.clone();

        Box::pin(async move {
            let tx = layer.begin(&req);
            let response = next(req).await;
            layer.observe(tx, response)
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Builder for [`CaptureLayer`].
///
/// An API key and a group function are required. The collector host is
/// required unless a custom [`Collector`] is supplied.
pub struct CaptureLayerBuilder {
    api_key: Option<String>,
    host: Option<String>,
    timeout_secs: u64,
    group: Option<GroupFn>,
    options: CaptureOptions,
    collector: Option<Arc<dyn Collector>>,
}

impl Default for CaptureLayerBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            host: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            group: None,
            options: CaptureOptions::default(),
            collector: None,
        }
    }
}

impl CaptureLayerBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Base URL of the collector.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Collector request timeout in seconds.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Function attributing each request to a caller. Runs when the request
    /// arrives.
    pub fn group<F>(mut self, group: F) -> Self
    where
        F: Fn(&Request) -> Group + Send + Sync + 'static,
    {
        self.group = Some(Arc::new(group));
        self
    }

    pub fn options(mut self, options: CaptureOptions) -> Self {
        self.options = options;
        self
    }

    /// Deliver through `collector` instead of posting to the host.
    pub fn collector<C: Collector>(mut self, collector: Arc<C>) -> Self {
        let collector: Arc<dyn Collector> = collector;
        self.collector = Some(collector);
        self
    }

    pub fn build(self) -> Result<CaptureLayer> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let group = self.group.ok_or(ConfigError::MissingGroup)?;

        let collector = match self.collector {
            Some(collector) => collector,
            None => {
                let config = CollectorConfig::new(self.host.unwrap_or_default(), api_key)?
                    .timeout(self.timeout_secs);
                let collector: Arc<dyn Collector> = Arc::new(HttpCollector::new(&config)?);
                collector
            }
        };

        let policy = self.options.policy();
        tracing::debug!(
            ?policy,
            buffer_length = self.options.threshold(),
            development = self.options.development,
            "Capture layer configured"
        );

        Ok(CaptureLayer {
            normalizer: RequestNormalizer::new(policy.clone()),
            assembler: TraceAssembler::new(policy, self.options.development),
            group,
            queue: DeliveryQueue::new(collector, self.options.threshold()),
        })
    }
}

/// First valid `x-forwarded-for` entry, then `x-real-ip`, then the
/// connected peer.
pub(crate) fn client_ip(req: &Request) -> String {
    let valid = |value: &str| {
        let value = value.trim();
        value.parse::<IpAddr>().ok().map(|_| value.to_string())
    };

    if let Some(ip) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').find_map(valid))
    {
        return ip;
    }

    if let Some(ip) = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(valid)
    {
        return ip;
    }

    req.extensions()
        .get::<Transport>()
        .and_then(|t| t.peer)
        .map(|peer| peer.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

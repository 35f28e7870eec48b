//! # apitrace-core
//!
//! HTTP traffic capture middleware.
//!
//! Every transaction passing through a [`CaptureLayer`] is turned into a
//! HAR-shaped [`TraceRecord`]: the request is normalized when it arrives,
//! the response body is observed on its way to the client, and field-level
//! redaction is applied to headers and structured bodies on both sides.
//! Records are buffered and posted in batches to a collector.
//!
//! ## Pipeline
//!
//! - [`redact`] - denylist / allowlist filtering of named fields
//! - [`codec`] - body decoding and `postData` encoding, cycle-safe
//! - [`normalize`] - request to [`TraceRequest`]
//! - [`capture`] - response body and writer decorators
//! - [`assemble`] - transaction to [`TraceRecord`]
//! - [`queue`] - batching and delivery
//! - [`layer`] - the middleware tying it together
//!
//! ## Example
//!
//! ```ignore
//! use apitrace_core::{CaptureLayer, CaptureOptions, Group, LayerStack};
//!
//! let capture = CaptureLayer::builder()
//!     .api_key("my-api-key")
//!     .host("https://collector.example.com")
//!     .group(|req| Group::new(req.uri().path()))
//!     .options(CaptureOptions::new().denylist(["password"]))
//!     .build()?;
//!
//! let mut stack = LayerStack::new();
//! stack.push(Box::new(capture));
//! ```

pub mod assemble;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod har;
pub mod layer;
pub mod middleware;
pub mod normalize;
pub mod queue;
pub mod redact;

pub use assemble::{ResponseHead, TraceAssembler, Transaction};
pub use capture::{CaptureBody, CaptureWriter, Completion, Termination};
pub use codec::{BodyNode, Node, RequestBody, CIRCULAR_BODY_PLACEHOLDER};
pub use config::{CaptureOptions, CollectorConfig, DEFAULT_BUFFER_LENGTH};
pub use error::{ConfigError, DeliveryError, Result};
pub use har::{Entry, Group, NameValue, PostData, TraceRecord, TraceRequest, TraceResponse};
pub use layer::{CaptureLayer, CaptureLayerBuilder, GroupFn};
pub use middleware::{
    BoxError, BoxedNext, LayerStack, MiddlewareLayer, NextService, Request, Response,
    ResponseFuture, Transport,
};
pub use normalize::{DecodedBody, RequestNormalizer};
pub use queue::{Collector, Credential, DeliveryQueue, HttpCollector};
pub use redact::{keep_only, mask_credential, redact, FieldNames, RedactionPolicy, REDACTED};

//! Hook contract between a host HTTP framework and the capture layer.
//!
//! The host hands every transaction to a chain of [`MiddlewareLayer`]s.
//! Requests arrive with their body already buffered; responses carry a
//! streaming [`Body`] so the capture layer can observe it on its way out.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Error type carried by response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming response body.
pub type Body = BoxBody<Bytes, BoxError>;

/// Incoming request with a buffered body.
pub type Request = http::Request<Bytes>;

/// Outgoing response.
pub type Response = http::Response<Body>;

/// Future returned by middleware and handlers.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// The rest of the chain after the current layer.
pub type BoxedNext = Arc<dyn Fn(Request) -> ResponseFuture + Send + Sync>;

/// Build a body from a complete buffer.
pub fn full(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// An empty body.
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed()
}

/// Connection details the host attaches as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transport {
    /// TLS terminated at this process.
    pub secure: bool,
    /// Address of the connected peer.
    pub peer: Option<SocketAddr>,
}

impl Transport {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn tls() -> Self {
        Self {
            secure: true,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// A layer the host calls once per transaction.
pub trait MiddlewareLayer: Send + Sync + 'static {
    /// Handle a request, calling `next` to continue the chain.
    fn call(&self, req: Request, next: BoxedNext) -> ResponseFuture;

    /// Clone this middleware into a boxed trait object.
    fn clone_box(&self) -> Box<dyn MiddlewareLayer>;
}

impl Clone for Box<dyn MiddlewareLayer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Layers applied around a final handler.
#[derive(Clone, Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn MiddlewareLayer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer. Layers run in the order they are added (outermost first).
    pub fn push(&mut self, layer: Box<dyn MiddlewareLayer>) {
        self.layers.push(layer);
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Wrap `handler` in every layer and return the entry point.
    pub fn wrap(&self, handler: BoxedNext) -> BoxedNext {
        let mut next = handler;

        for layer in self.layers.iter().rev() {
            let layer = layer.clone_box();
            let inner = next;
            next = Arc::new(move |req: Request| {
                let layer = layer.clone_box();
                let inner = inner.clone();
                Box::pin(async move { layer.call(req, inner).await }) as ResponseFuture
            });
        }

        next
    }

    /// Run one request through the stack.
    pub fn execute(&self, req: Request, handler: BoxedNext) -> ResponseFuture {
        self.wrap(handler)(req)
    }
}

/// Adapts a [`BoxedNext`] chain to a `tower::Service`.
#[derive(Clone)]
pub struct NextService {
    next: BoxedNext,
}

impl NextService {
    pub fn new(next: BoxedNext) -> Self {
        Self { next }
    }
}

impl Service<Request> for NextService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let next = self.next.clone();
        Box::pin(async move { Ok(next(req).await) })
    }
}

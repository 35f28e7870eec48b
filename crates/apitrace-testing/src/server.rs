use super::reply::MockReply;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type Result<T> = std::result::Result<T, GenericError>;

/// A stand-in for the metrics collector.
///
/// Accepts any request, records it, and answers with the reply registered
/// for its path (an empty `200 OK` by default).
pub struct MockCollector {
    addr: SocketAddr,
    state: Arc<Mutex<CollectorState>>,
    arrivals: Arc<Notify>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct CollectorState {
    replies: HashMap<String, MockReply>,
    fallback: MockReply,
    requests: Vec<RecordedRequest>,
}

/// A request the collector received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    /// The `Authorization` header, if any
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }

    /// The body parsed as JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl MockCollector {
    /// Start a collector on a random port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(CollectorState::default()));
        let arrivals = Arc::new(Notify::new());

        let state_clone = state.clone();
        let arrivals_clone = arrivals.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stop_future = shutdown_rx;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state_clone.clone();
                                let arrivals = arrivals_clone.clone();

                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        handle_request(req, state.clone(), arrivals.clone())
                                    });
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        tracing::debug!(error = %err, "Mock collector connection closed with error");
                                    }
                                });
                            }
                            Err(e) => tracing::debug!(error = %e, "Mock collector accept error"),
                        }
                    }
                    _ = &mut stop_future => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            state,
            arrivals,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL to configure as the collector host
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serve `reply` for requests to `path`
    pub fn reply(&self, path: impl Into<String>, reply: MockReply) -> &Self {
        self.state.lock().unwrap().replies.insert(path.into(), reply);
        self
    }

    /// Serve `reply` for paths without a registered reply
    pub fn reply_by_default(&self, reply: MockReply) -> &Self {
        self.state.lock().unwrap().fallback = reply;
        self
    }

    /// Every request received so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Bodies of `POST /request` calls, each parsed as a JSON array
    pub fn batches(&self) -> Vec<Vec<serde_json::Value>> {
        self.requests()
            .iter()
            .filter(|r| r.method == http::Method::POST && r.path == "/request")
            .filter_map(|r| match r.json() {
                Some(serde_json::Value::Array(items)) => Some(items),
                _ => None,
            })
            .collect()
    }

    /// All delivered records, flattened across batches
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.batches().into_iter().flatten().collect()
    }

    /// Wait until at least `count` requests arrived.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.arrivals.notified();
                if self.state.lock().unwrap().requests.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<CollectorState>>,
    arrivals: Arc<Notify>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body_bytes = body.collect().await?.to_bytes();

    let reply = {
        let mut state = state.lock().unwrap();
        let path = parts.uri.path().to_string();
        let reply = state
            .replies
            .get(&path)
            .unwrap_or(&state.fallback)
            .clone();

        state.requests.push(RecordedRequest {
            method: parts.method,
            path,
            headers: parts.headers,
            body: body_bytes,
        });
        reply
    };
    arrivals.notify_waiters();

    let mut response = Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        response = response.header(name, value);
    }
    Ok(response.body(Full::new(reply.body))?)
}

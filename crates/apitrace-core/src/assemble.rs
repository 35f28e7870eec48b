//! Combines a normalized request, the captured response and timing data
//! into a [`TraceRecord`].

use crate::codec::{self, BodyNode};
use crate::har::{
    Content, Creator, Entry, Group, Har, Log, TraceRecord, TraceRequest, TraceResponse, Timings,
};
use crate::normalize::{header_list, resolve_mime_type};
use crate::redact::RedactionPolicy;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode, Version};
use std::time::{Duration, Instant};

/// State captured when the request arrived.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub request: TraceRequest,
    pub group: Group,
    pub client_ip: String,
    /// Wall-clock start, reported in the record.
    pub started_at: DateTime<Utc>,
    /// Monotonic start, used for durations.
    pub started: Instant,
}

impl Transaction {
    /// Start a transaction now.
    pub fn begin(request: TraceRequest, group: Group, client_ip: impl Into<String>) -> Self {
        Self {
            request,
            group,
            client_ip: client_ip.into(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Status line and headers of the response, kept once the body has been
/// handed back to the host.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn from_parts(parts: &http::response::Parts) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }
}

/// Builds records under the layer's redaction policy.
#[derive(Debug, Clone, Default)]
pub struct TraceAssembler {
    policy: RedactionPolicy,
    development: bool,
}

impl TraceAssembler {
    pub fn new(policy: RedactionPolicy, development: bool) -> Self {
        Self {
            policy,
            development,
        }
    }

    /// Assemble the record for a finished transaction.
    pub fn assemble(&self, tx: Transaction, head: &ResponseHead, body: &Bytes) -> TraceRecord {
        let elapsed = millis(tx.started.elapsed());
        let pageref = tx
            .request
            .url
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        let entry = Entry {
            pageref,
            started_date_time: tx
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            time: elapsed,
            request: tx.request,
            response: self.response(head, body),
            timings: Timings {
                wait: elapsed,
                receive: 0,
            },
        };

        TraceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            group: tx.group,
            client_ip_address: tx.client_ip,
            development: self.development,
            request: Har {
                log: Log {
                    creator: Creator::current(),
                    entries: vec![entry],
                },
            },
        }
    }

    /// Build the response side of the record.
    pub fn response(&self, head: &ResponseHead, body: &Bytes) -> TraceResponse {
        let mime_type = resolve_mime_type(&head.headers);
        let content_type = head
            .headers
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();

        TraceResponse {
            status: head.status.as_u16(),
            status_text: head
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            http_version: format!("{:?}", head.version),
            headers: self.policy.apply(header_list(&head.headers)),
            cookies: Vec::new(),
            content: Content {
                text: self.response_text(&mime_type, body),
                size: body.len(),
                mime_type: content_type,
            },
            redirect_url: head
                .headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            headers_size: -1,
            body_size: body.len() as i64,
        }
    }

    /// JSON bodies are redacted like request bodies; anything else is kept
    /// as text.
    fn response_text(&self, mime_type: &str, body: &Bytes) -> String {
        let text = String::from_utf8_lossy(body);
        if !codec::is_json(mime_type) {
            return text.into_owned();
        }

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => codec::best_effort_text(&self.policy.apply(BodyNode::from(value))),
            Err(_) => text.into_owned(),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::NameValue;
    use crate::redact::{FieldNames, REDACTED};

    fn trace_request(url: &str) -> TraceRequest {
        TraceRequest {
            method: "GET".into(),
            url: url.into(),
            http_version: "HTTP/1.1".into(),
            headers: Vec::new(),
            query_string: Vec::new(),
            post_data: None,
            cookies: Vec::new(),
            headers_size: -1,
            body_size: -1,
        }
    }

    fn head(status: StatusCode, headers: &[(&'static str, &'static str)]) -> ResponseHead {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, value.parse().unwrap());
        }
        ResponseHead {
            status,
            version: Version::HTTP_11,
            headers: map,
        }
    }

    #[test]
    fn test_record_layout() {
        let tx = Transaction::begin(
            trace_request("https://example.com/items?page=2"),
            Group::new("acct-1").with_email("ops@example.com"),
            "10.0.0.1",
        );
        let head = head(StatusCode::OK, &[("content-type", "text/plain")]);

        let record = TraceAssembler::new(RedactionPolicy::None, true).assemble(
            tx,
            &head,
            &Bytes::from("done"),
        );

        assert_eq!(record.group.id, "acct-1");
        assert_eq!(record.client_ip_address, "10.0.0.1");
        assert!(record.development);
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());

        let entry = record.entry().unwrap();
        assert_eq!(entry.pageref, "https://example.com/items");
        assert_eq!(entry.timings.wait, entry.time);
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.status_text, "OK");
        assert_eq!(entry.response.content.text, "done");
        assert_eq!(entry.response.content.size, 4);
        assert_eq!(entry.response.body_size, 4);
        assert_eq!(entry.response.content.mime_type, "text/plain");
        assert!(DateTime::parse_from_rfc3339(&entry.started_date_time).is_ok());
    }

    #[test]
    fn test_record_json_shape() {
        let tx = Transaction::begin(trace_request("http://h/"), Group::new("g"), "127.0.0.1");
        let record = TraceAssembler::default().assemble(
            tx,
            &head(StatusCode::NO_CONTENT, &[]),
            &Bytes::new(),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("_id").is_some());
        assert!(value.get("clientIPAddress").is_some());
        let entry = &value["request"]["log"]["entries"][0];
        assert_eq!(entry["response"]["redirectURL"], "");
        assert_eq!(entry["response"]["status"], 204);
        assert_eq!(
            value["request"]["log"]["creator"]["name"],
            env!("CARGO_PKG_NAME")
        );
    }

    #[test]
    fn test_json_response_is_redacted() {
        let policy = RedactionPolicy::Deny(["token", "set-cookie"].into_iter().collect::<FieldNames>());
        let head = head(
            StatusCode::CREATED,
            &[
                ("content-type", "application/json; charset=utf-8"),
                ("set-cookie", "sid=1"),
                ("location", "/sessions/1"),
            ],
        );

        let response = TraceAssembler::new(policy, false).response(
            &head,
            &Bytes::from(r#"{"user":"ada","token":"abc"}"#),
        );

        assert_eq!(
            response.content.text,
            r#"{"user":"ada","token":"[REDACTED]"}"#
        );
        assert_eq!(
            response.content.mime_type,
            "application/json; charset=utf-8"
        );
        assert!(response
            .headers
            .contains(&NameValue::new("set-cookie", REDACTED)));
        assert_eq!(response.redirect_url, "/sessions/1");
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_micros(2_500)), 2);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_invalid_json_response_kept_as_text() {
        let response = TraceAssembler::default().response(
            &head(StatusCode::OK, &[("content-type", "application/json")]),
            &Bytes::from("{broken"),
        );
        assert_eq!(response.content.text, "{broken");
    }
}

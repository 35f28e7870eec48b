//! Turns a live request into a [`TraceRequest`].
//!
//! Every step tolerates missing or malformed input and falls back to an
//! empty value, so capture can never fail the host request.

use crate::codec::{self, BodyNode, RequestBody};
use crate::har::{NameValue, TraceRequest};
use crate::middleware::{Request, Transport};
use crate::redact::{mask_credential, RedactionPolicy};
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use http::HeaderMap;
use url::form_urlencoded;
use url::Url;

/// Authority used to split path from query. The real host may be redacted,
/// so it never takes part in parsing.
const PLACEHOLDER_BASE: &str = "https://apitrace.invalid";

/// Request extension carrying a body the host already decoded.
///
/// When present it takes precedence over the raw buffered bytes.
#[derive(Debug, Clone)]
pub struct DecodedBody(pub BodyNode);

/// Builds trace requests under a fixed redaction policy.
#[derive(Debug, Clone, Default)]
pub struct RequestNormalizer {
    policy: RedactionPolicy,
}

impl RequestNormalizer {
    pub fn new(policy: RedactionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RedactionPolicy {
        &self.policy
    }

    /// Build the trace view of `req`.
    pub fn normalize(&self, req: &Request) -> TraceRequest {
        let headers = req.headers();
        let protocol = resolve_protocol(req);
        let host = resolve_host(req);
        let mime_type = resolve_mime_type(headers);

        let body = request_body(req).map(|body| {
            match codec::decode(body, &mime_type) {
                RequestBody::Structured(node) => RequestBody::Structured(self.policy.apply(node)),
                text => text,
            }
        });

        let header_list = self.policy.apply(header_list(headers));
        let post_data = codec::encode(body.as_ref(), &mime_type);

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let (path, query_string) = split_target(path_and_query);

        let header_list = header_list
            .into_iter()
            .map(|h| {
                if h.name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                    let masked = mask_credential(&h.value);
                    NameValue::new(h.name, masked)
                } else {
                    h
                }
            })
            .collect();

        TraceRequest {
            method: req.method().to_string(),
            url: build_url(&protocol, &host, &path, &query_string),
            http_version: format!("{:?}", req.version()),
            headers: header_list,
            query_string,
            post_data,
            cookies: Vec::new(),
            headers_size: -1,
            body_size: -1,
        }
    }
}

/// First token of a possibly comma-joined header value.
fn first_token(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `x-forwarded-proto`, then the transport, then the URI scheme.
pub(crate) fn resolve_protocol(req: &Request) -> String {
    if let Some(proto) = first_token(req.headers(), "x-forwarded-proto") {
        return proto.to_ascii_lowercase();
    }

    let secure = req
        .extensions()
        .get::<Transport>()
        .map(|t| t.secure)
        .unwrap_or_else(|| req.uri().scheme_str() == Some("https"));

    let protocol = if secure { "https" } else { "http" };
    protocol.to_string()
}

/// `x-forwarded-host`, then `Host`, then the URI authority.
pub(crate) fn resolve_host(req: &Request) -> String {
    first_token(req.headers(), "x-forwarded-host")
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// MIME essence of `Content-Type`, or an empty string.
pub(crate) fn resolve_mime_type(headers: &HeaderMap) -> String {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return String::new();
    };

    let parsed = value.to_str().ok().and_then(codec::parse_mime_type);
    match parsed {
        Some(mime) => mime,
        None => {
            tracing::debug!(content_type = ?value, "Unparseable content type, capturing without one");
            String::new()
        }
    }
}

/// Headers as a name/value list, values rendered as (lossy) strings.
///
/// `HeaderMap` keeps names in first-seen order but groups every value of a
/// repeated name under its first occurrence.
pub(crate) fn header_list(headers: &HeaderMap) -> Vec<NameValue> {
    headers
        .iter()
        .map(|(name, value)| {
            NameValue::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn request_body(req: &Request) -> Option<RequestBody> {
    if let Some(DecodedBody(node)) = req.extensions().get::<DecodedBody>() {
        return Some(RequestBody::Structured(node.clone()));
    }

    let bytes = req.body();
    if bytes.is_empty() {
        None
    } else {
        Some(RequestBody::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }
}

/// Split a request target into its path and decoded query pairs.
fn split_target(path_and_query: &str) -> (String, Vec<NameValue>) {
    let parsed = Url::parse(PLACEHOLDER_BASE).and_then(|base| base.join(path_and_query));

    match parsed {
        Ok(url) => {
            let query = url
                .query_pairs()
                .map(|(name, value)| NameValue::new(name, value))
                .collect();
            (url.path().to_string(), query)
        }
        Err(e) => {
            tracing::debug!(target_uri = path_and_query, error = %e, "Unparseable request target");
            ("/".to_string(), Vec::new())
        }
    }
}

fn build_url(protocol: &str, host: &str, path: &str, query: &[NameValue]) -> String {
    let mut url = format!("{}://{}{}", protocol, host, path);
    if !query.is_empty() {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter().map(|q| (q.name.as_str(), q.value.as_str())))
            .finish();
        url.push('?');
        url.push_str(&encoded);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CIRCULAR_BODY_PLACEHOLDER;
    use crate::redact::{FieldNames, REDACTED};
    use bytes::Bytes;
    use http::Method;
    use serde_json::json;

    fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::from(body.to_string())).unwrap()
    }

    fn header<'a>(trace: &'a TraceRequest, name: &str) -> Option<&'a str> {
        trace
            .headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    fn deny(names: &[&str]) -> RedactionPolicy {
        RedactionPolicy::Deny(names.iter().copied().collect::<FieldNames>())
    }

    fn allow(names: &[&str]) -> RedactionPolicy {
        RedactionPolicy::Allow(names.iter().copied().collect::<FieldNames>())
    }

    #[test]
    fn test_end_to_end_json_request() {
        let req = request(
            Method::POST,
            "/widgets?x=1",
            &[
                ("host", "api.example.com"),
                ("content-type", "application/json"),
                ("authorization", "Bearer secret123"),
            ],
            r#"{"a":1}"#,
        );

        let trace = RequestNormalizer::default().normalize(&req);

        assert_eq!(trace.method, "POST");
        assert_eq!(trace.url, "http://api.example.com/widgets?x=1");
        assert_eq!(trace.http_version, "HTTP/1.1");
        assert_eq!(
            trace.post_data.as_ref().unwrap().text.as_deref(),
            Some(r#"{"a":1}"#)
        );
        assert_eq!(trace.query_string, vec![NameValue::new("x", "1")]);

        let auth = header(&trace, "authorization").unwrap();
        assert_ne!(auth, "Bearer secret123");
        assert_eq!(auth, mask_credential("Bearer secret123"));
        assert_eq!(trace.headers_size, -1);
        assert_eq!(trace.body_size, -1);
        assert!(trace.cookies.is_empty());
    }

    #[test]
    fn test_forwarded_headers_win() {
        let req = request(
            Method::GET,
            "/a",
            &[
                ("host", "internal:8080"),
                ("x-forwarded-proto", "HTTPS, http"),
                ("x-forwarded-host", "public.example.com"),
            ],
            "",
        );

        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(trace.url, "https://public.example.com/a");
    }

    #[test]
    fn test_transport_security_flag() {
        let mut req = request(Method::GET, "/secure", &[("host", "example.com")], "");
        req.extensions_mut().insert(Transport::tls());

        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(trace.url, "https://example.com/secure");
    }

    #[test]
    fn test_query_multiplicity_and_reencoding() {
        let req = request(
            Method::GET,
            "/search?q=a+b&tag=1&tag=2&empty=",
            &[("host", "example.com")],
            "",
        );

        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(
            trace.query_string,
            vec![
                NameValue::new("q", "a b"),
                NameValue::new("tag", "1"),
                NameValue::new("tag", "2"),
                NameValue::new("empty", ""),
            ]
        );
        assert_eq!(
            trace.url,
            "http://example.com/search?q=a+b&tag=1&tag=2&empty="
        );
    }

    #[test]
    fn test_host_redaction_does_not_break_path_parsing() {
        let req = request(
            Method::GET,
            "/users/7?page=2",
            &[("host", "example.com")],
            "",
        );

        let trace = RequestNormalizer::new(deny(&["host"])).normalize(&req);
        assert_eq!(header(&trace, "host"), Some(REDACTED));
        assert_eq!(trace.url, "http://example.com/users/7?page=2");
        assert_eq!(trace.query_string, vec![NameValue::new("page", "2")]);
    }

    #[test]
    fn test_json_body_keeps_key_order() {
        let req = request(
            Method::POST,
            "/",
            &[("content-type", "application/json")],
            r#"{"b":1,"a":{"z":true,"y":null}}"#,
        );

        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(
            trace.post_data.unwrap().text.unwrap(),
            r#"{"b":1,"a":{"z":true,"y":null}}"#
        );
    }

    #[test]
    fn test_repeated_header_grouped_under_first_occurrence() {
        let req = request(
            Method::GET,
            "/",
            &[("x-b", "1"), ("x-a", "2"), ("x-b", "3")],
            "",
        );

        let trace = RequestNormalizer::default().normalize(&req);
        let names: Vec<(&str, &str)> = trace
            .headers
            .iter()
            .map(|h| (h.name.as_str(), h.value.as_str()))
            .collect();
        assert_eq!(names, vec![("x-b", "1"), ("x-b", "3"), ("x-a", "2")]);
    }

    #[test]
    fn test_denylist_applies_to_body_and_headers() {
        let req = request(
            Method::POST,
            "/login",
            &[
                ("content-type", "application/json"),
                ("x-session", "abc"),
            ],
            r#"{"user":"ada","password":"hunter2"}"#,
        );

        let trace = RequestNormalizer::new(deny(&["password", "X-Session"])).normalize(&req);

        assert_eq!(header(&trace, "x-session"), Some(REDACTED));
        assert_eq!(
            trace.post_data.unwrap().text.unwrap(),
            r#"{"user":"ada","password":"[REDACTED]"}"#
        );
    }

    #[test]
    fn test_allowlist_applies_to_body_and_headers() {
        let req = request(
            Method::POST,
            "/login",
            &[("content-type", "application/json"), ("accept", "*/*")],
            r#"{"user":"ada","password":"hunter2"}"#,
        );

        let trace = RequestNormalizer::new(allow(&["user", "accept"])).normalize(&req);

        assert_eq!(header(&trace, "accept"), Some("*/*"));
        assert_eq!(header(&trace, "content-type"), Some(REDACTED));
        assert_eq!(
            trace.post_data.unwrap().text.unwrap(),
            r#"{"user":"ada","password":"[REDACTED]"}"#
        );
    }

    #[test]
    fn test_authorization_masked_under_every_policy() {
        let policies = [
            RedactionPolicy::None,
            deny(&["authorization"]),
            deny(&["other"]),
            allow(&["authorization"]),
            allow(&["other"]),
        ];

        for policy in policies {
            let req = request(
                Method::GET,
                "/",
                &[("authorization", "Bearer secret123")],
                "",
            );
            let trace = RequestNormalizer::new(policy.clone()).normalize(&req);
            let value = header(&trace, "authorization").unwrap();

            assert!(!value.contains("secret123"), "{:?} leaked {}", policy, value);
            assert_eq!(value.chars().count(), 16);
        }
    }

    #[test]
    fn test_unparseable_content_type_omits_post_data() {
        let req = request(
            Method::POST,
            "/upload",
            &[("content-type", "definitely not a type")],
            "payload",
        );

        let trace = RequestNormalizer::default().normalize(&req);
        assert!(trace.post_data.is_none());

        let value = serde_json::to_value(&trace).unwrap();
        assert!(value.get("postData").is_none());
    }

    #[test]
    fn test_form_body_params() {
        let req = request(
            Method::POST,
            "/form",
            &[("content-type", "application/x-www-form-urlencoded")],
            "name=ada&token=s3cr3t",
        );

        let trace = RequestNormalizer::new(deny(&["token"])).normalize(&req);
        assert_eq!(
            trace.post_data.unwrap().params.unwrap(),
            vec![
                NameValue::new("name", "ada"),
                NameValue::new("token", REDACTED),
            ]
        );
    }

    #[test]
    fn test_text_body_is_not_redacted() {
        let req = request(
            Method::POST,
            "/notes",
            &[("content-type", "text/plain")],
            "password=hunter2",
        );

        let trace = RequestNormalizer::new(deny(&["password"])).normalize(&req);
        assert_eq!(
            trace.post_data.unwrap().text.as_deref(),
            Some("password=hunter2")
        );
    }

    #[test]
    fn test_decoded_circular_body() {
        let root = BodyNode::from(json!({"id": 1}));
        root.insert("parent", root.clone());

        let mut req = request(
            Method::POST,
            "/graph",
            &[("content-type", "application/octet-stream")],
            "",
        );
        req.extensions_mut().insert(DecodedBody(root));

        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(
            trace.post_data.unwrap().text.as_deref(),
            Some(CIRCULAR_BODY_PLACEHOLDER)
        );
    }

    #[test]
    fn test_missing_host_degrades() {
        let req = request(Method::GET, "/bare", &[], "");
        let trace = RequestNormalizer::default().normalize(&req);
        assert_eq!(trace.url, "http:///bare");
    }
}

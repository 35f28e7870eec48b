//! HAR-shaped trace records.
//!
//! These types serialize to the camelCase layout of the HTTP Archive
//! format, which is what the collector ingests. Header and query lists keep
//! the multiplicity and order of the original transaction.

use serde::{Deserialize, Serialize};

/// A single `{name, value}` pair used for headers, query strings and form
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    /// Field name as it appeared on the wire.
    pub name: String,
    /// Field value, always rendered as a string.
    pub value: String,
}

impl NameValue {
    /// Create a new pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Request body representation.
///
/// Form bodies are carried as `params`, everything else as `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    /// Resolved MIME type without parameters.
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<NameValue>>,
}

impl PostData {
    /// Body carried as text.
    pub fn text(mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            text: Some(text.into()),
            params: None,
        }
    }

    /// Body carried as form parameters.
    pub fn params(mime_type: impl Into<String>, params: Vec<NameValue>) -> Self {
        Self {
            mime_type: mime_type.into(),
            text: None,
            params: Some(params),
        }
    }
}

/// Canonical, privacy-filtered view of the incoming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<NameValue>,
    pub query_string: Vec<NameValue>,
    /// Absent (not null) when no body or content type could be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
    /// Never populated yet.
    pub cookies: Vec<NameValue>,
    /// `-1`: unknown.
    pub headers_size: i64,
    /// `-1`: unknown.
    pub body_size: i64,
}

/// Captured response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub text: String,
    pub size: usize,
    pub mime_type: String,
}

/// Outgoing side of the transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<NameValue>,
    pub cookies: Vec<NameValue>,
    pub content: Content,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

/// Time spent per phase, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub wait: u64,
    pub receive: u64,
}

/// One request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Page the entry belongs to: the request URL without its query.
    pub pageref: String,
    /// RFC 3339 timestamp of the moment capture started.
    pub started_date_time: String,
    /// Total elapsed time in milliseconds.
    pub time: u64,
    pub request: TraceRequest,
    pub response: TraceResponse,
    pub timings: Timings,
}

/// Software that produced the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    pub version: String,
    pub comment: String,
}

impl Creator {
    /// Describe this crate and the platform it runs on.
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            comment: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

/// HAR log wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub creator: Creator,
    pub entries: Vec<Entry>,
}

/// Envelope around the log, named after the collector's payload layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Har {
    pub log: Log,
}

/// Logical caller a transaction is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier, such as an API key or account id.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Group {
    /// Create a group with just an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            email: None,
        }
    }

    /// Set a human-readable label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set a contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A complete record, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub group: Group,
    #[serde(rename = "clientIPAddress")]
    pub client_ip_address: String,
    pub development: bool,
    pub request: Har,
}

impl TraceRecord {
    /// The single entry every record carries.
    pub fn entry(&self) -> Option<&Entry> {
        self.request.log.entries.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> TraceRequest {
        TraceRequest {
            method: "GET".into(),
            url: "https://api.example.com/widgets".into(),
            http_version: "HTTP/1.1".into(),
            headers: vec![NameValue::new("accept", "*/*")],
            query_string: Vec::new(),
            post_data: None,
            cookies: Vec::new(),
            headers_size: -1,
            body_size: -1,
        }
    }

    #[test]
    fn test_post_data_omitted_when_absent() {
        let value = serde_json::to_value(sample_request()).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("postData"));
        assert_eq!(object["httpVersion"], "HTTP/1.1");
        assert_eq!(object["headersSize"], -1);
        assert_eq!(object["bodySize"], -1);
        assert_eq!(object["cookies"], json!([]));
    }

    #[test]
    fn test_post_data_params_layout() {
        let data = PostData::params(
            "application/x-www-form-urlencoded",
            vec![NameValue::new("a", "1")],
        );
        let value = serde_json::to_value(data).unwrap();

        assert_eq!(
            value,
            json!({
                "mimeType": "application/x-www-form-urlencoded",
                "params": [{"name": "a", "value": "1"}]
            })
        );
    }

    #[test]
    fn test_group_skips_empty_fields() {
        let value = serde_json::to_value(Group::new("acct-1").with_label("Acme")).unwrap();
        assert_eq!(value, json!({"id": "acct-1", "label": "Acme"}));
    }
}

//! Body decoding and encoding for trace records.
//!
//! A request body arrives either as raw text or as a structure the host has
//! already decoded. This module resolves the MIME type from `Content-Type`,
//! turns text into a structure when the type is recognizable, and finally
//! renders the body as HAR `postData`.
//!
//! Structures are [`BodyNode`] graphs. Nodes are shared handles, so a graph
//! may reference the same node twice or even loop back onto an ancestor.
//! Serialization walks the graph with an identity-keyed set of ancestors and
//! substitutes [`CIRCULAR_BODY_PLACEHOLDER`] as soon as a loop is found.

use crate::har::{NameValue, PostData};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// MIME type of URL-encoded form bodies.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Text recorded in place of a body that loops back onto itself.
pub const CIRCULAR_BODY_PLACEHOLDER: &str =
    "[apitrace could not serialize this body because it contains a circular reference]";

/// Raised when a structure cannot be serialized because it is cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("body contains a circular reference")]
pub struct CycleError;

/// One node of a decoded body.
#[derive(Debug, Clone)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<BodyNode>),
    /// Ordered entries; keys may repeat (form bodies keep multiplicity).
    Object(Vec<(String, BodyNode)>),
}

/// Shared handle to a [`Node`].
///
/// Cloning the handle does not copy the node: both handles observe the
/// same value, which is how cyclic structures are built.
#[derive(Clone)]
pub struct BodyNode(Arc<RwLock<Node>>);

impl BodyNode {
    /// Wrap a node.
    pub fn new(node: Node) -> Self {
        Self(Arc::new(RwLock::new(node)))
    }

    pub fn null() -> Self {
        Self::new(Node::Null)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(Node::String(value.into()))
    }

    /// An empty object.
    pub fn object() -> Self {
        Self::new(Node::Object(Vec::new()))
    }

    /// An empty array.
    pub fn array() -> Self {
        Self::new(Node::Array(Vec::new()))
    }

    /// Append an entry. Ignored unless this node is an object.
    pub fn insert(&self, key: impl Into<String>, child: BodyNode) {
        let mut node = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if let Node::Object(entries) = &mut *node {
            entries.push((key.into(), child));
        }
    }

    /// Append an element. Ignored unless this node is an array.
    pub fn push(&self, child: BodyNode) {
        let mut node = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if let Node::Array(items) = &mut *node {
            items.push(child);
        }
    }

    /// Copy of the node. Children stay shared.
    pub fn snapshot(&self) -> Node {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Top-level entries when this node is an object.
    pub fn entries(&self) -> Option<Vec<(String, BodyNode)>> {
        match self.snapshot() {
            Node::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// The string value when this node is a string.
    pub fn as_string(&self) -> Option<String> {
        match self.snapshot() {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether both handles point at the same node.
    pub fn ptr_eq(&self, other: &BodyNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Serialize as compact JSON text.
    pub fn to_json_string(&self) -> Result<String, CycleError> {
        let mut out = String::new();
        let mut ancestors = HashSet::new();
        write_json(self, &mut out, &mut ancestors)?;
        Ok(out)
    }
}

impl fmt::Debug for BodyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.snapshot() {
            Node::Null => "null".to_string(),
            Node::Bool(b) => b.to_string(),
            Node::Number(n) => n.to_string(),
            Node::String(s) => format!("{:?}", s),
            Node::Array(items) => format!("array[{}]", items.len()),
            Node::Object(entries) => format!("object[{}]", entries.len()),
        };
        write!(f, "BodyNode({})", kind)
    }
}

impl From<Value> for BodyNode {
    fn from(value: Value) -> Self {
        let node = match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::String(s),
            Value::Array(items) => Node::Array(items.into_iter().map(BodyNode::from).collect()),
            Value::Object(map) => Node::Object(
                map.into_iter()
                    .map(|(k, v)| (k, BodyNode::from(v)))
                    .collect(),
            ),
        };
        BodyNode::new(node)
    }
}

fn write_json(
    node: &BodyNode,
    out: &mut String,
    ancestors: &mut HashSet<usize>,
) -> Result<(), CycleError> {
    let id = node.identity();
    if ancestors.contains(&id) {
        return Err(CycleError);
    }

    match node.snapshot() {
        Node::Null => out.push_str("null"),
        Node::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        Node::Number(n) => out.push_str(&n.to_string()),
        Node::String(s) => out.push_str(&Value::String(s).to_string()),
        Node::Array(items) => {
            ancestors.insert(id);
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out, ancestors)?;
            }
            out.push(']');
            ancestors.remove(&id);
        }
        Node::Object(entries) => {
            ancestors.insert(id);
            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_json(value, out, ancestors)?;
            }
            out.push('}');
            ancestors.remove(&id);
        }
    }
    Ok(())
}

/// A request body as handed over by the host.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Raw text, not yet decoded.
    Text(String),
    /// A structure the host (or [`decode`]) already produced.
    Structured(BodyNode),
}

/// Extract the MIME essence (`type/subtype`, lowercased) from a
/// `Content-Type` value. Returns `None` when the value is malformed.
pub fn parse_mime_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    let (ty, subtype) = essence.split_once('/')?;
    if !is_token(ty) || !is_token(subtype) {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// `application/json` or any `application/<subtype>+json`.
pub fn is_json(mime_type: &str) -> bool {
    mime_type == "application/json"
        || (mime_type.starts_with("application/") && mime_type.ends_with("+json"))
}

pub fn is_form(mime_type: &str) -> bool {
    mime_type == FORM_URLENCODED
}

/// Turn raw text into a structure when the MIME type is recognizable.
///
/// Undecodable text and unknown types are returned unchanged.
pub fn decode(body: RequestBody, mime_type: &str) -> RequestBody {
    let text = match body {
        RequestBody::Text(text) => text,
        structured => return structured,
    };

    if is_json(mime_type) {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => RequestBody::Structured(BodyNode::from(value)),
            Err(e) => {
                tracing::debug!(error = %e, "Request body is not valid JSON, keeping it as text");
                RequestBody::Text(text)
            }
        }
    } else if is_form(mime_type) {
        let object = BodyNode::object();
        for (key, value) in decode_form(&text) {
            object.insert(key, BodyNode::string(value));
        }
        RequestBody::Structured(object)
    } else {
        RequestBody::Text(text)
    }
}

fn decode_form(text: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(text).unwrap_or_default()
}

/// Serialize a structure, falling back to the placeholder on cycles.
pub fn best_effort_text(node: &BodyNode) -> String {
    node.to_json_string()
        .unwrap_or_else(|_| CIRCULAR_BODY_PLACEHOLDER.to_string())
}

/// Render a body as HAR `postData`.
///
/// Returns `None` when no MIME type could be resolved.
pub fn encode(body: Option<&RequestBody>, mime_type: &str) -> Option<PostData> {
    if mime_type.is_empty() {
        return None;
    }

    if is_form(mime_type) {
        return Some(PostData::params(mime_type, form_params(body)));
    }

    let text = match body {
        Some(RequestBody::Text(text)) => Some(text.clone()),
        Some(RequestBody::Structured(node)) => Some(best_effort_text(node)),
        None if is_json(mime_type) => Some(String::new()),
        None => None,
    };

    Some(PostData {
        mime_type: mime_type.to_string(),
        text,
        params: None,
    })
}

fn form_params(body: Option<&RequestBody>) -> Vec<NameValue> {
    match body {
        None => Vec::new(),
        Some(RequestBody::Text(text)) => decode_form(text)
            .into_iter()
            .map(|(name, value)| NameValue::new(name, value))
            .collect(),
        Some(RequestBody::Structured(node)) => node
            .entries()
            .unwrap_or_default()
            .into_iter()
            .map(|(name, child)| {
                let value = child
                    .as_string()
                    .unwrap_or_else(|| best_effort_text(&child));
                NameValue::new(name, value)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn cyclic_object() -> BodyNode {
        let root = BodyNode::object();
        root.insert("name", BodyNode::string("loop"));
        root.insert("self", root.clone());
        root
    }

    #[test]
    fn test_parse_mime_type() {
        assert_eq!(
            parse_mime_type("application/json; charset=utf-8").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            parse_mime_type("Text/HTML").as_deref(),
            Some("text/html")
        );
        assert_eq!(parse_mime_type("not a mime type"), None);
        assert_eq!(parse_mime_type("/json"), None);
        assert_eq!(parse_mime_type(""), None);
    }

    #[test]
    fn test_json_family() {
        assert!(is_json("application/json"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/json+plain"));
        assert!(!is_json("application/xml"));
    }

    #[test]
    fn test_structured_json_is_serialized() {
        let body = RequestBody::Structured(BodyNode::from(json!({"a": 1})));
        let post = encode(Some(&body), "application/json").unwrap();
        assert_eq!(post.text.as_deref(), Some(r#"{"a":1}"#));
        assert!(post.params.is_none());
    }

    #[test]
    fn test_json_text_passes_through() {
        let body = RequestBody::Text("{ \"a\" : 1 }".into());
        let post = encode(Some(&body), "application/json").unwrap();
        assert_eq!(post.text.as_deref(), Some("{ \"a\" : 1 }"));
    }

    #[test]
    fn test_missing_json_body_is_empty_text() {
        let post = encode(None, "application/json").unwrap();
        assert_eq!(post.text.as_deref(), Some(""));
    }

    #[test]
    fn test_form_body_becomes_params() {
        let body = RequestBody::Text("a=1&b=two+words&a=3".into());
        let post = encode(Some(&body), FORM_URLENCODED).unwrap();

        assert!(post.text.is_none());
        assert_eq!(
            post.params.unwrap(),
            vec![
                NameValue::new("a", "1"),
                NameValue::new("b", "two words"),
                NameValue::new("a", "3"),
            ]
        );
    }

    #[test]
    fn test_missing_form_body_is_empty_params() {
        let post = encode(None, FORM_URLENCODED).unwrap();
        assert_eq!(post.params, Some(Vec::new()));
    }

    #[test]
    fn test_no_mime_type_means_no_post_data() {
        let body = RequestBody::Text("hello".into());
        assert!(encode(Some(&body), "").is_none());
        assert!(encode(None, "").is_none());
    }

    #[test]
    fn test_circular_body_uses_placeholder() {
        let body = RequestBody::Structured(cyclic_object());
        let post = encode(Some(&body), "application/octet-stream").unwrap();
        assert_eq!(post.text.as_deref(), Some(CIRCULAR_BODY_PLACEHOLDER));
    }

    #[test]
    fn test_shared_node_is_not_a_cycle() {
        let shared = BodyNode::string("x");
        let root = BodyNode::array();
        root.push(shared.clone());
        root.push(shared);

        assert_eq!(root.to_json_string().unwrap(), r#"["x","x"]"#);
    }

    #[test]
    fn test_decode_json_text() {
        let decoded = decode(RequestBody::Text(r#"{"k":"v"}"#.into()), "application/json");
        match decoded {
            RequestBody::Structured(node) => assert_eq!(node.entries().unwrap()[0].0, "k"),
            RequestBody::Text(_) => panic!("expected a structure"),
        }
    }

    #[test]
    fn test_decode_invalid_json_keeps_text() {
        let decoded = decode(RequestBody::Text("{oops".into()), "application/json");
        assert!(matches!(decoded, RequestBody::Text(ref t) if t == "{oops"));
    }

    #[test]
    fn test_decode_unknown_type_keeps_text() {
        let decoded = decode(RequestBody::Text("raw".into()), "text/plain");
        assert!(matches!(decoded, RequestBody::Text(ref t) if t == "raw"));
    }

    #[test]
    fn test_debug_does_not_recurse() {
        let rendered = format!("{:?}", cyclic_object());
        assert_eq!(rendered, "BodyNode(object[2])");
    }

    proptest! {
        #[test]
        fn prop_form_round_trip(pairs in proptest::collection::vec(("[a-zA-Z0-9 _.&=+%-]{1,12}", "[ -~]{0,16}"), 0..8)) {
            let encoded = serde_urlencoded::to_string(&pairs).unwrap();
            let post = encode(Some(&RequestBody::Text(encoded)), FORM_URLENCODED).unwrap();

            let expected: BTreeSet<(String, String)> = pairs.into_iter().collect();
            let actual: BTreeSet<(String, String)> = post
                .params
                .unwrap()
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect();
            prop_assert_eq!(expected, actual);
        }
    }
}

//! Field redaction for headers and decoded bodies.
//!
//! Redaction keeps the key and replaces its value with [`REDACTED`], so the
//! collector still sees that the field existed. Name matching is
//! case-insensitive. Only top-level fields of a mapping are considered;
//! bodies that are not mappings pass through untouched.

use crate::codec::{BodyNode, Node};
use crate::har::NameValue;
use std::collections::HashSet;

/// Value written in place of a hidden field.
pub const REDACTED: &str = "[REDACTED]";

const MASK_EDGE: usize = 4;
const MASK_FILL: usize = 8;

/// A case-insensitive set of field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldNames(HashSet<String>);

impl FieldNames {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is in the set, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_lowercase())
    }

    /// Whether the set has no names.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct names, after lowercasing.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> FromIterator<S> for FieldNames {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|name| name.into().to_ascii_lowercase())
                .collect(),
        )
    }
}

/// Which fields leave the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RedactionPolicy {
    /// Everything is sent.
    #[default]
    None,
    /// Listed fields are hidden.
    Deny(FieldNames),
    /// Only listed fields are sent; the rest are hidden.
    Allow(FieldNames),
}

impl RedactionPolicy {
    /// Resolve a policy from the configured lists. A denylist wins when
    /// both are present; empty lists count as absent.
    pub fn resolve(denylist: Option<FieldNames>, allowlist: Option<FieldNames>) -> Self {
        match (denylist, allowlist) {
            (Some(deny), _) if !deny.is_empty() => RedactionPolicy::Deny(deny),
            (_, Some(allow)) if !allow.is_empty() => RedactionPolicy::Allow(allow),
            _ => RedactionPolicy::None,
        }
    }

    /// Apply the policy to a set of fields.
    pub fn apply<F: FieldSet>(&self, fields: F) -> F {
        match self {
            RedactionPolicy::None => fields,
            RedactionPolicy::Deny(names) => redact(fields, names),
            RedactionPolicy::Allow(names) => keep_only(fields, names),
        }
    }
}

/// Something whose top-level fields can be hidden by name.
pub trait FieldSet: Sized {
    /// Replace the value of every field for which `hide` returns true.
    fn hide_where(self, hide: impl Fn(&str) -> bool) -> Self;
}

impl FieldSet for Vec<NameValue> {
    fn hide_where(self, hide: impl Fn(&str) -> bool) -> Self {
        self.into_iter()
            .map(|field| {
                if hide(&field.name) {
                    NameValue::new(field.name, REDACTED)
                } else {
                    field
                }
            })
            .collect()
    }
}

impl FieldSet for BodyNode {
    /// Objects get a fresh top-level node; children that stay visible are
    /// shared with the original. Anything else is returned as is.
    fn hide_where(self, hide: impl Fn(&str) -> bool) -> Self {
        let Some(entries) = self.entries() else {
            return self;
        };

        let entries = entries
            .into_iter()
            .map(|(key, child)| {
                if hide(&key) {
                    (key, BodyNode::string(REDACTED))
                } else {
                    (key, child)
                }
            })
            .collect();
        BodyNode::new(Node::Object(entries))
    }
}

/// Hide every field named in `denylist`.
pub fn redact<F: FieldSet>(fields: F, denylist: &FieldNames) -> F {
    fields.hide_where(|name| denylist.contains(name))
}

/// Hide every field not named in `allowlist`.
pub fn keep_only<F: FieldSet>(fields: F, allowlist: &FieldNames) -> F {
    fields.hide_where(|name| !allowlist.contains(name))
}

/// Mask a credential to a fixed-length string.
///
/// The first and last four characters survive so a credential can still be
/// told apart from another one. Values shorter than the mask itself are
/// masked completely, so at most half of any value is shown.
pub fn mask_credential(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let width = MASK_EDGE * 2 + MASK_FILL;

    if chars.len() < width {
        return "*".repeat(width);
    }

    let head: String = chars[..MASK_EDGE].iter().collect();
    let tail: String = chars[chars.len() - MASK_EDGE..].iter().collect();
    format!("{}{}{}", head, "*".repeat(MASK_FILL), tail)
}

//! Document selectors
//!
//! A selector describes which documents a provider applies to. Matching is
//! pure: it only inspects the document identity handed in and never touches
//! shared state, so registries can evaluate it on every snapshot.

use serde::{Deserialize, Serialize};

use crate::types::TextDocumentIdentity;

/// A single match pattern inside a [`DocumentSelector`].
///
/// On the wire this is either a bare pattern string (`"*"`) or an object with
/// optional `language` / `scheme` / `pattern` fields, any one of which is
/// enough to constrain the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentFilter {
    Pattern(String),
    Filter {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
}

impl DocumentFilter {
    /// Whether this filter matches the given document identity.
    pub fn matches(&self, document: &TextDocumentIdentity) -> bool {
        match self {
            DocumentFilter::Pattern(pattern) => pattern_matches(pattern, document.uri.as_str()),
            DocumentFilter::Filter { language, scheme, pattern } => {
                // An empty filter object constrains nothing and must not
                // silently become a match-all.
                if language.is_none() && scheme.is_none() && pattern.is_none() {
                    return false;
                }
                if let Some(language) = language {
                    if document.language_id.as_deref() != Some(language.as_str()) {
                        return false;
                    }
                }
                if let Some(scheme) = scheme {
                    if document.uri.scheme() != scheme {
                        return false;
                    }
                }
                if let Some(pattern) = pattern {
                    if !pattern_matches(pattern, document.uri.as_str()) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// An ordered sequence of filters; a document matches the selector if it
/// matches any filter in the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DocumentSelector(pub Vec<DocumentFilter>);

impl DocumentSelector {
    /// The `["*"]` selector matching every document.
    pub fn all() -> Self {
        DocumentSelector(vec![DocumentFilter::Pattern("*".into())])
    }

    pub fn matches(&self, document: &TextDocumentIdentity) -> bool {
        self.0.iter().any(|filter| filter.matches(document))
    }
}

impl From<Vec<DocumentFilter>> for DocumentSelector {
    fn from(filters: Vec<DocumentFilter>) -> Self {
        DocumentSelector(filters)
    }
}

/// Matches `pattern` against `text`, where `*` matches any (possibly empty)
/// substring. `"*"` alone matches everything.
fn pattern_matches(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, rest)) => {
            // Only single-star patterns are supported; a second star in the
            // suffix falls back to a literal comparison of the remainder.
            text.starts_with(prefix)
                && text.len() >= prefix.len() + rest.len()
                && text.ends_with(rest)
        }
    }
}

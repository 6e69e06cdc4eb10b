//! Plain wire types shared between the client and the extension host
//!
//! These mirror the JSON shapes exchanged over the connection and are kept
//! independent of any transport or UI layer. All structs serialize with
//! camelCase field names to match the wire format.

use serde::{Deserialize, Serialize};
use url::Url;

/// Zero-based line/character position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A location inside a document, optionally narrowed to a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub uri: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl Location {
    pub fn new(uri: Url) -> Self {
        Self { uri, range: None }
    }
}

/// Markup flavor of a [`MarkupContent`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkupKind {
    #[serde(rename = "plaintext")]
    PlainText,
    #[serde(rename = "markdown")]
    Markdown,
}

/// A human-readable string with a markup kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupContent {
    pub kind: MarkupKind,
    pub value: String,
}

impl MarkupContent {
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self { kind: MarkupKind::PlainText, value: value.into() }
    }

    pub fn markdown(value: impl Into<String>) -> Self {
        Self { kind: MarkupKind::Markdown, value: value.into() }
    }
}

/// Hover information for a document position.
///
/// A combined hover concatenates the `contents` of every provider that
/// answered, in provider registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hover {
    pub contents: Vec<MarkupContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

/// A single result from an issue results provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueResult {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identifies a document by URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: Url,
}

/// Parameters naming a document and a position inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl TextDocumentPositionParams {
    pub fn new(uri: Url, position: Position) -> Self {
        Self { text_document: TextDocumentIdentifier { uri }, position }
    }
}

/// The identity selectors are matched against: the document URI plus the
/// language id when the client knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentIdentity {
    pub uri: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_id: Option<String>,
}

impl TextDocumentIdentity {
    pub fn new(uri: Url) -> Self {
        Self { uri, language_id: None }
    }

    pub fn with_language(uri: Url, language_id: impl Into<String>) -> Self {
        Self { uri, language_id: Some(language_id.into()) }
    }
}

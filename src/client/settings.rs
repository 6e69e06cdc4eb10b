//! Settings edits
//!
//! The client applies structured edits (`{ path, value }`) to a JSON settings
//! document. Persistence and schema validation live elsewhere; this module
//! only owns the in-memory document and the path-walking updater, publishing
//! each new revision through a watch channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

/// One segment of a settings key path: an object property or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Property(String),
    Index(usize),
}

impl From<&str> for KeySegment {
    fn from(property: &str) -> Self {
        KeySegment::Property(property.to_owned())
    }
}

impl From<usize> for KeySegment {
    fn from(index: usize) -> Self {
        KeySegment::Index(index)
    }
}

/// Path addressing a (possibly nested) settings location.
pub type KeyPath = Vec<KeySegment>;

/// A single edit applied to the settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsEdit {
    pub path: KeyPath,
    pub value: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("empty key path")]
    EmptyPath,
    #[error("cannot index {found} with {segment:?}")]
    TypeMismatch { segment: KeySegment, found: &'static str },
    #[error("array index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Owns the mutable settings document for one session.
pub struct SettingsService {
    doc: watch::Sender<Value>,
}

impl Default for SettingsService {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsService {
    pub fn new() -> Self {
        let (doc, _) = watch::channel(Value::Object(serde_json::Map::new()));
        Self { doc }
    }

    /// Current settings document snapshot.
    pub fn current(&self) -> Value {
        self.doc.borrow().clone()
    }

    /// Revision stream; emits the current document and every later revision.
    pub fn watch(&self) -> watch::Receiver<Value> {
        self.doc.subscribe()
    }

    /// Applies `edit`, creating intermediate objects and arrays along the
    /// path as needed. An index equal to the array length appends.
    pub fn update(&self, edit: SettingsEdit) -> Result<(), SettingsError> {
        if edit.path.is_empty() {
            return Err(SettingsError::EmptyPath);
        }
        let mut next = self.doc.borrow().clone();
        apply_edit(&mut next, &edit.path, edit.value)?;
        info!(path = ?edit.path, "settings updated");
        self.doc.send_replace(next);
        Ok(())
    }
}

fn apply_edit(target: &mut Value, path: &[KeySegment], value: Value) -> Result<(), SettingsError> {
    let (segment, rest) = path.split_first().ok_or(SettingsError::EmptyPath)?;
    match segment {
        KeySegment::Property(name) => {
            if target.is_null() {
                *target = Value::Object(serde_json::Map::new());
            }
            let found = json_type_name(target);
            let object = target.as_object_mut().ok_or_else(|| SettingsError::TypeMismatch {
                segment: segment.clone(),
                found,
            })?;
            if rest.is_empty() {
                object.insert(name.clone(), value);
                return Ok(());
            }
            let child = object.entry(name.clone()).or_insert(Value::Null);
            apply_edit(child, rest, value)
        }
        KeySegment::Index(index) => {
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            let found = json_type_name(target);
            let array = match target.as_array_mut() {
                Some(array) => array,
                None => {
                    return Err(SettingsError::TypeMismatch { segment: segment.clone(), found });
                }
            };
            let len = array.len();
            if *index > len {
                return Err(SettingsError::IndexOutOfBounds { index: *index, len });
            }
            if *index == len {
                array.push(Value::Null);
            }
            if rest.is_empty() {
                array[*index] = value;
                return Ok(());
            }
            apply_edit(&mut array[*index], rest, value)
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Documents and the attachment URL fixup.
//!
//! A [`Document`] is a JSON object with a few reserved fields:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `_id` | Unique identifier (caller-assigned or generated) |
//! | `_rev` | Revision, assigned by the store on every write |
//! | `_deleted` | Deletion marker (logical delete) |
//! | `_attachments` | Attachment collection, keyed by attachment name |
//! | `attachmentUrl` | Derived by [`DocumentFixup`], never written by the store |
//!
//! Field order is preserved (`serde_json` with `preserve_order`), so "the first
//! attachment" is the first key as the document was written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifier field.
pub const ID_FIELD: &str = "_id";
/// Revision field.
pub const REV_FIELD: &str = "_rev";
/// Deletion marker field.
pub const DELETED_FIELD: &str = "_deleted";
/// Attachment collection field.
pub const ATTACHMENTS_FIELD: &str = "_attachments";
/// Derived attachment URL field (note: no underscore, singular).
pub const ATTACHMENT_URL_FIELD: &str = "attachmentUrl";

/// Generate a fresh random document identifier.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A schemaless JSON document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document (no id yet).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a document with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.set_id(id);
        doc
    }

    /// Build a document from a JSON value. Returns `None` unless the value is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style field insert.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    /// True when the document has no usable identifier (missing, non-string or empty).
    pub fn needs_id(&self) -> bool {
        self.id().map_or(true, str::is_empty)
    }

    pub fn rev(&self) -> Option<&str> {
        self.0.get(REV_FIELD).and_then(Value::as_str)
    }

    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.0.insert(REV_FIELD.to_string(), Value::String(rev.into()));
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(DELETED_FIELD), Some(Value::Bool(true)))
    }

    /// Set the deletion marker. Writing the result is how a document is deleted.
    pub fn mark_deleted(&mut self) {
        self.0.insert(DELETED_FIELD.to_string(), Value::Bool(true));
    }

    /// The attachment collection, if present and an object.
    pub fn attachments(&self) -> Option<&Map<String, Value>> {
        self.0.get(ATTACHMENTS_FIELD).and_then(Value::as_object)
    }

    /// Name of the first attachment in insertion order.
    pub fn first_attachment(&self) -> Option<&str> {
        self.attachments()
            .and_then(|attachments| attachments.keys().next())
            .map(String::as_str)
    }

    pub fn attachment_url(&self) -> Option<&str> {
        self.0.get(ATTACHMENT_URL_FIELD).and_then(Value::as_str)
    }

    /// True for internal/design documents, which never appear in user-facing snapshots.
    pub fn is_internal(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.id().is_some_and(|id| id.starts_with(prefix))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub id: String,
    pub rev: String,
}

/// Adds `attachmentUrl` to documents that carry attachments.
///
/// The URL points at the remote store: `<base>/<_id>/<first attachment name>`.
/// Attachment binaries are never fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFixup {
    base: String,
}

impl DocumentFixup {
    pub fn new(remote_address: impl Into<String>) -> Self {
        let base: String = remote_address.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url_for(&self, id: &str, attachment: &str) -> String {
        format!("{}/{}/{}", self.base, id, attachment)
    }

    /// Apply the fixup. Documents without attachments (or without an id) come back untouched.
    pub fn apply(&self, doc: Document) -> Document {
        let url = match (doc.id(), doc.first_attachment()) {
            (Some(id), Some(name)) => self.url_for(id, name),
            _ => return doc,
        };
        doc.with_field(ATTACHMENT_URL_FIELD, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Document::from_value(json!([1, 2])).is_none());
        assert!(Document::from_value(json!("x")).is_none());
        assert!(Document::from_value(json!({})).is_some());
    }

    #[test]
    fn test_id_rev_and_deleted() {
        let mut d = Document::with_id("a");
        assert_eq!(d.id(), Some("a"));
        assert!(d.rev().is_none());
        assert!(!d.is_deleted());

        d.set_rev("1-abc");
        d.mark_deleted();
        assert_eq!(d.rev(), Some("1-abc"));
        assert!(d.is_deleted());
    }

    #[test]
    fn test_needs_id() {
        assert!(Document::new().needs_id());
        assert!(Document::with_id("").needs_id());
        assert!(doc(json!({"_id": 42})).needs_id());
        assert!(!Document::with_id("x").needs_id());
    }

    #[test]
    fn test_is_internal() {
        assert!(Document::with_id("_design/tasks").is_internal("_d"));
        assert!(!Document::with_id("task-1").is_internal("_d"));
        assert!(!Document::new().is_internal("_d"));
        // Empty prefix disables filtering
        assert!(!Document::with_id("_design/tasks").is_internal(""));
    }

    #[test]
    fn test_fixup_adds_url_for_first_attachment() {
        let fixup = DocumentFixup::new("http://localhost:5984/tasks");
        let d = doc(json!({
            "_id": "doc-1",
            "_attachments": {
                "photo.jpg": {"content_type": "image/jpeg", "stub": true},
                "notes.txt": {"content_type": "text/plain", "stub": true}
            }
        }));

        let fixed = fixup.apply(d.clone());
        assert_eq!(
            fixed.attachment_url(),
            Some("http://localhost:5984/tasks/doc-1/photo.jpg")
        );
        // Everything else is preserved
        assert_eq!(fixed.get("_attachments"), d.get("_attachments"));
        assert_eq!(fixed.id(), Some("doc-1"));
    }

    #[test]
    fn test_fixup_leaves_plain_documents_unchanged() {
        let fixup = DocumentFixup::new("http://localhost:5984/tasks");
        let d = doc(json!({"_id": "doc-2", "title": "no attachments"}));
        assert_eq!(fixup.apply(d.clone()), d);
    }

    #[test]
    fn test_fixup_ignores_empty_attachment_collection() {
        let fixup = DocumentFixup::new("http://localhost:5984/tasks");
        let d = doc(json!({"_id": "doc-3", "_attachments": {}}));
        assert_eq!(fixup.apply(d.clone()), d);
    }

    #[test]
    fn test_fixup_trims_trailing_slash() {
        let fixup = DocumentFixup::new("http://localhost:5984/tasks/");
        assert_eq!(fixup.base(), "http://localhost:5984/tasks");
        assert_eq!(
            fixup.url_for("a", "b.png"),
            "http://localhost:5984/tasks/a/b.png"
        );
    }

    #[test]
    fn test_serde_transparent() {
        let d = doc(json!({"_id": "a", "n": 1}));
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"_id":"a","n":1}"#);
        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, d);
        assert_eq!(d.into_value(), json!({"_id": "a", "n": 1}));
    }
}

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Characters the store refuses inside a document id.
const FORBIDDEN_ID_CHARS: &[char] = &['/', '\\', '?', '#'];

/// The single entity type held by the projects container.
///
/// `id` is absent on create requests and assigned by the repository; it is the
/// partition key of the stored document and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl Project {
    /// A project that has not been saved yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Copy the known fields out of a raw store document.
    ///
    /// Everything else in the document (system properties such as `_rid`,
    /// `_etag`, `_ts`, or fields written by other clients) is dropped.
    pub fn from_document(document: &Value) -> StoreResult<Self> {
        let object = document.as_object().ok_or_else(|| {
            StoreError::InvalidDocument(format!("expected a JSON object, got {}", kind_of(document)))
        })?;

        let id = match object.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "document id must be a non-empty string, got {}",
                    kind_of(other)
                )));
            }
            None => {
                return Err(StoreError::InvalidDocument(
                    "document has no id".to_string(),
                ));
            }
        };

        let name = match object.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                return Err(StoreError::InvalidDocument(format!(
                    "document `{id}` has a non-string name ({})",
                    kind_of(other)
                )));
            }
        };

        Ok(Self { id: Some(id), name })
    }

    /// Build the document body sent to the store.
    pub fn to_document(&self) -> StoreResult<Value> {
        let id = self.id.as_deref().ok_or(StoreError::MissingId)?;
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(id.to_string()));
        object.insert("name".to_string(), Value::String(self.name.clone()));
        Ok(Value::Object(object))
    }
}

/// Reject ids the store cannot address as a path segment.
pub fn validate_id(id: &str) -> StoreResult<()> {
    if id.trim().is_empty() || id.contains(FORBIDDEN_ID_CHARS) {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_document_drops_unknown_fields() {
        let raw = json!({
            "id": "p-1",
            "name": "Alpha",
            "owner": "someone",
            "_rid": "abc==",
            "_etag": "\"0000\"",
            "_ts": 1700000000
        });
        let project = Project::from_document(&raw).expect("project");
        assert_eq!(project, Project::with_id("p-1", "Alpha"));
        assert_eq!(
            serde_json::to_value(&project).unwrap(),
            json!({"id": "p-1", "name": "Alpha"})
        );
    }

    #[test]
    fn from_document_requires_id() {
        let err = Project::from_document(&json!({"name": "x"})).expect_err("no id");
        assert!(matches!(err, StoreError::InvalidDocument(_)));

        let err = Project::from_document(&json!({"id": 7, "name": "x"})).expect_err("numeric id");
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn missing_name_reads_as_empty() {
        let project = Project::from_document(&json!({"id": "p-2"})).expect("project");
        assert_eq!(project.name, "");
    }

    #[test]
    fn to_document_needs_id() {
        assert!(matches!(
            Project::new("x").to_document(),
            Err(StoreError::MissingId)
        ));
    }

    #[test]
    fn unsaved_project_serializes_without_id() {
        let body = serde_json::to_value(Project::new("Alpha")).unwrap();
        assert_eq!(body, json!({"name": "Alpha"}));
    }

    #[test]
    fn validate_id_rejects_store_reserved_characters() {
        assert!(validate_id("8d0f7a2e-3c1b-4f7e-9a55-0c8c5d3b2f11").is_ok());
        for bad in ["", "   ", "a/b", "a\\b", "a?b", "a#b"] {
            assert!(
                matches!(validate_id(bad), Err(StoreError::InvalidId(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}

//! Workflow document validation.
//!
//! Validation never fails through `Result`: structural problems and
//! per-record problems are collected into a [`DocumentValidation`] and the
//! caller decides what is fatal.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::schema::SchemaRegistry;
use super::types::{is_truthy, ActionRecord, WorkflowDocument, ACTIONS_KEY, ACTION_FIELD};

/// Message for a document without an `actions` sequence.
pub const MISSING_ACTIONS: &str = "document must contain an actions sequence";

/// Outcome of validating a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentValidation {
    /// Errors in document order.
    pub errors: Vec<String>,
    /// The document, absent only when the top-level shape is wrong.
    pub document: Option<WorkflowDocument>,
}

impl DocumentValidation {
    /// Whether the document was produced and has no record errors.
    pub fn is_valid(&self) -> bool {
        self.document.is_some() && self.errors.is_empty()
    }

    /// Whether the top-level shape check failed.
    pub fn is_structural_failure(&self) -> bool {
        self.document.is_none()
    }

    fn structural() -> Self {
        Self {
            errors: vec![MISSING_ACTIONS.to_string()],
            document: None,
        }
    }
}

/// Validate a raw parsed document.
///
/// Checks for:
/// - An `actions` key holding a sequence (fail fast otherwise)
/// - Each record carrying an `action` type
/// - The type being known to the registry
/// - Required fields for that type being present and non-empty
pub fn validate_document(raw: Option<&Value>, registry: &SchemaRegistry) -> DocumentValidation {
    let Some(Value::Object(root)) = raw else {
        return DocumentValidation::structural();
    };
    let Some(Value::Array(items)) = root.get(ACTIONS_KEY) else {
        return DocumentValidation::structural();
    };

    for key in root.keys().filter(|k| k.as_str() != ACTIONS_KEY) {
        debug!(key = %key, "Ignoring unrecognized top-level key");
    }

    let actions: Vec<ActionRecord> = items
        .iter()
        .map(|item| match item {
            Value::Object(map) => ActionRecord::from_map(map.clone()),
            _ => ActionRecord::new(),
        })
        .collect();

    DocumentValidation {
        errors: validate_records(&actions, registry),
        document: Some(WorkflowDocument::new(actions)),
    }
}

/// Run the per-record checks over an ordered record list.
pub fn validate_records(records: &[ActionRecord], registry: &SchemaRegistry) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, record) in records.iter().enumerate() {
        validate_record(index, record, registry, &mut errors);
    }
    errors
}

/// Validate one record, appending its errors.
pub fn validate_record(
    index: usize,
    record: &ActionRecord,
    registry: &SchemaRegistry,
    errors: &mut Vec<String>,
) {
    let tag = match record.get(ACTION_FIELD) {
        Some(value) if is_truthy(value) => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        _ => {
            errors.push(format!("record at index {} missing action type", index));
            return;
        }
    };

    if !registry.is_known_type(&tag) {
        errors.push(format!("unknown action type '{}' at index {}", tag, index));
        return;
    }

    for field in registry.required_fields(&tag) {
        if field == ACTION_FIELD {
            continue;
        }
        if !record.has_value(field) {
            errors.push(format!(
                "type '{}' at index {} missing required field '{}'",
                tag, index, field
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::load_document;
    use serde_json::json;

    fn registry() -> &'static SchemaRegistry {
        SchemaRegistry::global()
    }

    #[test]
    fn test_missing_actions_is_structural() {
        for raw in [
            None,
            Some(json!(null)),
            Some(json!({})),
            Some(json!({ "steps": [] })),
            Some(json!({ "actions": "x" })),
            Some(json!({ "actions": { "a": 1 } })),
            Some(json!([1, 2])),
        ] {
            let result = validate_document(raw.as_ref(), registry());
            assert_eq!(result.errors, vec![MISSING_ACTIONS.to_string()]);
            assert!(result.document.is_none());
            assert!(result.is_structural_failure());
        }
    }

    #[test]
    fn test_empty_actions_is_valid() {
        let result = validate_document(Some(&json!({ "actions": [] })), registry());
        assert!(result.is_valid());
        assert_eq!(result.document.unwrap().len(), 0);
    }

    #[test]
    fn test_valid_document() {
        let raw = load_document(
            r#"
actions:
  - action: Extract
    name: read
    dataframe: d1
    location: s3://raw/d1.csv
  - action: Transform
    name: shape
    dataframe: d2
    transformations:
      - select * from d1
"#,
        )
        .unwrap();
        let result = validate_document(Some(&raw), registry());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.document.unwrap().len(), 2);
    }

    #[test]
    fn test_missing_action_type_continues() {
        let raw = json!({
            "actions": [
                { "name": "no type", "dataframe": "x" },
                { "action": "Extract", "name": "a", "dataframe": "d" }
            ]
        });
        let result = validate_document(Some(&raw), registry());
        assert_eq!(
            result.errors,
            vec![
                "record at index 0 missing action type".to_string(),
                "type 'Extract' at index 1 missing required field 'location'".to_string(),
            ]
        );
        assert_eq!(result.document.unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_type_reports_once() {
        let raw = json!({
            "actions": [
                { "action": "Frobnicate" },
                { "action": "Teleport", "name": "t" }
            ]
        });
        let result = validate_document(Some(&raw), registry());
        assert_eq!(
            result.errors,
            vec![
                "unknown action type 'Frobnicate' at index 0".to_string(),
                "unknown action type 'Teleport' at index 1".to_string(),
            ]
        );
        assert!(!result.errors.iter().any(|e| e.contains("missing required")));
    }

    #[test]
    fn test_required_field_count_matches_missing() {
        // Merge requires name, dataframe, sources, condition beyond action.
        let raw = json!({
            "actions": [
                { "action": "Merge", "name": "", "sources": [], "condition": "a.id = b.id" }
            ]
        });
        let result = validate_document(Some(&raw), registry());
        let missing: Vec<&String> = result
            .errors
            .iter()
            .filter(|e| e.contains("missing required field"))
            .collect();
        assert_eq!(missing.len(), 3);
        assert!(result.errors.iter().any(|e| e.ends_with("'name'")));
        assert!(result.errors.iter().any(|e| e.ends_with("'dataframe'")));
        assert!(result.errors.iter().any(|e| e.ends_with("'sources'")));
    }

    #[test]
    fn test_non_mapping_record_keeps_index() {
        let raw = json!({
            "actions": [
                "just a string",
                { "action": "Include", "name": "i", "dataframe": "d", "path": "other.yaml" }
            ]
        });
        let result = validate_document(Some(&raw), registry());
        assert_eq!(
            result.errors,
            vec!["record at index 0 missing action type".to_string()]
        );
        let doc = result.document.unwrap();
        assert_eq!(doc.len(), 2);
        assert!(doc.actions[0].is_empty());
    }

    #[test]
    fn test_non_string_action_is_unknown() {
        let raw = json!({ "actions": [ { "action": 42, "name": "n", "dataframe": "d" } ] });
        let result = validate_document(Some(&raw), registry());
        assert_eq!(
            result.errors,
            vec!["unknown action type '42' at index 0".to_string()]
        );
    }

    #[test]
    fn test_extra_top_level_keys_ignored() {
        let raw = json!({ "version": 2, "actions": [] });
        let result = validate_document(Some(&raw), registry());
        assert!(result.is_valid());
    }
}

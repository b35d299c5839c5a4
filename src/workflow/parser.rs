//! Workflow document (de)serializer.
//!
//! `load_document` and `dump_document` are the opaque text boundary: the
//! rest of the engine only sees `serde_json::Value` and record lists.

use serde_json::Value;
use std::path::Path;

use super::schema::SchemaRegistry;
use super::types::WorkflowDocument;
use super::validator::{validate_document, DocumentValidation};
use crate::error::{Error, Result};

/// Parse document text (YAML, or JSON as a YAML subset) into a raw value.
pub fn load_document(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::Parse("Empty workflow document".to_string()));
    }

    serde_yaml::from_str(text).map_err(|e| Error::Parse(format!("Invalid YAML: {}", e)))
}

/// Serialize a document back to YAML text.
pub fn dump_document(document: &WorkflowDocument) -> Result<String> {
    Ok(serde_yaml::to_string(document)?)
}

/// Load and validate document text in one step.
///
/// Only text the deserializer cannot read at all fails here; shape and
/// record problems come back inside the validation report.
pub fn parse_document(text: &str, registry: &SchemaRegistry) -> Result<DocumentValidation> {
    let raw = load_document(text)?;
    Ok(validate_document(Some(&raw), registry))
}

/// Load and validate a document file.
pub fn parse_document_file(path: &Path, registry: &SchemaRegistry) -> Result<DocumentValidation> {
    let content = std::fs::read_to_string(path)?;
    parse_document(&content, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ActionKind, ActionRecord};
    use serde_json::json;

    #[test]
    fn test_parse_simple_document() {
        let yaml = r#"
actions:
  - action: Extract
    name: read customers
    dataframe: customers
    location: s3://raw/customers.parquet
    format: parquet

  - action: Load
    name: publish
    dataframe: customers
    destination: warehouse.customers
"#;

        let result = parse_document(yaml, SchemaRegistry::global()).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        let doc = result.document.unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.actions[0].kind(), Some(ActionKind::Extract));
        assert_eq!(doc.actions[1].get("destination"), Some(&json!("warehouse.customers")));
    }

    #[test]
    fn test_parse_json_text() {
        let text = r#"{"actions": [{"action": "Include", "name": "i", "dataframe": "d", "path": "x.yaml"}]}"#;
        let result = parse_document(text, SchemaRegistry::global()).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_parse_empty_document() {
        let err = parse_document("   \n", SchemaRegistry::global()).unwrap_err();
        assert!(err.to_string().to_lowercase().contains("empty workflow document"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_document("actions: [broken", SchemaRegistry::global()).unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().to_lowercase().contains("invalid yaml"));
    }

    #[test]
    fn test_parse_without_actions_key() {
        let result = parse_document("steps: []", SchemaRegistry::global()).unwrap();
        assert!(result.is_structural_failure());
    }

    #[test]
    fn test_dump_then_load_keeps_order_and_content() {
        let doc = WorkflowDocument::new(vec![
            ActionRecord::with_kind(ActionKind::Extract, "a", "d1").field("location", "p"),
            ActionRecord::with_kind(ActionKind::Transform, "b", "d2")
                .field("transformations", json!(["select * from d1"])),
        ]);

        let text = dump_document(&doc).unwrap();
        assert!(text.starts_with("actions:"));

        let reparsed = parse_document(&text, SchemaRegistry::global())
            .unwrap()
            .document
            .unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_parse_document_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yaml");
        std::fs::write(
            &path,
            "actions:\n  - action: Purge\n    name: p\n    dataframe: d\n    target: tmp\n",
        )
        .unwrap();

        let result = parse_document_file(&path, SchemaRegistry::global()).unwrap();
        assert!(result.is_valid());

        let missing = parse_document_file(&dir.path().join("nope.yaml"), SchemaRegistry::global());
        assert_eq!(missing.unwrap_err().code(), "IO_ERROR");
    }
}

//! Action-type schema registry.
//!
//! A static table mapping each type tag to its required and optional
//! fields plus display metadata. The table is data, not code: it can be
//! swapped by loading another YAML/JSON table of the same shape.
//!
//! The registry also produces a JSON Schema for whole documents, used
//! for an optional strict structural check of imported files.

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use super::types::{ActionKind, ACTIONS_KEY, ACTION_FIELD, DATAFRAME_FIELD, NAME_FIELD};
use crate::error::{Error, Result};

/// Fields every action carries regardless of type.
pub const UNIVERSAL_FIELDS: [&str; 3] = [ACTION_FIELD, NAME_FIELD, DATAFRAME_FIELD];

/// Schema for a single action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Type tag (e.g. "Extract")
    #[serde(rename = "type")]
    pub type_tag: String,

    /// Required fields, including the universal ones
    pub required_fields: Vec<String>,

    /// Optional fields
    #[serde(default)]
    pub optional_fields: Vec<String>,

    /// Node color for the graph view
    #[serde(default = "default_color")]
    pub display_color: String,

    /// Node icon name for the graph view
    #[serde(default = "default_icon")]
    pub display_icon: String,
}

fn default_color() -> String {
    "#64748b".to_string()
}

fn default_icon() -> String {
    "box".to_string()
}

impl SchemaDefinition {
    fn builtin(kind: ActionKind, extra: &[&str], optional: &[&str], color: &str, icon: &str) -> Self {
        Self {
            type_tag: kind.as_str().to_string(),
            required_fields: UNIVERSAL_FIELDS
                .iter()
                .chain(extra.iter())
                .map(|s| s.to_string())
                .collect(),
            optional_fields: optional.iter().map(|s| s.to_string()).collect(),
            display_color: color.to_string(),
            display_icon: icon.to_string(),
        }
    }

    /// Whether a field name is declared by this schema.
    pub fn declares(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
            || self.optional_fields.iter().any(|f| f == field)
    }
}

/// Lookup table of action schemas.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    definitions: Vec<SchemaDefinition>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    /// Registry with the built-in eight action types.
    pub fn builtin() -> Self {
        Self::from_definitions(vec![
            SchemaDefinition::builtin(
                ActionKind::Extract,
                &["location"],
                &["format", "options"],
                "#2563eb",
                "download",
            ),
            SchemaDefinition::builtin(
                ActionKind::Execute,
                &["script"],
                &["connection", "parameters"],
                "#7c3aed",
                "terminal",
            ),
            SchemaDefinition::builtin(
                ActionKind::Transform,
                &["transformations"],
                &["description"],
                "#059669",
                "shuffle",
            ),
            SchemaDefinition::builtin(
                ActionKind::Load,
                &["destination"],
                &["mode", "format"],
                "#d97706",
                "upload",
            ),
            SchemaDefinition::builtin(
                ActionKind::Merge,
                &["sources", "condition"],
                &["how"],
                "#0891b2",
                "git-merge",
            ),
            SchemaDefinition::builtin(
                ActionKind::Purge,
                &["target"],
                &["filter", "retention_days"],
                "#dc2626",
                "trash",
            ),
            SchemaDefinition::builtin(
                ActionKind::S3Replicate,
                &["source_bucket", "destination_bucket"],
                &["prefix", "storage_class"],
                "#ea580c",
                "copy",
            ),
            SchemaDefinition::builtin(
                ActionKind::Include,
                &["path"],
                &["parameters"],
                "#64748b",
                "file-plus",
            ),
        ])
    }

    /// Shared built-in registry.
    pub fn global() -> &'static SchemaRegistry {
        static REGISTRY: OnceLock<SchemaRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SchemaRegistry::builtin)
    }

    /// Build a registry from an explicit table. Later duplicates win.
    pub fn from_definitions(definitions: Vec<SchemaDefinition>) -> Self {
        let mut deduped: Vec<SchemaDefinition> = Vec::with_capacity(definitions.len());
        let mut index = HashMap::new();
        for def in definitions {
            if let Some(&existing) = index.get(&def.type_tag) {
                deduped[existing] = def;
            } else {
                index.insert(def.type_tag.clone(), deduped.len());
                deduped.push(def);
            }
        }
        Self {
            definitions: deduped,
            index,
        }
    }

    /// Load a replacement table from YAML (or JSON).
    ///
    /// ```yaml
    /// - type: Extract
    ///   required_fields: [action, name, dataframe, location]
    ///   optional_fields: [format]
    ///   display_color: "#2563eb"
    ///   display_icon: download
    /// ```
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let definitions: Vec<SchemaDefinition> = serde_yaml::from_str(content)
            .map_err(|e| Error::Schema(format!("Invalid schema table: {}", e)))?;
        if definitions.is_empty() {
            return Err(Error::Schema("Schema table is empty".to_string()));
        }
        for def in &definitions {
            if def.type_tag.trim().is_empty() {
                return Err(Error::Schema("Schema entry with empty type".to_string()));
            }
        }
        Ok(Self::from_definitions(definitions))
    }

    pub fn is_known_type(&self, type_tag: &str) -> bool {
        self.index.contains_key(type_tag)
    }

    pub fn definition(&self, type_tag: &str) -> Option<&SchemaDefinition> {
        self.index.get(type_tag).map(|&i| &self.definitions[i])
    }

    /// Required fields for a type, in declaration order. Empty for unknown types.
    pub fn required_fields(&self, type_tag: &str) -> &[String] {
        self.definition(type_tag)
            .map(|d| d.required_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Optional fields for a type. Empty for unknown types.
    pub fn optional_fields(&self, type_tag: &str) -> &[String] {
        self.definition(type_tag)
            .map(|d| d.optional_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Required fields as a set.
    pub fn required_set(&self, type_tag: &str) -> BTreeSet<&str> {
        self.required_fields(type_tag).iter().map(String::as_str).collect()
    }

    /// Optional fields as a set.
    pub fn optional_set(&self, type_tag: &str) -> BTreeSet<&str> {
        self.optional_fields(type_tag).iter().map(String::as_str).collect()
    }

    /// All type tags in table order.
    pub fn type_tags(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.type_tag.as_str()).collect()
    }

    pub fn definitions(&self) -> &[SchemaDefinition] {
        &self.definitions
    }

    /// JSON Schema describing a whole workflow document under this table.
    pub fn document_schema(&self) -> Value {
        let variants: Vec<Value> = self
            .definitions
            .iter()
            .map(|def| {
                json!({
                    "if": {
                        "properties": { ACTION_FIELD: { "const": def.type_tag } }
                    },
                    "then": {
                        "required": def.required_fields,
                    }
                })
            })
            .collect();

        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "required": [ACTIONS_KEY],
            "properties": {
                ACTIONS_KEY: {
                    "type": "array",
                    "items": { "$ref": "#/$defs/action" }
                }
            },
            "additionalProperties": false,
            "$defs": {
                "action": {
                    "type": "object",
                    "required": [ACTION_FIELD],
                    "properties": {
                        ACTION_FIELD: {
                            "type": "string",
                            "enum": self.type_tags(),
                        },
                        NAME_FIELD: { "type": "string" },
                        DATAFRAME_FIELD: { "type": "string" }
                    },
                    "allOf": variants,
                    "additionalProperties": true
                }
            }
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Strict structural validator built from a registry's document schema.
pub struct DocumentSchemaValidator {
    validator: Validator,
}

/// A schema violation with its JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer to the invalid element.
    pub path: String,
    /// Error message.
    pub message: String,
}

impl DocumentSchemaValidator {
    pub fn new(registry: &SchemaRegistry) -> Result<Self> {
        let schema = registry.document_schema();
        let validator = Validator::new(&schema)
            .map_err(|e| Error::Schema(format!("Invalid document schema: {}", e)))?;
        Ok(Self { validator })
    }

    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }

    /// Collect every violation in the document.
    pub fn violations(&self, document: &Value) -> Vec<SchemaViolation> {
        self.validator
            .iter_errors(document)
            .map(|error| SchemaViolation {
                path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_eight_types() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.type_tags().len(), 8);
        for kind in ActionKind::ALL {
            assert!(registry.is_known_type(kind.as_str()));
        }
    }

    #[test]
    fn test_builtin_field_counts() {
        let registry = SchemaRegistry::builtin();
        for def in registry.definitions() {
            let extra = def.required_fields.len() - UNIVERSAL_FIELDS.len();
            assert!((1..=2).contains(&extra), "{} has {} extra", def.type_tag, extra);
            assert!(def.optional_fields.len() <= 2);
            for universal in UNIVERSAL_FIELDS {
                assert!(def.declares(universal));
            }
        }
    }

    #[test]
    fn test_unknown_type_returns_empty_sets() {
        let registry = SchemaRegistry::builtin();
        assert!(!registry.is_known_type("Frobnicate"));
        assert!(registry.required_fields("Frobnicate").is_empty());
        assert!(registry.optional_set("Frobnicate").is_empty());
    }

    #[test]
    fn test_required_set() {
        let registry = SchemaRegistry::global();
        let merge = registry.required_set("Merge");
        assert!(merge.contains("sources"));
        assert!(merge.contains("condition"));
        assert!(merge.contains("dataframe"));
        assert!(registry.optional_set("Merge").contains("how"));
    }

    #[test]
    fn test_from_yaml_str() {
        let yaml = r##"
- type: Notify
  required_fields: [action, name, dataframe, channel]
  display_color: "#ff00ff"
- type: Extract
  required_fields: [action, name, dataframe, uri]
"##;
        let registry = SchemaRegistry::from_yaml_str(yaml).unwrap();
        assert!(registry.is_known_type("Notify"));
        assert!(!registry.is_known_type("Load"));
        assert_eq!(registry.definition("Notify").unwrap().display_icon, "box");
        assert!(registry.required_set("Extract").contains("uri"));
    }

    #[test]
    fn test_from_yaml_str_rejects_garbage() {
        assert!(SchemaRegistry::from_yaml_str("[]").is_err());
        assert!(SchemaRegistry::from_yaml_str("just text").is_err());
    }

    #[test]
    fn test_later_duplicates_win() {
        let registry = SchemaRegistry::from_definitions(vec![
            SchemaDefinition::builtin(ActionKind::Load, &["a"], &[], "#000", "x"),
            SchemaDefinition::builtin(ActionKind::Load, &["b"], &[], "#111", "y"),
        ]);
        assert_eq!(registry.type_tags(), vec!["Load"]);
        assert!(registry.required_set("Load").contains("b"));
        assert!(!registry.required_set("Load").contains("a"));
    }

    #[test]
    fn test_document_schema_accepts_valid_document() {
        let validator = DocumentSchemaValidator::new(SchemaRegistry::global()).unwrap();
        let doc = json!({
            "actions": [
                {"action": "Extract", "name": "a", "dataframe": "d1", "location": "p"}
            ]
        });
        assert!(validator.is_valid(&doc));
        assert!(validator.violations(&doc).is_empty());
    }

    #[test]
    fn test_document_schema_rejects_bad_documents() {
        let validator = DocumentSchemaValidator::new(SchemaRegistry::global()).unwrap();

        assert!(!validator.is_valid(&json!({ "steps": [] })));
        assert!(!validator.is_valid(&json!({ "actions": "nope" })));

        let missing_location = json!({
            "actions": [{"action": "Extract", "name": "a", "dataframe": "d1"}]
        });
        let violations = validator.violations(&missing_location);
        assert!(!violations.is_empty());
        assert!(violations.iter().any(|v| v.message.contains("location")));
    }
}

//! Action record and workflow document types.
//!
//! Two views of a record live here:
//! - [`ActionRecord`]: the untyped, order-preserving field map every engine
//!   operation works on. It may be transiently invalid while being edited.
//! - [`Action`]: the typed view, a closed union over the eight action kinds.
//!
//! # Example YAML
//!
//! ```yaml
//! actions:
//!   - action: Extract
//!     name: read orders
//!     dataframe: orders
//!     location: s3://raw/orders.csv
//!
//!   - action: Transform
//!     name: daily totals
//!     dataframe: totals
//!     transformations:
//!       - SELECT day, SUM(amount) FROM orders GROUP BY day
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Reserved field holding the type tag.
pub const ACTION_FIELD: &str = "action";
/// Reserved field holding the human label.
pub const NAME_FIELD: &str = "name";
/// Reserved field holding the dataframe identifier.
pub const DATAFRAME_FIELD: &str = "dataframe";
/// Reserved top-level key of a workflow document.
pub const ACTIONS_KEY: &str = "actions";

/// The closed set of action type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    Extract,
    Execute,
    Transform,
    Load,
    Merge,
    Purge,
    S3Replicate,
    Include,
}

impl ActionKind {
    /// All kinds, in registry order.
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Extract,
        ActionKind::Execute,
        ActionKind::Transform,
        ActionKind::Load,
        ActionKind::Merge,
        ActionKind::Purge,
        ActionKind::S3Replicate,
        ActionKind::Include,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Extract => "Extract",
            ActionKind::Execute => "Execute",
            ActionKind::Transform => "Transform",
            ActionKind::Load => "Load",
            ActionKind::Merge => "Merge",
            ActionKind::Purge => "Purge",
            ActionKind::S3Replicate => "S3Replicate",
            ActionKind::Include => "Include",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown action type '{}'", s)))
    }
}

/// One step of a workflow: a map from field name to value.
///
/// Field order is preserved so the text view round-trips the way the
/// user wrote it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRecord {
    fields: Map<String, Value>,
}

impl ActionRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with the three universal fields set.
    pub fn with_kind(kind: ActionKind, name: &str, dataframe: &str) -> Self {
        let mut record = Self::new();
        record.set(ACTION_FIELD, Value::String(kind.as_str().to_string()));
        record.set(NAME_FIELD, Value::String(name.to_string()));
        record.set(DATAFRAME_FIELD, Value::String(dataframe.to_string()));
        record
    }

    /// Wrap an existing field map.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builder-style field setter.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Iterate over fields in document order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The raw type tag, if it is a string.
    pub fn action(&self) -> Option<&str> {
        self.get_str(ACTION_FIELD)
    }

    /// The type tag as a known kind.
    pub fn kind(&self) -> Option<ActionKind> {
        self.action().and_then(|tag| tag.parse().ok())
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str(NAME_FIELD)
    }

    pub fn dataframe(&self) -> Option<&str> {
        self.get_str(DATAFRAME_FIELD)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Whether a field is present and non-empty.
    pub fn has_value(&self, key: &str) -> bool {
        self.fields.get(key).map(is_truthy).unwrap_or(false)
    }

    /// Convert to the typed view.
    pub fn typed(&self) -> Result<Action> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            let label = self.name().unwrap_or("<unnamed>");
            Error::Parse(format!("Action '{}' is not well-formed: {}", label, e))
        })
    }
}

impl From<Map<String, Value>> for ActionRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

/// Whether a field value counts as present.
///
/// Absent-like values are `null`, empty strings, `false`, numeric zero
/// and empty sequences.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// An ordered sequence of action records under the `actions` key.
///
/// Order is the default execution order and decides which records are
/// drawn as start and end nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub actions: Vec<ActionRecord>,
}

impl WorkflowDocument {
    pub fn new(actions: Vec<ActionRecord>) -> Self {
        Self { actions }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Kinds used in this document, sorted and deduplicated.
    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.actions.iter().filter_map(|a| a.kind()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Find the first record producing the given dataframe.
    pub fn find_by_dataframe(&self, dataframe: &str) -> Option<(usize, &ActionRecord)> {
        self.actions
            .iter()
            .enumerate()
            .find(|(_, a)| a.dataframe() == Some(dataframe))
    }
}

/// Typed view of an action record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub dataframe: String,
    #[serde(flatten)]
    pub spec: ActionSpec,
}

/// Kind-specific payload, tagged by the `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ActionSpec {
    Extract(ExtractSpec),
    Execute(ExecuteSpec),
    Transform(TransformSpec),
    Load(LoadSpec),
    Merge(MergeSpec),
    Purge(PurgeSpec),
    S3Replicate(S3ReplicateSpec),
    Include(IncludeSpec),
}

/// Read a dataframe from a storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Run a script against a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteSpec {
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Derive a dataframe through a list of query steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub transformations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Write a dataframe to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Join several dataframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub sources: Vec<String>,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub how: Option<String>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Delete data from a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeSpec {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Copy objects between buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3ReplicateSpec {
    pub source_bucket: String,
    pub destination_bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

/// Splice in another workflow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionSpec::Extract(_) => ActionKind::Extract,
            ActionSpec::Execute(_) => ActionKind::Execute,
            ActionSpec::Transform(_) => ActionKind::Transform,
            ActionSpec::Load(_) => ActionKind::Load,
            ActionSpec::Merge(_) => ActionKind::Merge,
            ActionSpec::Purge(_) => ActionKind::Purge,
            ActionSpec::S3Replicate(_) => ActionKind::S3Replicate,
            ActionSpec::Include(_) => ActionKind::Include,
        }
    }

    /// User-defined fields outside the kind's schema.
    pub fn custom(&self) -> &Map<String, Value> {
        match self {
            ActionSpec::Extract(s) => &s.custom,
            ActionSpec::Execute(s) => &s.custom,
            ActionSpec::Transform(s) => &s.custom,
            ActionSpec::Load(s) => &s.custom,
            ActionSpec::Merge(s) => &s.custom,
            ActionSpec::Purge(s) => &s.custom,
            ActionSpec::S3Replicate(s) => &s.custom,
            ActionSpec::Include(s) => &s.custom,
        }
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        self.spec.kind()
    }

    /// One-line description used as a node subtitle.
    pub fn summary(&self) -> String {
        match &self.spec {
            ActionSpec::Extract(s) => format!("from {}", s.location),
            ActionSpec::Execute(s) => match &s.connection {
                Some(conn) => format!("script on {}", conn),
                None => "script".to_string(),
            },
            ActionSpec::Transform(s) => format!("{} step(s)", s.transformations.len()),
            ActionSpec::Load(s) => format!("to {}", s.destination),
            ActionSpec::Merge(s) => format!("join {}", s.sources.join(", ")),
            ActionSpec::Purge(s) => format!("purge {}", s.target),
            ActionSpec::S3Replicate(s) => {
                format!("{} -> {}", s.source_bucket, s.destination_bucket)
            }
            ActionSpec::Include(s) => format!("include {}", s.path),
        }
    }

    /// Convert back into an untyped record.
    pub fn into_record(self) -> Result<ActionRecord> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(ActionRecord::from_map(map)),
            other => Err(Error::Internal(format!(
                "Typed action serialized to a non-object: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("Frobnicate".parse::<ActionKind>().is_err());
        assert!("extract".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_record_accessors() {
        let record = ActionRecord::with_kind(ActionKind::Extract, "read", "orders")
            .field("location", "s3://raw/orders.csv");
        assert_eq!(record.action(), Some("Extract"));
        assert_eq!(record.kind(), Some(ActionKind::Extract));
        assert_eq!(record.name(), Some("read"));
        assert_eq!(record.dataframe(), Some("orders"));
        assert!(record.has_value("location"));
        assert!(!record.has_value("format"));
    }

    #[test]
    fn test_record_preserves_field_order() {
        let record: ActionRecord = serde_json::from_value(json!({
            "dataframe": "d",
            "action": "Load",
            "zeta": 1,
            "alpha": 2
        }))
        .unwrap();
        let keys: Vec<&str> = record.fields().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["dataframe", "action", "zeta", "alpha"]);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(["a"])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_typed_view() {
        let record = ActionRecord::with_kind(ActionKind::Transform, "t", "d2")
            .field("transformations", json!(["select * from d1"]))
            .field("owner", "data-team");

        let action = record.typed().unwrap();
        assert_eq!(action.kind(), ActionKind::Transform);
        assert_eq!(action.dataframe, "d2");
        match &action.spec {
            ActionSpec::Transform(spec) => {
                assert_eq!(spec.transformations, vec!["select * from d1"]);
                assert_eq!(spec.custom["owner"], "data-team");
            }
            other => panic!("Expected transform, got {:?}", other),
        }
        assert_eq!(action.summary(), "1 step(s)");
    }

    #[test]
    fn test_typed_view_missing_required_field() {
        let record = ActionRecord::with_kind(ActionKind::Load, "l", "d");
        let err = record.typed().unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_typed_view_unknown_kind() {
        let record = ActionRecord::new()
            .field("action", "Frobnicate")
            .field("name", "x")
            .field("dataframe", "y");
        assert!(record.typed().is_err());
    }

    #[test]
    fn test_typed_round_trip_to_record() {
        let record = ActionRecord::with_kind(ActionKind::S3Replicate, "copy", "raw")
            .field("source_bucket", "a")
            .field("destination_bucket", "b");
        let back = record.typed().unwrap().into_record().unwrap();
        assert_eq!(back.action(), Some("S3Replicate"));
        assert_eq!(back.get("source_bucket"), Some(&json!("a")));
        assert_eq!(back.get("destination_bucket"), Some(&json!("b")));
        assert!(back.get("prefix").is_none());
    }

    #[test]
    fn test_document_helpers() {
        let doc = WorkflowDocument::new(vec![
            ActionRecord::with_kind(ActionKind::Load, "l", "out"),
            ActionRecord::with_kind(ActionKind::Extract, "e", "in"),
            ActionRecord::with_kind(ActionKind::Extract, "e2", "in2"),
        ]);
        assert_eq!(doc.kinds(), vec![ActionKind::Extract, ActionKind::Load]);
        assert_eq!(doc.find_by_dataframe("in").map(|(i, _)| i), Some(1));
        assert!(doc.find_by_dataframe("missing").is_none());
    }
}

//! Detect which record fields hold embedded SQL.

use regex_lite::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::workflow::{ActionRecord, UNIVERSAL_FIELDS};

/// Field-name fragments that mark a field as query text.
pub const NAME_FRAGMENTS: &[&str] = &[
    "script",
    "query",
    "sql",
    "command",
    "statement",
    "condition",
    "filter",
    "transformation",
    "expression",
    "predicate",
    "where",
    "join",
];

/// Keywords counted by the two-keyword heuristic.
pub const QUERY_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "INSERT", "INTO", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER",
    "JOIN", "GROUP", "ORDER", "HAVING", "UNION", "VALUES", "DISTINCT", "LIMIT", "TRUNCATE",
    "MERGE", "TABLE",
];

fn structural_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)\bSELECT\b.+?\bFROM\b",
            r"(?i)\bINSERT\s+INTO\b",
            r"(?is)\bUPDATE\b.+?\bSET\b",
            r"(?i)\bDELETE\s+FROM\b",
            r"(?i)\bCREATE\s+(TABLE|VIEW|INDEX)\b",
            r"(?is)\bWHERE\b.+?=",
            r"(?is)\bJOIN\b.+?\bON\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

/// Whether a field name suggests query content.
///
/// A fragment must start one of the name's identifier segments, so
/// `row_filter` and `sqlText` match but `description` does not.
pub fn name_suggests_query(field: &str) -> bool {
    name_segments(field)
        .iter()
        .any(|segment| NAME_FRAGMENTS.iter().any(|frag| segment.starts_with(frag)))
}

/// Lowercased segments of an identifier, split on separators and camelCase humps.
fn name_segments(field: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in field.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Whether a piece of text looks like SQL.
pub fn looks_like_query(text: &str) -> bool {
    let keyword_hits = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| {
            !word.is_empty()
                && QUERY_KEYWORDS
                    .iter()
                    .any(|kw| word.eq_ignore_ascii_case(kw))
        })
        .count();

    keyword_hits >= 2 || structural_patterns().iter().any(|re| re.is_match(text))
}

/// Fields of the record that hold embedded query content.
///
/// The universal fields are never classified, and only string values or
/// sequences holding strings qualify.
pub fn classify(record: &ActionRecord) -> BTreeSet<String> {
    record
        .fields()
        .filter(|(key, _)| !UNIVERSAL_FIELDS.contains(&key.as_str()))
        .filter(|(key, value)| {
            let texts = string_values(value);
            !texts.is_empty() && (name_suggests_query(key) || texts.iter().any(|t| looks_like_query(t)))
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// String payloads of a field: the string itself or the string elements of a sequence.
pub(crate) fn string_values(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ActionKind;
    use serde_json::json;

    #[test]
    fn test_script_field_is_classified() {
        let record = ActionRecord::with_kind(ActionKind::Execute, "e", "d")
            .field("script", "SELECT * FROM customers WHERE id = 1");
        let fields = classify(&record);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["script"]);
    }

    #[test]
    fn test_name_fragments_match_segment_starts() {
        assert!(name_suggests_query("script"));
        assert!(name_suggests_query("row_filter"));
        assert!(name_suggests_query("preFilter"));
        assert!(name_suggests_query("sqlText"));
        assert!(name_suggests_query("SQL_QUERY"));
        assert!(name_suggests_query("pre_SQL"));
        assert!(name_suggests_query("JoinCondition"));
        assert!(name_suggests_query("transformations"));
        assert!(!name_suggests_query("description"));
        assert!(!name_suggests_query("subscription"));
        assert!(!name_suggests_query("location"));
    }

    #[test]
    fn test_description_is_not_classified() {
        let record = ActionRecord::with_kind(ActionKind::Transform, "t", "d2")
            .field("transformations", json!(["SELECT a FROM d1"]))
            .field("description", "Keep only active customers");
        let fields = classify(&record);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["transformations"]);
    }

    #[test]
    fn test_name_heuristic_alone() {
        let record = ActionRecord::with_kind(ActionKind::Purge, "p", "d")
            .field("target", "tmp")
            .field("row_filter", "age > 3");
        assert!(classify(&record).contains("row_filter"));
        assert!(!classify(&record).contains("target"));
    }

    #[test]
    fn test_content_heuristic_on_custom_field() {
        let record = ActionRecord::with_kind(ActionKind::Extract, "e", "d")
            .field("location", "s3://bucket/raw")
            .field("notes", "insert into audit values (1)");
        let fields = classify(&record);
        assert!(fields.contains("notes"));
        assert!(!fields.contains("location"));
    }

    #[test]
    fn test_sequence_fields() {
        let record = ActionRecord::with_kind(ActionKind::Transform, "t", "d")
            .field("steps", json!(["rename a to b", "select a from d1"]));
        assert!(classify(&record).contains("steps"));
    }

    #[test]
    fn test_universal_and_non_string_fields_skipped() {
        let record = ActionRecord::with_kind(ActionKind::Load, "select from where", "d")
            .field("destination", "t")
            .field("query_timeout", 30)
            .field("filter_options", json!({ "select": "from" }));
        assert!(classify(&record).is_empty());
    }

    #[test]
    fn test_keyword_threshold() {
        assert!(!looks_like_query("select the best"));
        assert!(looks_like_query("select distinct"));
        assert!(looks_like_query("a JOIN b ON a.id = b.id"));
        assert!(looks_like_query("CREATE VIEW v AS SELECT 1"));
        assert!(!looks_like_query("daily customer snapshot"));
    }
}

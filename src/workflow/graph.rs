//! Dependency inference between actions.
//!
//! Edges are never declared by the user. An edge `i -> j` exists when some
//! field of record `j` textually mentions the dataframe that record `i`
//! produces. Matching is syntactic on purpose: embedded query text is not
//! parsed, so free-form scripting fields work too, at the price of
//! occasional false positives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::schema::SchemaRegistry;
use super::types::{ActionKind, ActionRecord, ACTION_FIELD, NAME_FIELD};

/// How a dataframe identifier is matched inside field text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Plain substring containment ("df" matches inside "df_2").
    #[default]
    Substring,
    /// The identifier must not be glued to other identifier characters.
    WordBoundary,
}

/// Derived dependency: `target` references `source`'s dataframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    /// First field of the target where the reference was found.
    pub field: String,
}

/// Infer dependency edges with substring matching.
pub fn infer_edges(records: &[ActionRecord]) -> Vec<Edge> {
    infer_edges_with(records, MatchMode::Substring)
}

/// Infer dependency edges.
///
/// For every ordered pair `(i, j)` with `i != j`, scans the fields of `j`
/// (except `action` and `name`) for `records[i].dataframe`. At most one edge
/// per pair is produced. A `Load` whose own dataframe equals the source id
/// is skipped: it consumes that dataframe rather than depending on it.
pub fn infer_edges_with(records: &[ActionRecord], mode: MatchMode) -> Vec<Edge> {
    let mut edges = Vec::new();

    for (i, source) in records.iter().enumerate() {
        let source_id = match source.dataframe() {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };

        for (j, target) in records.iter().enumerate() {
            if i == j {
                continue;
            }
            if target.kind() == Some(ActionKind::Load) && target.dataframe() == Some(source_id) {
                continue;
            }
            if let Some(field) = referencing_field(target, source_id, mode) {
                edges.push(Edge {
                    source: i,
                    target: j,
                    field: field.to_string(),
                });
            }
        }
    }

    edges
}

fn referencing_field<'a>(record: &'a ActionRecord, id: &str, mode: MatchMode) -> Option<&'a str> {
    record
        .fields()
        .filter(|(key, _)| key.as_str() != ACTION_FIELD && key.as_str() != NAME_FIELD)
        .find(|(_, value)| value_mentions(value, id, mode))
        .map(|(key, _)| key.as_str())
}

fn value_mentions(value: &Value, id: &str, mode: MatchMode) -> bool {
    match value {
        Value::String(s) => text_mentions(s, id, mode),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| text_mentions(s, id, mode)),
        _ => false,
    }
}

fn text_mentions(text: &str, id: &str, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Substring => text.contains(id),
        MatchMode::WordBoundary => text.match_indices(id).any(|(start, matched)| {
            let before = text[..start].chars().next_back();
            let after = text[start + matched.len()..].chars().next();
            !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
        }),
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A node of the graph view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub index: usize,
    pub id: String,
    pub label: String,
    pub action: Option<String>,
    pub dataframe: Option<String>,
    pub color: String,
    pub icon: String,
    pub summary: Option<String>,
    pub is_start: bool,
    pub is_end: bool,
}

/// Read-only projection of a document for the graph view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

/// Start/end roles by position: the first record starts, the last ends.
pub fn node_roles(len: usize) -> Vec<(bool, bool)> {
    (0..len).map(|i| (i == 0, i + 1 == len)).collect()
}

impl GraphView {
    /// Build the projection from records and already-inferred edges.
    pub fn build(records: &[ActionRecord], edges: Vec<Edge>, registry: &SchemaRegistry) -> Self {
        let roles = node_roles(records.len());
        let nodes = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let definition = record.action().and_then(|tag| registry.definition(tag));
                let (is_start, is_end) = roles[index];
                GraphNode {
                    index,
                    id: format!("action-{}", index),
                    label: record
                        .name()
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Action {}", index + 1)),
                    action: record.action().map(str::to_string),
                    dataframe: record.dataframe().map(str::to_string),
                    color: definition
                        .map(|d| d.display_color.clone())
                        .unwrap_or_else(|| "#9ca3af".to_string()),
                    icon: definition
                        .map(|d| d.display_icon.clone())
                        .unwrap_or_else(|| "help-circle".to_string()),
                    summary: record.typed().ok().map(|a| a.summary()),
                    is_start,
                    is_end,
                }
            })
            .collect();

        Self { nodes, edges }
    }

    /// Infer edges and build the projection in one call.
    pub fn from_records(records: &[ActionRecord], registry: &SchemaRegistry, mode: MatchMode) -> Self {
        Self::build(records, infer_edges_with(records, mode), registry)
    }

    /// Indices of records this node reads from.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.target == index)
            .map(|e| e.source)
            .collect()
    }

    /// Indices of records that read from this node.
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|e| e.source == index)
            .map(|e| e.target)
            .collect()
    }

    /// Whether the inferred edges form a cycle.
    ///
    /// Substring matching can link two records both ways; front-ends use
    /// this to flag the document.
    pub fn has_cycle(&self) -> bool {
        fn dfs(
            node: usize,
            view: &GraphView,
            visited: &mut HashSet<usize>,
            rec_stack: &mut HashSet<usize>,
        ) -> bool {
            visited.insert(node);
            rec_stack.insert(node);

            for next in view.dependents(node) {
                if !visited.contains(&next) {
                    if dfs(next, view, visited, rec_stack) {
                        return true;
                    }
                } else if rec_stack.contains(&next) {
                    return true;
                }
            }

            rec_stack.remove(&node);
            false
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        for node in &self.nodes {
            if !visited.contains(&node.index)
                && dfs(node.index, self, &mut visited, &mut rec_stack)
            {
                return true;
            }
        }
        false
    }

    /// Plain-text rendering: each record with the records feeding it.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();

        for node in &self.nodes {
            let mut marker = String::new();
            if node.is_start {
                marker.push_str(" [start]");
            }
            if node.is_end {
                marker.push_str(" [end]");
            }
            lines.push(format!(
                "{}. {} ({}) -> {}{}",
                node.index + 1,
                node.label,
                node.action.as_deref().unwrap_or("?"),
                node.dataframe.as_deref().unwrap_or("?"),
                marker
            ));

            for edge in self.edges.iter().filter(|e| e.target == node.index) {
                let source = &self.nodes[edge.source];
                lines.push(format!(
                    "   └─ reads {} from {}. {} (via {})",
                    source.dataframe.as_deref().unwrap_or("?"),
                    edge.source + 1,
                    source.label,
                    edge.field
                ));
            }
        }

        lines.join("\n")
    }
}

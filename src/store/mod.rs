//! Canonical document store.
//!
//! The form, graph and text views are projections of one ordered record
//! list held here. Every accepted edit recomputes the derived graph, the
//! error list and (unless the change arrived as text) the serialized
//! text, then notifies subscribers.
//!
//! Text edits go the other way: the text is parsed and validated, and only
//! replaces the record list when it parses into a document. While the user
//! is mid-keystroke the last good document stays in place.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sql::{normalize_record, NormalizeOptions, SqlFormatter};
use crate::workflow::{
    dump_document, parse_document, validate_records, ActionRecord, EdgeCache, GraphView,
    MatchMode, SchemaRegistry, WorkflowDocument,
};

/// Maximum number of events to buffer in the broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Form,
    Graph,
    Text,
    /// Loaded from disk rather than typed into a view.
    File,
}

/// An edit to the record list.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Insert { index: usize, record: ActionRecord },
    Append(ActionRecord),
    Remove(usize),
    /// Remove at `from`, then insert so the record ends up at `to`.
    Move { from: usize, to: usize },
    Replace { index: usize, record: ActionRecord },
    ReplaceAll(Vec<ActionRecord>),
}

impl Edit {
    fn describe(&self) -> &'static str {
        match self {
            Edit::Insert { .. } => "insert",
            Edit::Append(_) => "append",
            Edit::Remove(_) => "remove",
            Edit::Move { .. } => "move",
            Edit::Replace { .. } => "replace",
            Edit::ReplaceAll(_) => "replace_all",
        }
    }
}

/// Change notifications for views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    /// The record list changed.
    Changed { revision: u64, origin: ViewKind },
    /// The match mode changed and the graph was rebuilt; records are unchanged.
    GraphChanged { revision: u64 },
    /// Text did not parse into a document; the record list is unchanged.
    TextRejected { revision: u64, errors: Vec<String> },
}

impl DocumentEvent {
    /// Whether `view` should react to this event.
    ///
    /// The view that made a change already shows it, so it is skipped.
    pub fn concerns(&self, view: ViewKind) -> bool {
        match self {
            DocumentEvent::Changed { origin, .. } => *origin != view,
            DocumentEvent::GraphChanged { .. } => view == ViewKind::Graph,
            DocumentEvent::TextRejected { .. } => true,
        }
    }
}

/// Outcome of pushing text into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSync {
    /// Whether the record list was replaced.
    pub accepted: bool,
    /// Structural errors when rejected, record errors when accepted.
    pub errors: Vec<String>,
}

/// Single source of truth for an open document.
pub struct DocumentStore {
    records: Vec<ActionRecord>,
    registry: Arc<SchemaRegistry>,
    cache: EdgeCache,
    mode: MatchMode,
    graph: GraphView,
    text: String,
    errors: Vec<String>,
    revision: u64,
    tx: broadcast::Sender<DocumentEvent>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_options(registry, EdgeCache::new(), MatchMode::default())
    }

    /// Create an empty store with an explicit cache and match mode.
    pub fn with_options(registry: Arc<SchemaRegistry>, cache: EdgeCache, mode: MatchMode) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let mut store = Self {
            records: Vec::new(),
            registry,
            cache,
            mode,
            graph: GraphView::default(),
            text: String::new(),
            errors: Vec::new(),
            revision: 0,
            tx,
        };
        store.recompute(true);
        store
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.tx.subscribe()
    }

    fn broadcast(&self, event: DocumentEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> WorkflowDocument {
        WorkflowDocument::new(self.records.clone())
    }

    pub fn graph(&self) -> &GraphView {
        &self.graph
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Record errors of the current document.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Switch the dependency match mode and rebuild the graph.
    pub fn set_mode(&mut self, mode: MatchMode) {
        if self.mode != mode {
            self.mode = mode;
            self.graph = self.build_graph();
            self.revision += 1;
            self.broadcast(DocumentEvent::GraphChanged {
                revision: self.revision,
            });
        }
    }

    /// Apply an edit made in `origin`.
    ///
    /// Bad indices are rejected and leave the store untouched.
    pub fn apply(&mut self, origin: ViewKind, edit: Edit) -> Result<u64> {
        let len = self.records.len();
        let kind = edit.describe();

        match edit {
            Edit::Insert { index, record } => {
                if index > len {
                    return Err(out_of_range("insert", index, len));
                }
                self.records.insert(index, record);
            }
            Edit::Append(record) => self.records.push(record),
            Edit::Remove(index) => {
                if index >= len {
                    return Err(out_of_range("remove", index, len));
                }
                self.records.remove(index);
            }
            Edit::Move { from, to } => {
                if from >= len {
                    return Err(out_of_range("move from", from, len));
                }
                if to >= len {
                    return Err(out_of_range("move to", to, len));
                }
                let record = self.records.remove(from);
                self.records.insert(to, record);
            }
            Edit::Replace { index, record } => {
                if index >= len {
                    return Err(out_of_range("replace", index, len));
                }
                self.records[index] = record;
            }
            Edit::ReplaceAll(records) => self.records = records,
        }

        debug!(edit = kind, origin = ?origin, "Applied edit");
        self.commit(origin, true);
        Ok(self.revision)
    }

    /// Push text from the text view.
    pub fn apply_text(&mut self, text: &str) -> TextSync {
        self.sync_text(text, ViewKind::Text)
    }

    /// Replace the document with a file's content.
    ///
    /// Read failures return an error and leave the document as it was.
    pub fn load_file(&mut self, path: &Path) -> Result<TextSync> {
        let content = std::fs::read_to_string(path)?;
        let sync = self.sync_text(&content, ViewKind::File);
        if sync.accepted {
            info!(path = %path.display(), actions = self.records.len(), "Loaded workflow");
        }
        Ok(sync)
    }

    /// Write the current text projection to a file.
    pub fn save_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.text)?;
        Ok(())
    }

    /// Normalize the embedded queries of every record.
    pub fn normalize_all(
        &mut self,
        options: &NormalizeOptions,
        formatter: &dyn SqlFormatter,
    ) -> Result<u64> {
        let records = self
            .records
            .iter()
            .map(|r| normalize_record(r, options, formatter))
            .collect();
        self.apply(ViewKind::Form, Edit::ReplaceAll(records))
    }

    fn sync_text(&mut self, text: &str, origin: ViewKind) -> TextSync {
        let parsed = match parse_document(text, &self.registry) {
            Ok(validation) => validation,
            Err(e) => return self.reject(vec![e.to_string()]),
        };

        let Some(document) = parsed.document else {
            return self.reject(parsed.errors);
        };

        self.records = document.actions;
        self.text = text.to_string();
        self.commit(origin, false);

        TextSync {
            accepted: true,
            errors: parsed.errors,
        }
    }

    fn reject(&self, errors: Vec<String>) -> TextSync {
        debug!(errors = errors.len(), "Text rejected, keeping last document");
        self.broadcast(DocumentEvent::TextRejected {
            revision: self.revision,
            errors: errors.clone(),
        });
        TextSync {
            accepted: false,
            errors,
        }
    }

    /// `regenerate_text` is false only when the new records came from text.
    fn commit(&mut self, origin: ViewKind, regenerate_text: bool) {
        self.recompute(regenerate_text);
        self.revision += 1;
        self.broadcast(DocumentEvent::Changed {
            revision: self.revision,
            origin,
        });
    }

    fn recompute(&mut self, regenerate_text: bool) {
        self.graph = self.build_graph();
        self.errors = validate_records(&self.records, &self.registry);

        if regenerate_text {
            match dump_document(&WorkflowDocument::new(self.records.clone())) {
                Ok(text) => self.text = text,
                Err(e) => warn!(error = %e, "Failed to serialize document"),
            }
        }
    }

    fn build_graph(&self) -> GraphView {
        let edges = self.cache.get_or_infer(&self.records, self.mode);
        GraphView::build(&self.records, edges.as_ref().clone(), &self.registry)
    }
}

fn out_of_range(what: &str, index: usize, len: usize) -> Error {
    Error::Edit(format!(
        "Cannot {} at index {}: document has {} action(s)",
        what, index, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::StandardFormatter;
    use crate::workflow::{ActionKind, MISSING_ACTIONS};
    use serde_json::json;
    use std::io::Write;

    fn store() -> DocumentStore {
        DocumentStore::new(Arc::new(SchemaRegistry::builtin()))
    }

    fn extract(name: &str, df: &str) -> ActionRecord {
        ActionRecord::with_kind(ActionKind::Extract, name, df).field("location", "s3://raw")
    }

    fn transform(name: &str, df: &str, step: &str) -> ActionRecord {
        ActionRecord::with_kind(ActionKind::Transform, name, df)
            .field("transformations", json!([step]))
    }

    fn names(store: &DocumentStore) -> Vec<&str> {
        store.records().iter().filter_map(|r| r.name()).collect()
    }

    #[test]
    fn test_empty_store() {
        let store = store();
        assert!(store.records().is_empty());
        assert_eq!(store.text(), "actions: []\n");
        assert!(store.graph().nodes.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_edits_recompute_views() {
        let mut store = store();
        store.apply(ViewKind::Form, Edit::Append(extract("a", "d1"))).unwrap();
        store
            .apply(
                ViewKind::Form,
                Edit::Append(transform("b", "d2", "select * from d1")),
            )
            .unwrap();

        assert_eq!(store.revision(), 2);
        assert_eq!(store.graph().nodes.len(), 2);
        assert_eq!(store.graph().edges.len(), 1);
        assert!(store.text().contains("select * from d1"));
        assert!(store.errors().is_empty());
    }

    #[test]
    fn test_move_there_and_back_restores_order() {
        let mut store = store();
        let records = vec![extract("a", "d1"), extract("b", "d2"), extract("c", "d3"), extract("d", "d4")];
        store
            .apply(ViewKind::Form, Edit::ReplaceAll(records.clone()))
            .unwrap();

        store.apply(ViewKind::Graph, Edit::Move { from: 0, to: 2 }).unwrap();
        assert_eq!(names(&store), vec!["b", "c", "a", "d"]);
        store.apply(ViewKind::Graph, Edit::Move { from: 2, to: 0 }).unwrap();

        assert_eq!(store.records(), records.as_slice());
    }

    #[test]
    fn test_bad_index_leaves_state_untouched() {
        let mut store = store();
        store.apply(ViewKind::Form, Edit::Append(extract("a", "d1"))).unwrap();
        let text = store.text().to_string();

        let err = store.apply(ViewKind::Form, Edit::Remove(3)).unwrap_err();
        assert_eq!(err.code(), "EDIT_ERROR");
        assert!(store
            .apply(ViewKind::Form, Edit::Move { from: 0, to: 1 })
            .is_err());
        assert!(store
            .apply(
                ViewKind::Form,
                Edit::Insert {
                    index: 2,
                    record: extract("b", "d2"),
                },
            )
            .is_err());

        assert_eq!(store.revision(), 1);
        assert_eq!(store.text(), text);
        assert_eq!(names(&store), vec!["a"]);
    }

    #[test]
    fn test_insert_and_replace() {
        let mut store = store();
        store.apply(ViewKind::Form, Edit::Append(extract("b", "d2"))).unwrap();
        store
            .apply(
                ViewKind::Form,
                Edit::Insert {
                    index: 0,
                    record: extract("a", "d1"),
                },
            )
            .unwrap();
        store
            .apply(
                ViewKind::Form,
                Edit::Replace {
                    index: 1,
                    record: ActionRecord::with_kind(ActionKind::Load, "b", "d2"),
                },
            )
            .unwrap();

        assert_eq!(names(&store), vec!["a", "b"]);
        assert_eq!(
            store.errors(),
            &["type 'Load' at index 1 missing required field 'destination'".to_string()]
        );
    }

    #[test]
    fn test_invalid_text_keeps_document() {
        let mut store = store();
        store.apply(ViewKind::Form, Edit::Append(extract("a", "d1"))).unwrap();
        let before = store.records().to_vec();

        let sync = store.apply_text("actions: [ {action: Extract");
        assert!(!sync.accepted);
        assert!(sync.errors[0].starts_with("Parse error"));
        assert_eq!(store.records(), before.as_slice());

        let sync = store.apply_text("steps: []");
        assert!(!sync.accepted);
        assert_eq!(sync.errors, vec![MISSING_ACTIONS.to_string()]);
        assert_eq!(store.records(), before.as_slice());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_text_edit_replaces_records_without_rewriting_text() {
        let mut store = store();
        let text = "actions:\n  - {action: Extract, name: a, dataframe: d1, location: p}\n  - action: Mystery\n";

        let sync = store.apply_text(text);
        assert!(sync.accepted);
        assert_eq!(sync.errors, vec!["unknown action type 'Mystery' at index 1".to_string()]);
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.text(), text);
        assert_eq!(store.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_events_skip_originating_view() {
        let mut store = store();
        let mut rx = store.subscribe();

        store.apply(ViewKind::Form, Edit::Append(extract("a", "d1"))).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            DocumentEvent::Changed {
                revision: 1,
                origin: ViewKind::Form,
            }
        );
        assert!(!event.concerns(ViewKind::Form));
        assert!(event.concerns(ViewKind::Graph));
        assert!(event.concerns(ViewKind::Text));

        store.apply_text("nope: 1");
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DocumentEvent::TextRejected { revision: 1, .. }));
        assert!(event.concerns(ViewKind::Text));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "actions:\n  - action: Extract\n    name: a\n    dataframe: d1\n    location: p"
        )
        .unwrap();

        let mut store = store();
        let sync = store.load_file(file.path()).unwrap();
        assert!(sync.accepted);
        assert_eq!(names(&store), vec!["a"]);

        let missing = store.load_file(Path::new("/nonexistent/workflow.yaml"));
        assert!(missing.is_err());
        assert_eq!(names(&store), vec!["a"]);
    }

    #[test]
    fn test_normalize_all() {
        let mut store = store();
        store
            .apply(
                ViewKind::Form,
                Edit::Append(
                    ActionRecord::with_kind(ActionKind::Execute, "e", "d1")
                        .field("script", "select * from customers where id = 1"),
                ),
            )
            .unwrap();

        store
            .normalize_all(&NormalizeOptions::default(), &StandardFormatter)
            .unwrap();
        let script = store.records()[0].get("script").unwrap().as_str().unwrap();
        assert!(script.starts_with("SELECT"));
    }

    #[test]
    fn test_set_mode_rebuilds_graph() {
        let mut store = store();
        store
            .apply(
                ViewKind::Form,
                Edit::ReplaceAll(vec![
                    extract("a", "df"),
                    transform("b", "out", "select * from df_2"),
                ]),
            )
            .unwrap();
        assert_eq!(store.graph().edges.len(), 1);

        store.set_mode(MatchMode::WordBoundary);
        assert!(store.graph().edges.is_empty());
    }

    #[tokio::test]
    async fn test_set_mode_notifies_graph_view() {
        let mut store = store();
        store
            .apply(
                ViewKind::Form,
                Edit::ReplaceAll(vec![
                    extract("a", "df"),
                    transform("b", "out", "select * from df_2"),
                ]),
            )
            .unwrap();
        let mut rx = store.subscribe();

        store.set_mode(MatchMode::WordBoundary);
        let event = rx.recv().await.unwrap();
        assert_eq!(event, DocumentEvent::GraphChanged { revision: 2 });
        assert!(event.concerns(ViewKind::Graph));
        assert!(!event.concerns(ViewKind::Form));
        assert!(!event.concerns(ViewKind::Text));

        store.set_mode(MatchMode::WordBoundary);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_structured_edit_from_text_view_regenerates_text() {
        let mut store = store();
        store
            .apply(ViewKind::Text, Edit::Append(extract("a", "d1")))
            .unwrap();

        assert_eq!(store.records().len(), 1);
        assert!(store.text().contains("dataframe: d1"));
        assert_ne!(store.text(), "actions: []\n");
    }
}

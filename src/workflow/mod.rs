//! Workflow documents: types, schema registry, parsing, validation and
//! dependency inference.
//!
//! A document is YAML with a single `actions` key holding an ordered list
//! of action records:
//! - Records: typed steps (Extract, Transform, Load, ...) on a dataframe
//! - Schema: required/optional fields per action type
//! - Graph: dependencies inferred from dataframe references

mod cache;
mod graph;
mod parser;
mod schema;
mod types;
mod validator;

pub use cache::{hash_records, CacheStats, EdgeCache};
pub use graph::{
    infer_edges, infer_edges_with, node_roles, Edge, GraphNode, GraphView, MatchMode,
};
pub use parser::{dump_document, load_document, parse_document, parse_document_file};
pub use schema::{
    DocumentSchemaValidator, SchemaDefinition, SchemaRegistry, SchemaViolation, UNIVERSAL_FIELDS,
};
pub use types::*;
pub use validator::{
    validate_document, validate_record, validate_records, DocumentValidation, MISSING_ACTIONS,
};

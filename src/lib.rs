//! etl-studio - editing engine for declarative ETL workflows
//!
//! A workflow is an ordered list of typed actions (Extract, Transform,
//! Load, ...) that each produce a named dataframe. etl-studio keeps one
//! canonical copy of that list and derives everything else from it: record
//! validation, the dependency graph, the YAML text, and advisory checks on
//! embedded SQL.
//!
//! ## Key Features
//!
//! - **Schema-driven validation**: required fields per action type, from a swappable table
//! - **Inferred dependencies**: edges come from dataframe references, never declared
//! - **Embedded SQL**: detection, linting and best-effort formatting
//! - **View sync**: form, graph and text views stay consistent through one store
//!
//! ## Example
//!
//! ```yaml
//! actions:
//!   - action: Extract
//!     name: read customers
//!     dataframe: customers
//!     location: s3://raw/customers.parquet
//!
//!   - action: Transform
//!     name: active only
//!     dataframe: active_customers
//!     transformations:
//!       - SELECT * FROM customers WHERE active = true
//!
//!   - action: Load
//!     name: publish
//!     dataframe: active_customers
//!     destination: analytics.active_customers
//! ```

pub mod config;
pub mod error;
pub mod sql;
pub mod store;
pub mod templates;
pub mod upload;
pub mod workflow;

pub use error::{Error, Result};
pub use store::{DocumentEvent, DocumentStore, Edit, ViewKind};

//! Error types for etl-studio.
//!
//! Validation and linting never fail through this type: they return
//! structured reports. `Error` covers the boundaries that can genuinely
//! fail (deserializing text, edits with bad indices, uploads, config).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for etl-studio operations.
pub type Result<T> = std::result::Result<T, Error>;

/// etl-studio error types.
///
/// Each variant maps to a stable code so front-ends can branch on it.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Edit error: {0}")]
    Edit(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse(_) => "PARSE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Syntax(_) => "SYNTAX_ERROR",
            Error::Edit(_) => "EDIT_ERROR",
            Error::Upload(_) => "UPLOAD_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Template(_) => "TEMPLATE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error comes from outside the document itself
    /// (file system, upload target) rather than from its content.
    pub fn is_external(&self) -> bool {
        matches!(self, Error::Upload(_) | Error::Io(_))
    }

    /// Convert to a JSON error envelope for `--json` CLI output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

/// Severity of a reported finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks acceptance of the text (structural) or marks a record invalid.
    Error,
    /// Advisory only.
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

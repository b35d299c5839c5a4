//! Embedded query content: detection, linting and formatting.
//!
//! Action fields often carry SQL (scripts, filters, join conditions). This
//! module finds those fields and runs advisory checks and best-effort
//! formatting over them:
//! - Classify: field-name and content heuristics
//! - Lint: parser failure, unbalanced delimiters, risky patterns
//! - Format: layout and keyword case through a pluggable formatter

mod classify;
mod format;
mod lexer;
mod lint;

pub use classify::{classify, looks_like_query, name_suggests_query, NAME_FRAGMENTS, QUERY_KEYWORDS};
pub use format::{
    normalize, normalize_record, CaseStyle, IndentStyle, NormalizeOptions, SqlDialect,
    SqlFormatter, StandardFormatter,
};
pub use lexer::{mask_literals, tokenize, Token, TokenKind};
pub use lint::{lint_record, validate_sql, FieldLint, SqlValidation};

//! Query formatting.
//!
//! Parsing and layout are delegated to `sqlparser` and `sqlformat` behind
//! the [`SqlFormatter`] trait. Formatting is best-effort: [`normalize`]
//! hands back the input untouched when the formatter rejects it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::dialect::{dialect_from_str, GenericDialect};
use sqlparser::parser::Parser;
use std::str::FromStr;
use tracing::debug;

use super::classify::classify;
use super::lexer::{tokenize, TokenKind};
use crate::error::{Error, Result};
use crate::workflow::ActionRecord;

/// SQL dialect used for syntax checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Generic,
    Ansi,
    Postgres,
    MySql,
    Sqlite,
    Snowflake,
    BigQuery,
    Redshift,
    MsSql,
    Hive,
    DuckDb,
    ClickHouse,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Generic => "generic",
            SqlDialect::Ansi => "ansi",
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::Redshift => "redshift",
            SqlDialect::MsSql => "mssql",
            SqlDialect::Hive => "hive",
            SqlDialect::DuckDb => "duckdb",
            SqlDialect::ClickHouse => "clickhouse",
        }
    }
}

impl FromStr for SqlDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "generic" | "sql" => Ok(SqlDialect::Generic),
            "ansi" => Ok(SqlDialect::Ansi),
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "sqlite" => Ok(SqlDialect::Sqlite),
            "snowflake" => Ok(SqlDialect::Snowflake),
            "bigquery" => Ok(SqlDialect::BigQuery),
            "redshift" => Ok(SqlDialect::Redshift),
            "mssql" | "tsql" => Ok(SqlDialect::MsSql),
            "hive" => Ok(SqlDialect::Hive),
            "duckdb" => Ok(SqlDialect::DuckDb),
            "clickhouse" => Ok(SqlDialect::ClickHouse),
            other => Err(Error::Config(format!("Unknown SQL dialect: {}", other))),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Letter-case policy for one token class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStyle {
    #[default]
    Preserve,
    Upper,
    Lower,
}

impl CaseStyle {
    fn apply(&self, word: &str) -> String {
        match self {
            CaseStyle::Preserve => word.to_string(),
            CaseStyle::Upper => word.to_uppercase(),
            CaseStyle::Lower => word.to_lowercase(),
        }
    }
}

/// Indentation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndentStyle {
    Spaces(u8),
    Tabs,
}

impl Default for IndentStyle {
    fn default() -> Self {
        IndentStyle::Spaces(2)
    }
}

/// Formatting options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    pub dialect: SqlDialect,
    pub indent: IndentStyle,
    pub keyword_case: CaseStyle,
    pub identifier_case: CaseStyle,
    pub function_case: CaseStyle,
    pub data_type_case: CaseStyle,
    /// Blank lines between statements.
    pub lines_between_queries: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::Generic,
            indent: IndentStyle::Spaces(2),
            keyword_case: CaseStyle::Upper,
            identifier_case: CaseStyle::Preserve,
            function_case: CaseStyle::Upper,
            data_type_case: CaseStyle::Upper,
            lines_between_queries: 1,
        }
    }
}

/// External parse/format primitive.
pub trait SqlFormatter: Send + Sync {
    /// Fails with [`Error::Syntax`] when the text does not parse.
    fn check(&self, text: &str, dialect: SqlDialect) -> Result<()>;

    /// Lay out the text according to the options.
    fn format(&self, text: &str, options: &NormalizeOptions) -> Result<String>;
}

/// Formatter backed by `sqlparser` and `sqlformat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFormatter;

impl SqlFormatter for StandardFormatter {
    fn check(&self, text: &str, dialect: SqlDialect) -> Result<()> {
        let parsed = match dialect_from_str(dialect.as_str()) {
            Some(d) => Parser::parse_sql(&*d, text),
            None => Parser::parse_sql(&GenericDialect {}, text),
        };
        parsed
            .map(|_| ())
            .map_err(|e| Error::Syntax(e.to_string()))
    }

    fn format(&self, text: &str, options: &NormalizeOptions) -> Result<String> {
        self.check(text, options.dialect)?;

        let indent = match options.indent {
            IndentStyle::Spaces(n) => sqlformat::Indent::Spaces(n),
            IndentStyle::Tabs => sqlformat::Indent::Tabs,
        };
        let laid_out = sqlformat::format(
            text,
            &sqlformat::QueryParams::None,
            sqlformat::FormatOptions {
                indent,
                lines_between_queries: options.lines_between_queries,
                ..Default::default()
            },
        );

        Ok(apply_case(&laid_out, options))
    }
}

const KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BEGIN", "BETWEEN", "BY", "CASE", "CAST",
    "COLUMN", "COMMIT", "CREATE", "CROSS", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP",
    "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FETCH", "FIRST", "FOREIGN", "FROM", "FULL",
    "GRANT", "GROUP", "HAVING", "IF", "ILIKE", "IN", "INDEX", "INNER", "INSERT", "INTERSECT",
    "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "MERGE", "NATURAL", "NEXT", "NOT",
    "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PRIMARY",
    "RANGE", "REFERENCES", "REPLACE", "RETURNING", "REVOKE", "RIGHT", "ROLLBACK", "ROWS",
    "SELECT", "SET", "TABLE", "THEN", "TRUE", "TRUNCATE", "UNION", "UPDATE", "USING", "VALUES",
    "VIEW", "WHEN", "WHERE", "WINDOW", "WITH",
];

const DATA_TYPES: &[&str] = &[
    "BIGINT", "BINARY", "BLOB", "BOOL", "BOOLEAN", "CHAR", "DATE", "DATETIME", "DECIMAL",
    "DOUBLE", "FLOAT", "INT", "INTEGER", "INTERVAL", "JSON", "JSONB", "NUMERIC", "REAL",
    "SMALLINT", "STRING", "TEXT", "TIME", "TIMESTAMP", "TINYINT", "UUID", "VARBINARY", "VARCHAR",
];

fn in_list(list: &[&str], word: &str) -> bool {
    list.iter().any(|w| w.eq_ignore_ascii_case(word))
}

/// Rewrite word case per token class. Literals, quoted identifiers and
/// comments pass through unchanged.
fn apply_case(text: &str, options: &NormalizeOptions) -> String {
    let tokens = tokenize(text);
    let mut out = String::with_capacity(text.len());

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Word {
            out.push_str(token.text);
            continue;
        }

        let prev = tokens[..i].iter().rev().find(|t| t.is_significant());
        let next = tokens[i + 1..].iter().find(|t| t.is_significant());
        let qualified = prev.is_some_and(|t| t.is_punct("."));
        let called = next.is_some_and(|t| t.is_punct("("));

        let style = if qualified {
            options.identifier_case
        } else if in_list(DATA_TYPES, token.text) {
            options.data_type_case
        } else if in_list(KEYWORDS, token.text) {
            options.keyword_case
        } else if called {
            options.function_case
        } else {
            options.identifier_case
        };
        out.push_str(&style.apply(token.text));
    }

    out
}

/// Format text, returning it unchanged if the formatter fails.
pub fn normalize(text: &str, options: &NormalizeOptions, formatter: &dyn SqlFormatter) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    match formatter.format(text, options) {
        Ok(formatted) => formatted,
        Err(e) => {
            debug!(error = %e, "Formatting skipped");
            text.to_string()
        }
    }
}

/// Copy of the record with every classified field normalized.
///
/// Sequence fields are normalized element by element; non-string elements
/// are left as they are.
pub fn normalize_record(
    record: &ActionRecord,
    options: &NormalizeOptions,
    formatter: &dyn SqlFormatter,
) -> ActionRecord {
    let mut out = record.clone();

    for field in classify(record) {
        let Some(value) = record.get(&field) else {
            continue;
        };
        let normalized = match value {
            Value::String(s) => Value::String(normalize(s, options, formatter)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Value::String(normalize(s, options, formatter)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        };
        out.set(&field, normalized);
    }

    out
}

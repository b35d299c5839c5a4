//! Advisory checks for embedded query text.
//!
//! Parser failures and unbalanced delimiters are errors; everything else is
//! a warning. Neither ever blocks saving a record.

use regex_lite::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use super::classify::{classify, string_values};
use super::format::{SqlDialect, SqlFormatter};
use super::lexer::{mask_literals, tokenize, Token, TokenKind};
use crate::workflow::ActionRecord;

/// Result of checking one piece of query text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SqlValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SqlValidation {
    fn clean() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    pub fn has_findings(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }
}

/// Findings for one classified field (or one element of a sequence field).
#[derive(Debug, Clone, Serialize)]
pub struct FieldLint {
    pub field: String,
    /// Position within a sequence field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<usize>,
    pub report: SqlValidation,
}

fn chaining_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i);\s*(DROP|DELETE|INSERT|UPDATE|ALTER|TRUNCATE|CREATE|GRANT|EXEC)\b")
            .expect("valid regex")
    })
}

fn union_select_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bUNION\s+(ALL\s+)?SELECT\b").expect("valid regex"))
}

fn outer_join_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\s*=|=\s*\*|\(\s*\+\s*\)").expect("valid regex"))
}

/// Check query text.
pub fn validate_sql(text: &str, dialect: SqlDialect, formatter: &dyn SqlFormatter) -> SqlValidation {
    let mut report = SqlValidation::clean();
    if text.trim().is_empty() {
        return report;
    }

    if let Err(e) = formatter.check(text, dialect) {
        report.error(e.to_string());
    }

    let tokens = tokenize(text);
    check_delimiters(&tokens, &mut report);

    let statements = split_statements(&tokens);
    for statement in &statements {
        check_statement(statement, &mut report);
    }

    let masked = mask_literals(text);
    if let Some(caps) = chaining_pattern().captures(&masked) {
        report.warn(format!(
            "Possible statement chaining: ';' followed by {}",
            caps[1].to_uppercase()
        ));
    }
    if union_select_pattern().is_match(&masked) {
        report.warn("UNION SELECT pattern detected");
    }
    if tokens
        .iter()
        .rev()
        .find(|t| t.kind != TokenKind::Whitespace)
        .is_some_and(|t| t.kind == TokenKind::LineComment)
    {
        report.warn("Trailing line comment");
    }
    if tokens
        .iter()
        .any(|t| matches!(t.kind, TokenKind::BlockComment { .. }))
    {
        report.warn("Block comment detected");
    }
    if outer_join_pattern().is_match(&masked) {
        report.warn("Deprecated outer join operator syntax");
    }

    let ends_open = statements.last().is_some_and(|s| !s.is_empty());
    if statements.iter().filter(|s| !s.is_empty()).count() > 1 && ends_open {
        report.warn("Multiple statements without terminating semicolon");
    }

    report.valid = report.errors.is_empty();
    report
}

fn check_delimiters(tokens: &[Token<'_>], report: &mut SqlValidation) {
    let mut depth: i64 = 0;
    for token in tokens {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth < 0 {
                report.error("Unmatched closing parenthesis");
                depth = 0;
            }
        }
        match token.kind {
            TokenKind::SingleQuoted { terminated: false } => report.error("Unmatched single quote"),
            TokenKind::DoubleQuoted { terminated: false } => report.error("Unmatched double quote"),
            _ => {}
        }
    }
    if depth > 0 {
        report.error("Unmatched opening parenthesis");
    }
}

/// Significant tokens grouped by `;`. The last group is empty when the
/// text ends with a separator.
fn split_statements<'a>(tokens: &[Token<'a>]) -> Vec<Vec<Token<'a>>> {
    let mut statements = vec![Vec::new()];
    for token in tokens.iter().filter(|t| t.is_significant()) {
        if token.is_punct(";") {
            statements.push(Vec::new());
        } else if let Some(current) = statements.last_mut() {
            current.push(*token);
        }
    }
    statements
}

fn has_word(statement: &[Token<'_>], word: &str) -> bool {
    statement.iter().any(|t| t.is_word(word))
}

fn check_statement(statement: &[Token<'_>], report: &mut SqlValidation) {
    let Some(first) = statement.first() else {
        return;
    };

    if let Some(pos) = statement.iter().position(|t| t.is_word("SELECT")) {
        if !has_word(statement, "FROM") && !selects_without_table(&statement[pos + 1..]) {
            report.warn("SELECT without FROM clause");
        }
    }

    if first.is_word("UPDATE") && !has_word(statement, "WHERE") {
        report.warn("UPDATE ... without WHERE clause");
    }
    if first.is_word("DELETE") && !has_word(statement, "WHERE") {
        report.warn("DELETE ... without WHERE clause");
    }

    for (i, token) in statement.iter().enumerate() {
        if !token.is_word("JOIN") {
            continue;
        }
        let unconditioned = i > 0
            && (statement[i - 1].is_word("CROSS") || statement[i - 1].is_word("NATURAL"));
        if unconditioned {
            continue;
        }
        let conditioned = statement[i + 1..]
            .iter()
            .take_while(|t| !t.is_word("JOIN"))
            .any(|t| t.is_word("ON") || t.is_word("USING"));
        if !conditioned {
            report.warn("JOIN without ON or USING condition");
        }
    }
}

/// Whether the projection after SELECT is one of the forms that need no
/// table: literals, sub-expressions, variables, function calls and the
/// clock/boolean constants.
fn selects_without_table(rest: &[Token<'_>]) -> bool {
    let Some(head) = rest.first() else {
        return false;
    };
    if head.is_literal() || head.is_punct("(") || head.is_punct("@") || head.is_punct("-") {
        return true;
    }
    if head.kind != TokenKind::Word {
        return false;
    }
    let upper = head.text.to_uppercase();
    upper.starts_with("CURRENT_")
        || matches!(upper.as_str(), "NOW" | "TRUE" | "FALSE" | "NULL")
        || rest.get(1).is_some_and(|t| t.is_punct("("))
}

/// Lint every classified field of a record.
pub fn lint_record(
    record: &ActionRecord,
    dialect: SqlDialect,
    formatter: &dyn SqlFormatter,
) -> Vec<FieldLint> {
    let mut findings = Vec::new();

    for field in classify(record) {
        let Some(value) = record.get(&field) else {
            continue;
        };
        if value.is_array() {
            let texts = value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .enumerate()
                        .filter_map(|(i, v)| v.as_str().map(|s| (i, s)))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            for (i, text) in texts {
                findings.push(FieldLint {
                    field: field.clone(),
                    element: Some(i),
                    report: validate_sql(text, dialect, formatter),
                });
            }
        } else {
            for text in string_values(value) {
                findings.push(FieldLint {
                    field: field.clone(),
                    element: None,
                    report: validate_sql(text, dialect, formatter),
                });
            }
        }
    }

    findings
}

//! Action templates.
//!
//! Templates are ready-made action records with `{{ variable }}`
//! placeholders. Instantiating one yields a record that can be inserted
//! into a document like any other edit.

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::workflow::{ActionKind, ActionRecord};

/// An action template with variable substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Template name (e.g., "extract-csv")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Action type the template produces
    pub action: ActionKind,

    /// Template variables
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,

    /// One action record in YAML, with {{ variable }} placeholders
    pub content: String,
}

/// A variable that can be substituted in the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Whether this variable is required
    #[serde(default = "default_true")]
    pub required: bool,

    /// Default value if not provided
    #[serde(default)]
    pub default: Option<String>,

    /// Example value for documentation
    #[serde(default)]
    pub example: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TemplateVariable {
    fn required(name: &str, description: &str, example: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            default: None,
            example: Some(example.to_string()),
        }
    }

    fn optional(name: &str, description: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
            default: Some(default.to_string()),
            example: None,
        }
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex"))
}

/// Template registry for managing available templates.
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
    custom_dir: Option<PathBuf>,
}

impl TemplateRegistry {
    /// Create a new registry with built-in templates.
    pub fn new() -> Self {
        let mut registry = Self {
            templates: HashMap::new(),
            custom_dir: None,
        };
        registry.register_builtin_templates();
        registry
    }

    /// Create registry with custom template directory.
    pub fn with_custom_dir(custom_dir: impl AsRef<Path>) -> Result<Self> {
        let mut registry = Self::new();
        registry.custom_dir = Some(custom_dir.as_ref().to_path_buf());
        registry.load_custom_templates()?;
        Ok(registry)
    }

    fn register(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    fn register_builtin_templates(&mut self) {
        let name = || TemplateVariable::required("name", "Display name of the action", "load raw orders");
        let dataframe = || TemplateVariable::required("dataframe", "Dataframe the action produces", "orders");

        self.register(Template {
            name: "extract-csv".to_string(),
            description: "Read a delimited file into a dataframe".to_string(),
            action: ActionKind::Extract,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("location", "Path or URI of the file", "s3://raw/orders.csv"),
                TemplateVariable::optional("format", "File format", "csv"),
            ],
            content: r#"action: Extract
name: "{{ name }}"
dataframe: "{{ dataframe }}"
location: "{{ location }}"
format: "{{ format }}"
options:
  header: true
"#
            .to_string(),
        });

        self.register(Template {
            name: "run-sql".to_string(),
            description: "Run a SQL script against a connection".to_string(),
            action: ActionKind::Execute,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("script", "SQL to run", "SELECT * FROM orders WHERE status = 'open'"),
                TemplateVariable::optional("connection", "Connection name", "warehouse"),
            ],
            content: r#"action: Execute
name: "{{ name }}"
dataframe: "{{ dataframe }}"
script: "{{ script }}"
connection: "{{ connection }}"
"#
            .to_string(),
        });

        self.register(Template {
            name: "sql-transform".to_string(),
            description: "Derive a dataframe from another with a query".to_string(),
            action: ActionKind::Transform,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("source", "Dataframe to read from", "orders"),
            ],
            content: r#"action: Transform
name: "{{ name }}"
dataframe: "{{ dataframe }}"
transformations:
  - "SELECT * FROM {{ source }}"
"#
            .to_string(),
        });

        self.register(Template {
            name: "load-table".to_string(),
            description: "Write a dataframe to a destination".to_string(),
            action: ActionKind::Load,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("destination", "Target table or path", "analytics.orders"),
                TemplateVariable::optional("mode", "Write mode", "overwrite"),
            ],
            content: r#"action: Load
name: "{{ name }}"
dataframe: "{{ dataframe }}"
destination: "{{ destination }}"
mode: "{{ mode }}"
"#
            .to_string(),
        });

        self.register(Template {
            name: "join-frames".to_string(),
            description: "Join two dataframes on a shared key".to_string(),
            action: ActionKind::Merge,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("left", "Left dataframe", "orders"),
                TemplateVariable::required("right", "Right dataframe", "customers"),
                TemplateVariable::required("key", "Join column", "customer_id"),
                TemplateVariable::optional("how", "Join type", "inner"),
            ],
            content: r#"action: Merge
name: "{{ name }}"
dataframe: "{{ dataframe }}"
sources:
  - "{{ left }}"
  - "{{ right }}"
condition: "{{ left }}.{{ key }} = {{ right }}.{{ key }}"
how: "{{ how }}"
"#
            .to_string(),
        });

        self.register(Template {
            name: "purge-old".to_string(),
            description: "Delete rows past a retention window".to_string(),
            action: ActionKind::Purge,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("target", "Table to purge", "staging.events"),
                TemplateVariable::optional("retention_days", "Days to keep", "30"),
            ],
            content: r#"action: Purge
name: "{{ name }}"
dataframe: "{{ dataframe }}"
target: "{{ target }}"
retention_days: {{ retention_days }}
"#
            .to_string(),
        });

        self.register(Template {
            name: "s3-replicate".to_string(),
            description: "Copy objects between buckets".to_string(),
            action: ActionKind::S3Replicate,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("source_bucket", "Bucket to copy from", "raw-landing"),
                TemplateVariable::required("destination_bucket", "Bucket to copy to", "raw-archive"),
                TemplateVariable::optional("prefix", "Key prefix to copy", ""),
            ],
            content: r#"action: S3Replicate
name: "{{ name }}"
dataframe: "{{ dataframe }}"
source_bucket: "{{ source_bucket }}"
destination_bucket: "{{ destination_bucket }}"
prefix: "{{ prefix }}"
"#
            .to_string(),
        });

        self.register(Template {
            name: "include-workflow".to_string(),
            description: "Run another workflow file in place".to_string(),
            action: ActionKind::Include,
            variables: vec![
                name(),
                dataframe(),
                TemplateVariable::required("path", "Workflow file to include", "shared/cleanup.yaml"),
            ],
            content: r#"action: Include
name: "{{ name }}"
dataframe: "{{ dataframe }}"
path: "{{ path }}"
"#
            .to_string(),
        });
    }

    /// Load templates from custom directory.
    fn load_custom_templates(&mut self) -> Result<()> {
        let dir = match &self.custom_dir {
            Some(d) => d.clone(),
            None => return Ok(()),
        };

        if !dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&dir)
            .map_err(|e| Error::Config(format!("Failed to read templates dir: {}", e)))?
        {
            let entry = entry.map_err(|e| Error::Config(format!("Failed to read entry: {}", e)))?;
            let path = entry.path();

            if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
                match load_template_file(&path) {
                    Ok(template) => self.register(template),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping template"),
                }
            }
        }

        Ok(())
    }

    /// List all available templates.
    pub fn list(&self) -> Vec<&Template> {
        let mut templates: Vec<_> = self.templates.values().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    /// Templates grouped by the action type they produce.
    pub fn list_by_action(&self) -> HashMap<ActionKind, Vec<&Template>> {
        let mut by_action: HashMap<ActionKind, Vec<&Template>> = HashMap::new();
        for template in self.templates.values() {
            by_action.entry(template.action).or_default().push(template);
        }
        for templates in by_action.values_mut() {
            templates.sort_by(|a, b| a.name.cmp(&b.name));
        }
        by_action
    }

    /// Get a template by name.
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Substitute variables into a template's text.
    pub fn render(&self, name: &str, variables: &HashMap<String, String>) -> Result<String> {
        let template = self
            .get(name)
            .ok_or_else(|| Error::Template(format!("Template not found: {}", name)))?;

        let missing = self.validate_variables(name, variables)?;
        if let Some(var) = missing.first() {
            return Err(Error::Template(format!("Missing required variable: {}", var)));
        }

        let mut subs: HashMap<&str, &str> = HashMap::new();
        for var in &template.variables {
            if let Some(value) = variables.get(&var.name) {
                subs.insert(&var.name, value);
            } else if let Some(default) = &var.default {
                subs.insert(&var.name, default);
            }
        }

        let mut unresolved = None;
        let rendered = placeholder().replace_all(&template.content, |caps: &Captures<'_>| {
            match subs.get(&caps[1]) {
                Some(value) => {
                    let offset = caps.get(0).map_or(0, |m| m.start());
                    escape_scalar(value, quote_context(&template.content, offset))
                }
                None => {
                    unresolved.get_or_insert_with(|| caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });

        if let Some(var) = unresolved {
            return Err(Error::Template(format!("Unresolved placeholder: {}", var)));
        }

        Ok(rendered.into_owned())
    }

    /// Instantiate a template into an action record.
    pub fn instantiate(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<ActionRecord> {
        let rendered = self.render(name, variables)?;
        let value: Value = serde_yaml::from_str(&rendered)
            .map_err(|e| Error::Template(format!("Template '{}' rendered invalid YAML: {}", name, e)))?;

        match value {
            Value::Object(map) => Ok(ActionRecord::from_map(map)),
            _ => Err(Error::Template(format!(
                "Template '{}' does not render to a mapping",
                name
            ))),
        }
    }

    /// Names of required variables that are neither provided nor defaulted.
    pub fn validate_variables(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let template = self
            .get(name)
            .ok_or_else(|| Error::Template(format!("Template not found: {}", name)))?;

        Ok(template
            .variables
            .iter()
            .filter(|var| var.required && var.default.is_none() && !variables.contains_key(&var.name))
            .map(|var| var.name.clone())
            .collect())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which YAML scalar style surrounds a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteContext {
    Plain,
    Single,
    Double,
}

/// Quote state at `offset`, scanning from the start of its line.
///
/// A quote only opens a scalar at the start of a token, so apostrophes
/// inside plain text are ignored.
fn quote_context(content: &str, offset: usize) -> QuoteContext {
    let line_start = content[..offset].rfind('\n').map_or(0, |i| i + 1);
    let mut state = QuoteContext::Plain;
    let mut prev = None;
    let mut chars = content[line_start..offset].chars();

    while let Some(c) = chars.next() {
        let opens = prev.map_or(true, |p: char| p.is_whitespace() || "[{,:-".contains(p));
        match (state, c) {
            (QuoteContext::Double, '\\') => {
                chars.next();
            }
            (QuoteContext::Double, '"') | (QuoteContext::Single, '\'') => state = QuoteContext::Plain,
            (QuoteContext::Plain, '"') if opens => state = QuoteContext::Double,
            (QuoteContext::Plain, '\'') if opens => state = QuoteContext::Single,
            _ => {}
        }
        prev = Some(c);
    }
    state
}

/// Escape a substituted value for the scalar style it lands in.
fn escape_scalar(value: &str, context: QuoteContext) -> String {
    match context {
        QuoteContext::Plain => value.to_string(),
        QuoteContext::Single => value.replace('\'', "''"),
        QuoteContext::Double => {
            // JSON string escapes are a subset of YAML double-quoted escapes.
            match serde_json::to_string(value) {
                Ok(quoted) => quoted[1..quoted.len() - 1].to_string(),
                Err(_) => value.replace('\\', "\\\\").replace('"', "\\\""),
            }
        }
    }
}

fn load_template_file(path: &Path) -> Result<Template> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read template file: {}", e)))?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse template: {}", e)))
}

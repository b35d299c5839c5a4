use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etl_studio::config::Config;
use etl_studio::sql::{lint_record, SqlDialect, StandardFormatter};
use etl_studio::store::{DocumentStore, Edit, ViewKind};
use etl_studio::templates::TemplateRegistry;
use etl_studio::upload::{SimulatedUploader, UploadRequest, Uploader};
use etl_studio::workflow::{load_document, DocumentSchemaValidator, MatchMode, SchemaRegistry};

#[derive(Parser)]
#[command(name = "etl-studio")]
#[command(about = "Edit, check and visualize declarative ETL workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/etl-studio/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file
    Validate {
        /// Path to workflow YAML file
        file: PathBuf,
        /// Also check the document against the generated JSON Schema
        #[arg(long)]
        strict: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the inferred dependency graph
    Graph {
        /// Path to workflow YAML file
        file: PathBuf,
        /// Require dataframe references to be whole identifiers
        #[arg(long)]
        word_boundary: bool,
        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check embedded SQL in every action
    Lint {
        /// Path to workflow YAML file
        file: PathBuf,
        /// SQL dialect (overrides config)
        #[arg(short, long)]
        dialect: Option<SqlDialect>,
        /// Print findings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Format embedded SQL in every action
    Format {
        /// Path to workflow YAML file
        file: PathBuf,
        /// SQL dialect (overrides config)
        #[arg(short, long)]
        dialect: Option<SqlDialect>,
        /// Write the result back instead of printing it
        #[arg(short, long)]
        write: bool,
    },
    /// Show the action type table
    Schema {
        /// Print the generated JSON Schema for whole documents
        #[arg(long)]
        json_schema: bool,
    },
    /// Manage action templates
    Templates {
        #[command(subcommand)]
        action: TemplateActions,
    },
    /// Upload a workflow file
    Upload {
        /// Path to workflow YAML file
        file: PathBuf,
        /// Remote filename (defaults to the local name)
        #[arg(short, long)]
        name: Option<String>,
        /// Upload even if the document has record errors
        #[arg(long)]
        force: bool,
    },
    /// Watch a workflow file and re-validate on change
    Watch {
        /// Path to workflow YAML file
        file: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
enum TemplateActions {
    /// List available action templates
    List {
        /// Group templates by action type
        #[arg(long)]
        by_action: bool,
    },
    /// Show details of a specific template
    Show {
        /// Template name
        name: String,
    },
    /// Create an action from a template
    Use {
        /// Template name
        name: String,
        /// Variable assignments (key=value)
        #[arg(short, long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Workflow file to append the action to (printed if omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Insert position instead of appending
        #[arg(long)]
        at: Option<usize>,
    },
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid variable format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "etl_studio=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match cli.command {
        Commands::Validate { file, strict, json } => cmd_validate(&config, &file, strict, json)?,
        Commands::Graph {
            file,
            word_boundary,
            json,
        } => cmd_graph(&config, &file, word_boundary, json)?,
        Commands::Lint {
            file,
            dialect,
            json,
        } => cmd_lint(&config, &file, dialect, json)?,
        Commands::Format {
            file,
            dialect,
            write,
        } => cmd_format(&config, &file, dialect, write)?,
        Commands::Schema { json_schema } => cmd_schema(&config, json_schema)?,
        Commands::Templates { action } => match action {
            TemplateActions::List { by_action } => cmd_templates_list(&config, by_action)?,
            TemplateActions::Show { name } => cmd_templates_show(&config, &name)?,
            TemplateActions::Use {
                name,
                vars,
                file,
                at,
            } => cmd_templates_use(&config, &name, &vars, file.as_deref(), at)?,
        },
        Commands::Upload { file, name, force } => {
            cmd_upload(&config, &file, name.as_deref(), force).await?
        }
        Commands::Watch { file } => cmd_watch(&config, &file).await?,
        Commands::Completions { shell } => {
            cmd_completions(shell)?;
        }
    }

    Ok(())
}

/// Shell completion variants
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CompletionShell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Generate shell completions
fn cmd_completions(shell: CompletionShell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let shell: Shell = shell.into();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

// ============================================================================
// Shared setup
// ============================================================================

fn schema_registry(config: &Config) -> anyhow::Result<Arc<SchemaRegistry>> {
    match &config.editor.schema_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(Arc::new(SchemaRegistry::from_yaml_str(&content)?))
        }
        None => Ok(Arc::new(SchemaRegistry::builtin())),
    }
}

fn template_registry(config: &Config) -> anyhow::Result<TemplateRegistry> {
    Ok(TemplateRegistry::with_custom_dir(config.templates_dir())?)
}

fn new_store(config: &Config) -> anyhow::Result<DocumentStore> {
    Ok(DocumentStore::with_options(
        schema_registry(config)?,
        config.cache.build(),
        config.editor.match_mode,
    ))
}

/// Open a workflow file into a store, failing if it is not a document.
fn open_store(config: &Config, file: &Path) -> anyhow::Result<DocumentStore> {
    let mut store = new_store(config)?;
    let sync = store.load_file(file)?;
    if !sync.accepted {
        anyhow::bail!("{}: {}", file.display(), sync.errors.join("; "));
    }
    Ok(store)
}

// ============================================================================
// Document Commands
// ============================================================================

fn cmd_validate(config: &Config, file: &Path, strict: bool, json: bool) -> anyhow::Result<()> {
    let store = open_store(config, file)?;

    let violations = if strict {
        let raw = load_document(store.text())?;
        DocumentSchemaValidator::new(store.registry())?.violations(&raw)
    } else {
        Vec::new()
    };

    if json {
        let output = serde_json::json!({
            "valid": store.errors().is_empty() && violations.is_empty(),
            "actions": store.records().len(),
            "errors": store.errors(),
            "schema_violations": violations
                .iter()
                .map(|v| serde_json::json!({ "path": v.path, "message": v.message }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for error in store.errors() {
            println!("✗ {}", error);
        }
        for violation in &violations {
            println!("✗ {} at '{}'", violation.message, violation.path);
        }
        if store.errors().is_empty() && violations.is_empty() {
            println!("✓ Workflow '{}' is valid", file.display());
            println!("  Actions: {}", store.records().len());
        }
    }

    if !store.errors().is_empty() || !violations.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_graph(config: &Config, file: &Path, word_boundary: bool, json: bool) -> anyhow::Result<()> {
    let mut store = open_store(config, file)?;
    if word_boundary {
        store.set_mode(MatchMode::WordBoundary);
    }

    let graph = store.graph();
    if json {
        println!("{}", serde_json::to_string_pretty(graph)?);
        return Ok(());
    }

    if graph.nodes.is_empty() {
        println!("No actions.");
        return Ok(());
    }

    println!("{}", graph.to_text());
    if graph.has_cycle() {
        println!();
        println!("⚠ Dependencies form a cycle");
    }
    Ok(())
}

fn cmd_lint(
    config: &Config,
    file: &Path,
    dialect: Option<SqlDialect>,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(config, file)?;
    let dialect = dialect.unwrap_or(config.format.dialect);
    let formatter = StandardFormatter;

    let mut report = Vec::new();
    for (index, record) in store.records().iter().enumerate() {
        let findings = lint_record(record, dialect, &formatter);
        if !findings.is_empty() {
            report.push((index, record.name().unwrap_or("").to_string(), findings));
        }
    }

    let error_count: usize = report
        .iter()
        .flat_map(|(_, _, f)| f.iter())
        .map(|f| f.report.errors.len())
        .sum();

    if json {
        let output: Vec<_> = report
            .iter()
            .map(|(index, name, findings)| {
                serde_json::json!({ "index": index, "name": name, "fields": findings })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for (index, name, findings) in &report {
            for finding in findings.iter().filter(|f| f.report.has_findings()) {
                let location = match finding.element {
                    Some(i) => format!("{}[{}]", finding.field, i),
                    None => finding.field.clone(),
                };
                println!("{}. {} :: {}", index + 1, name, location);
                for error in &finding.report.errors {
                    println!("  ✗ {}", error);
                }
                for warning in &finding.report.warnings {
                    println!("  ⚠ {}", warning);
                }
            }
        }
        println!("{} SQL error(s)", error_count);
    }

    Ok(())
}

fn cmd_format(
    config: &Config,
    file: &Path,
    dialect: Option<SqlDialect>,
    write: bool,
) -> anyhow::Result<()> {
    let mut store = open_store(config, file)?;
    let mut options = config.format.clone();
    if let Some(dialect) = dialect {
        options.dialect = dialect;
    }

    store.normalize_all(&options, &StandardFormatter)?;

    if write {
        store.save_file(file)?;
        println!("Formatted {}", file.display());
    } else {
        print!("{}", store.text());
    }
    Ok(())
}

fn cmd_schema(config: &Config, json_schema: bool) -> anyhow::Result<()> {
    let registry = schema_registry(config)?;

    if json_schema {
        println!("{}", serde_json::to_string_pretty(&registry.document_schema())?);
        return Ok(());
    }

    println!("{:<14} {:<40} OPTIONAL", "TYPE", "REQUIRED");
    println!("{}", "-".repeat(80));
    for definition in registry.definitions() {
        println!(
            "{:<14} {:<40} {}",
            definition.type_tag,
            definition.required_fields.join(", "),
            definition.optional_fields.join(", ")
        );
    }
    Ok(())
}

// ============================================================================
// Template Commands
// ============================================================================

fn cmd_templates_list(config: &Config, by_action: bool) -> anyhow::Result<()> {
    let registry = template_registry(config)?;

    if by_action {
        let by_action = registry.list_by_action();
        let mut kinds: Vec<_> = by_action.keys().copied().collect();
        kinds.sort();

        for kind in kinds {
            println!("{}:", kind.as_str().to_uppercase());
            for template in &by_action[&kind] {
                println!("  {:<25} {}", template.name, template.description);
            }
            println!();
        }
        return Ok(());
    }

    let templates = registry.list();
    if templates.is_empty() {
        println!("No templates available.");
        return Ok(());
    }

    println!("{:<25} {:<15} DESCRIPTION", "NAME", "ACTION");
    println!("{}", "-".repeat(70));
    for template in templates {
        println!(
            "{:<25} {:<15} {}",
            template.name, template.action, template.description
        );
    }
    Ok(())
}

fn cmd_templates_show(config: &Config, name: &str) -> anyhow::Result<()> {
    let registry = template_registry(config)?;
    let template = registry
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Template not found: {}", name))?;

    println!("Template: {}", template.name);
    println!("Action: {}", template.action);
    println!("Description: {}", template.description);
    println!();

    println!("Variables:");
    for var in &template.variables {
        let required = if var.required && var.default.is_none() {
            " (required)"
        } else {
            ""
        };
        let default = var
            .default
            .as_ref()
            .map(|d| format!(" [default: {}]", d))
            .unwrap_or_default();
        println!("  {}{}{} - {}", var.name, required, default, var.description);
    }
    println!();
    println!("Content:");
    print!("{}", template.content);
    Ok(())
}

fn cmd_templates_use(
    config: &Config,
    name: &str,
    vars: &[(String, String)],
    file: Option<&Path>,
    at: Option<usize>,
) -> anyhow::Result<()> {
    let registry = template_registry(config)?;
    let variables: HashMap<String, String> = vars.iter().cloned().collect();

    let missing = registry.validate_variables(name, &variables)?;
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing required variables: {}. Use --var key=value",
            missing.join(", ")
        );
    }

    let record = registry.instantiate(name, &variables)?;

    let Some(file) = file else {
        print!("{}", serde_yaml::to_string(&record)?);
        return Ok(());
    };

    let mut store = if file.exists() {
        open_store(config, file)?
    } else {
        new_store(config)?
    };
    let edit = match at {
        Some(index) => Edit::Insert { index, record },
        None => Edit::Append(record),
    };
    store.apply(ViewKind::Form, edit)?;
    store.save_file(file)?;

    println!(
        "Added '{}' to {} ({} action(s))",
        name,
        file.display(),
        store.records().len()
    );
    for error in store.errors() {
        println!("  ⚠ {}", error);
    }
    Ok(())
}

// ============================================================================
// Upload Command
// ============================================================================

async fn cmd_upload(
    config: &Config,
    file: &Path,
    name: Option<&str>,
    force: bool,
) -> anyhow::Result<()> {
    let store = open_store(config, file)?;
    if !store.errors().is_empty() && !force {
        for error in store.errors() {
            eprintln!("✗ {}", error);
        }
        anyhow::bail!("Document has errors; use --force to upload anyway");
    }

    let filename = match name {
        Some(n) => n.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let uploader = SimulatedUploader::new(config.upload.bucket.clone())
        .with_prefix(config.upload.prefix.clone())
        .with_steps(config.upload.steps, config.upload.step_delay());

    let progress = |percent: u8| eprint!("\rUploading... {:>3}%", percent);
    let receipt = uploader
        .upload(
            UploadRequest::new(filename, store.text()),
            Some(&progress as &etl_studio::upload::ProgressFn),
        )
        .await;
    eprintln!();

    let receipt = receipt?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

// ============================================================================
// Watch Command
// ============================================================================

async fn cmd_watch(config: &Config, file: &Path) -> anyhow::Result<()> {
    use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode};
    use std::time::Duration;

    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let canonical_path = file.canonicalize()?;
    let watch_dir = canonical_path.parent().unwrap_or(Path::new("."));

    println!("etl-studio watch mode");
    println!("Watching: {}", canonical_path.display());
    println!("Press Ctrl+C to stop\n");

    let mut store = new_store(config)?;
    reload(&mut store, &canonical_path);

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(Duration::from_millis(500), notify_tx)?;
    debouncer
        .watcher()
        .watch(watch_dir, RecursiveMode::NonRecursive)?;

    // Bridge the std channel used by notify to tokio
    let bridge_target = canonical_path.clone();
    std::thread::spawn(move || {
        while let Ok(result) = notify_rx.recv() {
            if let Ok(events) = result {
                if events.iter().any(|event| event.path == bridge_target) {
                    let _ = tx.blocking_send(());
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping watch mode...");
                break;
            }
            Some(_) = rx.recv() => {
                println!("\n--- File changed: {} ---", chrono::Local::now().format("%H:%M:%S"));
                reload(&mut store, &canonical_path);
            }
        }
    }

    Ok(())
}

fn reload(store: &mut DocumentStore, path: &Path) {
    match store.load_file(path) {
        Ok(sync) if sync.accepted => {
            if store.errors().is_empty() {
                println!("✓ Workflow is valid");
            }
            for error in store.errors() {
                eprintln!("✗ {}", error);
            }
            println!("  Actions: {}", store.records().len());
            println!("  Dependencies: {}", store.graph().edges.len());
        }
        Ok(sync) => {
            for error in &sync.errors {
                eprintln!("✗ {}", error);
            }
            println!("  Keeping last good version ({} actions)", store.records().len());
        }
        Err(e) => eprintln!("✗ Failed to read file: {}", e),
    }
}

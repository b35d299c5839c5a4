//! Configuration management.
//!
//! etl-studio configuration can come from:
//! - Environment variables (ETL_STUDIO_*)
//! - Config file (~/.config/etl-studio/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::sql::{NormalizeOptions, SqlDialect};
use crate::workflow::{EdgeCache, MatchMode};

/// etl-studio configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub editor: EditorConfig,

    /// Query formatting
    #[serde(default)]
    pub format: NormalizeOptions,

    /// Dependency inference cache
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

/// Editor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditorConfig {
    /// How dataframe references are matched
    #[serde(default)]
    pub match_mode: MatchMode,

    /// Schema table replacing the built-in one
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    /// Directory of extra action templates
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

/// Edge cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,

    /// Seconds an unused entry is kept
    #[serde(default = "default_cache_tti")]
    pub tti_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            tti_seconds: default_cache_tti(),
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> EdgeCache {
        EdgeCache::with_config(self.capacity, self.tti_seconds)
    }
}

fn default_cache_capacity() -> u64 {
    64
}

fn default_cache_tti() -> u64 {
    300
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix for uploaded documents
    #[serde(default)]
    pub prefix: String,

    /// Progress steps reported per upload
    #[serde(default = "default_steps")]
    pub steps: u8,

    /// Delay between progress steps (milliseconds)
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: String::new(),
            steps: default_steps(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

impl UploadConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

fn default_bucket() -> String {
    "etl-workflows".to_string()
}

fn default_steps() -> u8 {
    10
}

fn default_step_delay_ms() -> u64 {
    100
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        match Self::load_partial_from_path(&primary_path) {
            Ok(Some(partial)) => config.apply_partial(partial),
            Ok(None) => {}
            Err(e) => warn!(path = %primary_path.display(), error = %e, "Ignoring config file"),
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from an explicit file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        match Self::load_partial_from_path(path)? {
            Some(partial) => config.apply_partial(partial),
            None => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )))
            }
        }
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("etl-studio"))
            .unwrap_or_else(|| PathBuf::from(".etl-studio"))
    }

    /// Default directory for custom templates.
    pub fn templates_dir(&self) -> PathBuf {
        self.editor
            .templates_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("templates"))
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = var("ETL_STUDIO_MATCH_MODE") {
            match mode.to_lowercase().as_str() {
                "substring" => self.editor.match_mode = MatchMode::Substring,
                "word_boundary" | "word" => self.editor.match_mode = MatchMode::WordBoundary,
                other => warn!(value = other, "Ignoring ETL_STUDIO_MATCH_MODE"),
            }
        }
        if let Some(path) = var("ETL_STUDIO_SCHEMA") {
            self.editor.schema_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("ETL_STUDIO_TEMPLATES_DIR") {
            self.editor.templates_dir = Some(PathBuf::from(path));
        }
        if let Some(dialect) = var("ETL_STUDIO_SQL_DIALECT") {
            match dialect.parse::<SqlDialect>() {
                Ok(parsed) => self.format.dialect = parsed,
                Err(e) => warn!(error = %e, "Ignoring ETL_STUDIO_SQL_DIALECT"),
            }
        }
        if let Some(capacity) = var("ETL_STUDIO_CACHE_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<u64>() {
                self.cache.capacity = parsed;
            }
        }
        if let Some(bucket) = var("ETL_STUDIO_UPLOAD_BUCKET") {
            self.upload.bucket = bucket;
        }
        if let Some(prefix) = var("ETL_STUDIO_UPLOAD_PREFIX") {
            self.upload.prefix = prefix;
        }
    }

    /// `Ok(None)` when the file does not exist.
    fn load_partial_from_path(path: &Path) -> Result<Option<PartialConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let partial = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        Ok(Some(partial))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(editor) = partial.editor {
            self.editor = editor;
        }
        if let Some(format) = partial.format {
            self.format = format;
        }
        if let Some(cache) = partial.cache {
            self.cache = cache;
        }
        if let Some(upload) = partial.upload {
            self.upload = upload;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    editor: Option<EditorConfig>,
    format: Option<NormalizeOptions>,
    cache: Option<CacheConfig>,
    upload: Option<UploadConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::CaseStyle;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.editor.match_mode, MatchMode::Substring);
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(config.upload.bucket, "etl-workflows");
        assert_eq!(config.format.keyword_case, CaseStyle::Upper);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[editor]
match_mode = "word_boundary"

[format]
dialect = "postgres"
indent = "tabs"

[upload]
bucket = "team-bucket"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.editor.match_mode, MatchMode::WordBoundary);
        assert_eq!(config.format.dialect, SqlDialect::Postgres);
        assert_eq!(config.format.indent, crate::sql::IndentStyle::Tabs);
        assert_eq!(config.upload.steps, 10);
        assert_eq!(config.cache.tti_seconds, 300);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[editor\n").unwrap();
        assert_eq!(Config::load_from(&path).unwrap_err().code(), "CONFIG_ERROR");
        assert!(Config::load_from(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ETL_STUDIO_MATCH_MODE", "word"),
            ("ETL_STUDIO_SQL_DIALECT", "snowflake"),
            ("ETL_STUDIO_CACHE_CAPACITY", "8"),
            ("ETL_STUDIO_UPLOAD_BUCKET", "other"),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.editor.match_mode, MatchMode::WordBoundary);
        assert_eq!(config.format.dialect, SqlDialect::Snowflake);
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.upload.bucket, "other");
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|k| match k {
            "ETL_STUDIO_SQL_DIALECT" => Some("cobol".to_string()),
            "ETL_STUDIO_CACHE_CAPACITY" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.format.dialect, SqlDialect::Generic);
        assert_eq!(config.cache.capacity, 64);
    }
}

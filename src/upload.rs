//! Workflow upload boundary.
//!
//! Uploading is the one asynchronous operation in the editor. The core
//! only cares about success or failure and progress; the transport sits
//! behind the [`Uploader`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Maximum filename length in characters, extension included.
pub const MAX_FILENAME_LEN: usize = 255;

/// Characters never allowed in a filename.
pub const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Device names rejected regardless of case or extension.
pub const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Check an upload filename and append `.yaml` if it has no YAML extension.
///
/// The length limit applies to the final name, extension included.
pub fn validate_filename(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::Upload("Filename cannot be empty".to_string()));
    }

    if let Some(c) = name
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
    {
        return Err(Error::Upload(format!(
            "Filename contains invalid character {:?}",
            c
        )));
    }

    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return Err(Error::Upload(format!("Filename '{}' is reserved", name)));
    }

    let lower = name.to_lowercase();
    let full = if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        name.to_string()
    } else {
        format!("{}.yaml", name)
    };

    if full.chars().count() > MAX_FILENAME_LEN {
        return Err(Error::Upload(format!(
            "Filename exceeds {} characters including extension",
            MAX_FILENAME_LEN
        )));
    }
    Ok(full)
}

/// What to upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content: String,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub success: bool,
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub e_tag: String,
    pub size: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// Progress callback, called with a percentage in `0..=100`.
pub type ProgressFn = dyn Fn(u8) + Send + Sync;

/// Remote storage for workflow documents.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<&ProgressFn>,
    ) -> Result<UploadReceipt>;
}

/// Uploader that performs no I/O and only reports progress.
#[derive(Debug, Clone)]
pub struct SimulatedUploader {
    bucket: String,
    prefix: String,
    steps: u8,
    step_delay: Duration,
    failure: Option<String>,
}

impl SimulatedUploader {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            steps: 10,
            step_delay: Duration::from_millis(100),
            failure: None,
        }
    }

    /// Key prefix, e.g. `workflows/`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_steps(mut self, steps: u8, step_delay: Duration) -> Self {
        self.steps = steps.max(1);
        self.step_delay = step_delay;
        self
    }

    /// Make every upload fail halfway with this message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    fn key_for(&self, filename: &str) -> String {
        if self.prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), filename)
        }
    }
}

#[async_trait]
impl Uploader for SimulatedUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<&ProgressFn>,
    ) -> Result<UploadReceipt> {
        let filename = validate_filename(&request.filename)?;
        let key = self.key_for(&filename);
        debug!(bucket = %self.bucket, key = %key, "Starting upload");

        for step in 1..=self.steps {
            tokio::time::sleep(self.step_delay).await;

            if let Some(message) = &self.failure {
                if step > self.steps / 2 {
                    warn!(key = %key, error = %message, "Upload failed");
                    return Err(Error::Upload(message.clone()));
                }
            }

            if let Some(report) = progress {
                report((u16::from(step) * 100 / u16::from(self.steps)) as u8);
            }
        }

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        request.content.hash(&mut hasher);

        let receipt = UploadReceipt {
            success: true,
            location: format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
            bucket: self.bucket.clone(),
            e_tag: format!("\"{:016x}\"", hasher.finish()),
            size: request.content.len(),
            key,
            uploaded_at: Utc::now(),
        };
        info!(location = %receipt.location, size = receipt.size, "Upload complete");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_appends_extension() {
        assert_eq!(validate_filename("pipeline").unwrap(), "pipeline.yaml");
        assert_eq!(validate_filename("pipeline.yml").unwrap(), "pipeline.yml");
        assert_eq!(validate_filename("Pipeline.YAML").unwrap(), "Pipeline.YAML");
        assert_eq!(validate_filename("daily.v2").unwrap(), "daily.v2.yaml");
    }

    #[test]
    fn test_rejects_empty_and_long() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("   ").is_err());
        assert!(validate_filename(&"a".repeat(256)).is_err());
        assert!(validate_filename(&"a".repeat(251)).is_err());
        assert_eq!(validate_filename(&"a".repeat(250)).unwrap().len(), 255);
        assert!(validate_filename(&format!("{}.yaml", "a".repeat(250))).is_ok());
        assert!(validate_filename(&format!("{}.yml", "a".repeat(252))).is_err());
    }

    #[test]
    fn test_rejects_forbidden_characters() {
        for name in ["a<b", "a>b", "a:b", "a\"b", "a|b", "a?b", "a*b", "a\tb", "a\u{0}b"] {
            let err = validate_filename(name).unwrap_err();
            assert_eq!(err.code(), "UPLOAD_ERROR", "{name}");
        }
    }

    #[test]
    fn test_rejects_reserved_names() {
        assert!(validate_filename("CON").is_err());
        assert!(validate_filename("con.yaml").is_err());
        assert!(validate_filename("Lpt9.yml").is_err());
        assert!(validate_filename("console").is_ok());
        assert!(validate_filename("com10").is_ok());
    }

    #[tokio::test]
    async fn test_simulated_upload_reports_progress() {
        let uploader = SimulatedUploader::new("etl-workflows")
            .with_prefix("team/")
            .with_steps(4, Duration::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = move |p: u8| sink.lock().unwrap().push(p);

        let receipt = uploader
            .upload(UploadRequest::new("daily", "actions: []\n"), Some(&progress as &ProgressFn))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.key, "team/daily.yaml");
        assert_eq!(receipt.bucket, "etl-workflows");
        assert_eq!(receipt.size, 12);
        assert!(receipt.location.ends_with("/team/daily.yaml"));
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);

        let json = serde_json::to_value(&receipt).unwrap();
        assert!(json.get("eTag").is_some());
        assert!(json.get("uploadedAt").is_some());
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let uploader = SimulatedUploader::new("b")
            .with_steps(4, Duration::ZERO)
            .failing("connection reset");
        let err = uploader
            .upload(UploadRequest::new("daily", "x"), None)
            .await
            .unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_invalid_filename_fails_before_upload() {
        let uploader = SimulatedUploader::new("b").with_steps(1, Duration::ZERO);
        let err = uploader
            .upload(UploadRequest::new("NUL", "x"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UPLOAD_ERROR");
    }
}

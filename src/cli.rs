// src/cli.rs

use crate::error::ConfigError;
use crate::hosting::{DEFAULT_API_URL, RetryPolicy};
use crate::storage::UploadTarget;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Action configuration: a JSON object, or just the repository name
    #[arg(short, long, default_value = "")]
    pub config: String,

    /// Token for the hosting API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Print the record to stdout instead of uploading it
    #[arg(long)]
    pub dry_run: bool,
}

/// Settings carried by the `--config` blob
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    pub repo: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub sbom_file: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Longest single wait on a rate-limited API
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_prefix() -> String {
    "tech-radar".to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_max_wait_secs() -> u64 {
    3600
}

impl ActionConfig {
    /// Parses a JSON object, or takes a bare string as the repository name
    pub fn from_blob(blob: &str) -> Result<Self, ConfigError> {
        let blob = blob.trim();
        if blob.starts_with('{') {
            let config: Self = serde_json::from_str(blob)?;
            if config.repo.is_empty() {
                return Err(ConfigError::Missing("repo"));
            }
            return Ok(config);
        }
        if blob.is_empty() {
            return Err(ConfigError::Missing("repo"));
        }
        Ok(serde_json::from_value(serde_json::json!({ "repo": blob }))?)
    }

    /// `owner/name` repos carry their owner; otherwise `owner` must be set
    pub fn owner_and_name(&self) -> Result<(&str, &str), ConfigError> {
        match (self.repo.split_once('/'), &self.owner) {
            (Some((owner, name)), _) => Ok((owner, name)),
            (None, Some(owner)) => Ok((owner, &self.repo)),
            (None, None) => Err(ConfigError::Missing("owner")),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let initial_backoff = Duration::from_millis(self.backoff_ms);
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff,
            max_backoff: initial_backoff.saturating_mul(32),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }

    /// Upload destination, if a bucket is configured
    pub fn upload_target(&self) -> Option<UploadTarget> {
        let bucket = self.bucket.clone()?;
        Some(UploadTarget {
            bucket,
            role_arn: self.role_arn.clone().unwrap_or_default(),
            external_id: self.external_id.clone().unwrap_or_default(),
            prefix: self.prefix.clone(),
        })
    }
}

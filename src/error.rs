// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// An SDK error kept as the source of a storage failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures building the hosting API client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("token is not a valid header value")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    #[error("could not build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Failures talking to the hosting API
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("hosting API returned {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
        rate_limited: bool,
        /// Wait the API asked for, from `Retry-After` or the rate-limit reset time
        retry_after: Option<Duration>,
    },

    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {path}: {message}")]
    Payload { path: String, message: String },
}

impl HostingError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            HostingError::Status { status, rate_limited, .. } => *status >= 500 || *status == 429 || *rate_limited,
            HostingError::Transport { .. } => true,
            HostingError::Payload { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HostingError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Failures assuming the upload identity or writing the record
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Parameter validation failed: {0}")]
    ParameterValidation(String),

    #[error("NoSuchBucket: the bucket `{bucket}` does not exist")]
    NoSuchBucket { bucket: String },

    #[error("could not assume role {role_arn}")]
    AssumeRole {
        role_arn: String,
        #[source]
        source: BoxError,
    },

    #[error("upload of {key} to {bucket} failed")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("could not serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not start storage runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Failures reading an SBOM document
#[derive(Debug, Error)]
pub enum SbomError {
    #[error("could not read SBOM {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse SBOM {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("SBOM {path} has neither `components` nor `artifacts`")]
    UnknownFormat { path: String },

    #[error("invalid SBOM file pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Failures interpreting the `--config` blob
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration is missing `{0}`")]
    Missing(&'static str),
}

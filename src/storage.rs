// src/storage.rs

use crate::error::{BoxError, StorageError};
use crate::model::CanonicalRecord;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::runtime::Runtime;
use tracing::info;

const SESSION_NAME: &str = "repo-radar";
const MIN_ROLE_ARN_LEN: usize = 20;
const MAX_ROLE_ARN_LEN: usize = 2048;
const MIN_EXTERNAL_ID_LEN: usize = 2;
const MAX_EXTERNAL_ID_LEN: usize = 1224;

static EXTERNAL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w+=,.@:/-]*$").expect("invalid regex"));

/// Serialization of the uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    #[default]
    Json,
}

impl RecordFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RecordFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RecordFormat::Json => "application/json",
        }
    }

    pub fn encode(self, record: &CanonicalRecord) -> Result<Vec<u8>, StorageError> {
        match self {
            RecordFormat::Json => Ok(serde_json::to_vec(record)?),
        }
    }
}

/// Where, and as whom, the record is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket: String,
    pub role_arn: String,
    pub external_id: String,
    pub prefix: String,
}

/// Writes objects with an already assumed identity
pub trait ObjectWriter {
    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;
}

/// Exchanges a role and external id for an object writer
pub trait IdentityBroker {
    type Writer: ObjectWriter;

    fn assume_role(&self, role_arn: &str, external_id: &str) -> Result<Self::Writer, StorageError>;
}

/// `<prefix>/<YYYY-MM-DD>-<repo>-<unix millis>.<ext>`
pub fn object_key(prefix: &str, repo: &str, now: DateTime<Utc>, format: RecordFormat) -> String {
    let name = format!("{}-{repo}-{}.{}", now.format("%Y-%m-%d"), now.timestamp_millis(), format.extension());
    match prefix.trim_matches('/') {
        "" => name,
        prefix => format!("{prefix}/{name}"),
    }
}

/// Rejects parameters the identity service would refuse, before any call is made
pub fn validate(target: &UploadTarget) -> Result<(), StorageError> {
    let invalid = |message: String| Err(StorageError::ParameterValidation(message));

    if target.bucket.is_empty() {
        return invalid("bucket name must not be empty".into());
    }
    let arn_len = target.role_arn.len();
    if !target.role_arn.starts_with("arn:") || !(MIN_ROLE_ARN_LEN..=MAX_ROLE_ARN_LEN).contains(&arn_len) {
        return invalid(format!(
            "role ARN {:?} must start with `arn:` and be {MIN_ROLE_ARN_LEN}..={MAX_ROLE_ARN_LEN} characters",
            target.role_arn
        ));
    }
    let id_len = target.external_id.len();
    if !(MIN_EXTERNAL_ID_LEN..=MAX_EXTERNAL_ID_LEN).contains(&id_len) || !EXTERNAL_ID.is_match(&target.external_id) {
        return invalid(format!(
            "external id must be {MIN_EXTERNAL_ID_LEN}..={MAX_EXTERNAL_ID_LEN} characters of [\\w+=,.@:/-]"
        ));
    }
    Ok(())
}

/// Assumes the target role and writes `record` under a dated key, returning the key.
/// Errors from either step are returned unchanged and nothing is retried.
pub fn load_to_s3<B: IdentityBroker>(
    broker: &B,
    repo: &str,
    record: &CanonicalRecord,
    target: &UploadTarget,
    format: RecordFormat,
    now: DateTime<Utc>,
) -> Result<String, StorageError> {
    validate(target)?;
    let body = format.encode(record)?;
    let key = object_key(&target.prefix, repo, now, format);

    let writer = broker.assume_role(&target.role_arn, &target.external_id)?;
    writer.put_object(&target.bucket, &key, body, format.content_type())?;

    info!(bucket = %target.bucket, %key, "uploaded record");
    Ok(key)
}

/// STS-backed broker handing out S3 clients for the assumed role
#[derive(Debug)]
pub struct S3Broker {
    runtime: Arc<Runtime>,
    config: SdkConfig,
    force_path_style: bool,
}

impl S3Broker {
    pub fn new(region: Option<&str>, endpoint: Option<&str>) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        // Custom endpoints (LocalStack, MinIO) need path-style bucket addressing
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = runtime.block_on(loader.load());

        Ok(Self { runtime: Arc::new(runtime), config, force_path_style: endpoint.is_some() })
    }
}

impl IdentityBroker for S3Broker {
    type Writer = S3Writer;

    fn assume_role(&self, role_arn: &str, external_id: &str) -> Result<S3Writer, StorageError> {
        let sts = aws_sdk_sts::Client::new(&self.config);
        let assume_error = |source: BoxError| StorageError::AssumeRole { role_arn: role_arn.to_string(), source };

        let output = self
            .runtime
            .block_on(sts.assume_role().role_arn(role_arn).external_id(external_id).role_session_name(SESSION_NAME).send())
            .map_err(|e| assume_error(e.into()))?;
        let assumed = output.credentials().ok_or_else(|| assume_error("response carried no credentials".into()))?;

        let credentials = aws_sdk_s3::config::Credentials::new(
            assumed.access_key_id(),
            assumed.secret_access_key(),
            Some(assumed.session_token().to_string()),
            None,
            "repo-radar-assume-role",
        );
        let s3_config = aws_sdk_s3::config::Builder::from(&self.config)
            .credentials_provider(credentials)
            .force_path_style(self.force_path_style)
            .build();

        info!(role_arn, "assumed upload role");
        Ok(S3Writer { runtime: Arc::clone(&self.runtime), client: aws_sdk_s3::Client::from_conf(s3_config) })
    }
}

#[derive(Debug)]
pub struct S3Writer {
    runtime: Arc<Runtime>,
    client: aws_sdk_s3::Client,
}

impl ObjectWriter for S3Writer {
    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send();

        match self.runtime.block_on(request) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("NoSuchBucket") => Err(StorageError::NoSuchBucket { bucket: bucket.to_string() }),
            Err(e) => Err(StorageError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.into(),
            }),
        }
    }
}

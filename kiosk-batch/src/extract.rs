//! Pulls the historical kiosk export out of object storage.
//!
//! Exports are split across several CSV objects sharing a key prefix. They are fetched in
//! key order and stitched back into one CSV document.
use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as AwsS3SdkClient;
use thiserror::Error;
use tracing::{debug, info};

use crate::csv_source::combine_csv_parts;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("failed to list objects in {bucket}: {reason}")]
    ListFailed { bucket: String, reason: String },
    #[error("failed to download {key}: {reason}")]
    GetFailed { key: String, reason: String },
    #[error("object {0} is not valid UTF-8")]
    NotUtf8(String),
    #[error("no objects in {bucket} match {prefix}*{suffix}")]
    NoObjects {
        bucket: String,
        prefix: String,
        suffix: String,
    },
}

/// The object storage operations extraction needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key in `bucket` starting with `prefix`, in no particular order.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ExtractError>;

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ExtractError>;
}

pub struct S3ObjectStore {
    client: AwsS3SdkClient,
}

impl S3ObjectStore {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain. A custom endpoint switches to
    /// path-style addressing, which local S3-compatible stores expect.
    pub async fn connect(region: &str, endpoint: Option<&str>) -> Self {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_owned()));

        if let Some(endpoint) = endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if endpoint.is_some() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::new(AwsS3SdkClient::from_conf(s3_config_builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ExtractError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut cmd = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation_token {
                cmd = cmd.continuation_token(token);
            }
            let output = cmd.send().await.map_err(|e| ExtractError::ListFailed {
                bucket: bucket.to_owned(),
                reason: e.into_service_error().to_string(),
            })?;

            if let Some(contents) = output.contents {
                keys.extend(contents.iter().filter_map(|o| o.key.clone()));
            }
            match output.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        debug!(bucket, prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ExtractError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ExtractError::GetFailed {
                key: key.to_owned(),
                reason: e.into_service_error().to_string(),
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ExtractError::GetFailed {
                key: key.to_owned(),
                reason: format!("failed to read object body: {e}"),
            })?;

        Ok(body.to_vec())
    }
}

/// In-memory object store for tests and local runs.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: BTreeMap<(String, String), Vec<u8>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) -> Self {
        self.objects
            .insert((bucket.to_owned(), key.to_owned()), body.into());
        self
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ExtractError> {
        // Reverse order, so callers cannot rely on listing order.
        Ok(self
            .objects
            .keys()
            .rev()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ExtractError> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| ExtractError::GetFailed {
                key: key.to_owned(),
                reason: "no such key".to_owned(),
            })
    }
}

/// Download every `prefix*suffix` object in `bucket`, in key order, as one CSV document
/// with a single header row.
pub async fn fetch_kiosk_csv(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    suffix: &str,
) -> Result<String, ExtractError> {
    let mut keys: Vec<String> = store
        .list_keys(bucket, prefix)
        .await?
        .into_iter()
        .filter(|key| key.ends_with(suffix))
        .collect();
    keys.sort();

    if keys.is_empty() {
        return Err(ExtractError::NoObjects {
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
            suffix: suffix.to_owned(),
        });
    }

    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        info!(bucket, key, "Downloading kiosk export");
        let bytes = store.get_bytes(bucket, &key).await?;
        let part = String::from_utf8(bytes).map_err(|_| ExtractError::NotUtf8(key))?;
        parts.push(part);
    }

    Ok(combine_csv_parts(&parts))
}

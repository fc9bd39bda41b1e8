//! Object store access for clip backups.
//!
//! [`ObjectStore`] is the seam the upload executor retries against; [`S3Store`]
//! is the production implementation on top of the AWS SDK.

use crate::config::S3Config;
use crate::key::content_type_for;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors returned by object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Bucket '{0}' does not exist")]
    NoSuchBucket(String),

    #[error("Access to bucket '{bucket}' denied: {message}")]
    AccessDenied { bucket: String, message: String },

    #[error("Local file {0} no longer exists")]
    LocalFileMissing(String),

    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("{0}")]
    Transient(String),
}

impl StoreError {
    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StoreError::NoSuchBucket(_)
                | StoreError::AccessDenied { .. }
                | StoreError::LocalFileMissing(_)
        )
    }
}

/// Multipart transfer tuning, passed through to the store unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub multipart_threshold_bytes: usize,
    pub part_size_bytes: usize,
    pub max_concurrency: usize,
}

impl From<&S3Config> for TransferConfig {
    fn from(config: &S3Config) -> Self {
        Self {
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
            max_concurrency: config.max_concurrency,
        }
    }
}

/// Remote store operations used by the uploader.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Confirm the bucket exists and is reachable.
    async fn head_bucket(&self) -> Result<(), StoreError>;

    /// Transfer a local file to `key`, overwriting any existing object.
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
        transfer: &TransferConfig,
    ) -> Result<(), StoreError>;
}

/// S3-backed object store
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Create a new S3 store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Classify an SDK failure by its S3 error code.
    fn classify<E>(&self, err: aws_sdk_s3::error::SdkError<E>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match err.code() {
            Some("NoSuchBucket") => StoreError::NoSuchBucket(self.bucket.clone()),
            Some("AccessDenied") | Some("AllAccessDisabled") => StoreError::AccessDenied {
                bucket: self.bucket.clone(),
                message: err.message().unwrap_or("access denied").to_string(),
            },
            _ => StoreError::Transient(aws_sdk_s3::error::DisplayErrorContext(&err).to_string()),
        }
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| io_error(local_path, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(local_path))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        Ok(())
    }

    /// Multipart upload for large files, reading parts straight from disk
    async fn multipart_upload(
        &self,
        local_path: &Path,
        key: &str,
        file_size: u64,
        transfer: &TransferConfig,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(local_path))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::Transient("No upload ID in response".to_string()))?
            .to_string();

        let result = self
            .upload_parts(local_path, key, &upload_id, file_size, transfer)
            .await;

        let completed_parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(key, &upload_id).await;
                return Err(e);
            }
        };

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await;

        if let Err(e) = completed {
            self.abort_multipart(key, &upload_id).await;
            return Err(self.classify(e));
        }

        Ok(())
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        file_size: u64,
        transfer: &TransferConfig,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let ranges = part_ranges(file_size, transfer.part_size_bytes as u64);

        let mut parts: Vec<CompletedPart> = stream::iter(ranges)
            .map(|(part_number, offset, length)| async move {
                let body = ByteStream::read_from()
                    .path(local_path)
                    .offset(offset)
                    .length(Length::Exact(length))
                    .build()
                    .await
                    .map_err(|e| io_error(local_path, e))?;

                let response = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;

                debug!(key = %key, part_number, length, "Uploaded part");

                Ok::<_, StoreError>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(response.e_tag().unwrap_or_default())
                        .build(),
                )
            })
            .buffer_unordered(transfer.max_concurrency.max(1))
            .try_collect()
            .await?;

        parts.sort_by_key(|part| part.part_number());
        Ok(parts)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key = %key, error = %e, "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_bucket(&self) -> Result<(), StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Err(StoreError::NoSuchBucket(self.bucket.clone()))
                } else {
                    Err(self.classify(e))
                }
            }
        }
    }

    #[instrument(skip(self, transfer), fields(bucket = %self.bucket))]
    async fn upload_file(
        &self,
        local_path: &Path,
        key: &str,
        transfer: &TransferConfig,
    ) -> Result<(), StoreError> {
        let file_size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| local_file_error(local_path, e))?
            .len();

        if file_size > transfer.multipart_threshold_bytes as u64 {
            self.multipart_upload(local_path, key, file_size, transfer)
                .await
        } else {
            self.simple_upload(local_path, key).await
        }
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn local_file_error(path: &Path, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::LocalFileMissing(path.display().to_string())
    } else {
        io_error(path, err)
    }
}

/// Split a file into `(part_number, offset, length)` ranges.
fn part_ranges(file_size: u64, part_size: u64) -> Vec<(i32, u64, u64)> {
    let part_size = part_size.max(1);
    let mut ranges = Vec::new();
    let mut offset = 0;
    let mut part_number = 1;

    while offset < file_size {
        let length = part_size.min(file_size - offset);
        ranges.push((part_number, offset, length));
        offset += length;
        part_number += 1;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_ranges_cover_file() {
        let ranges = part_ranges(26, 10);
        assert_eq!(ranges, vec![(1, 0, 10), (2, 10, 10), (3, 20, 6)]);
    }

    #[test]
    fn test_part_ranges_exact_multiple() {
        let ranges = part_ranges(20, 10);
        assert_eq!(ranges, vec![(1, 0, 10), (2, 10, 10)]);
    }

    #[test]
    fn test_part_ranges_empty_file() {
        assert!(part_ranges(0, 10).is_empty());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!StoreError::NoSuchBucket("b".to_string()).is_retryable());
        assert!(!StoreError::AccessDenied {
            bucket: "b".to_string(),
            message: "denied".to_string(),
        }
        .is_retryable());
        assert!(!StoreError::LocalFileMissing("/cams/a.mp4".to_string()).is_retryable());
        assert!(StoreError::Transient("connection reset".to_string()).is_retryable());
        assert!(StoreError::Io {
            path: "/cams/a.mp4".to_string(),
            message: "interrupted".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_transfer_config_from_s3_config() {
        let config = crate::config::test_config("/srv/cams/new");
        let transfer = TransferConfig::from(&config.s3);
        assert_eq!(transfer.multipart_threshold_bytes, 25 * 1024 * 1024);
        assert_eq!(transfer.part_size_bytes, 25 * 1024 * 1024);
        assert_eq!(transfer.max_concurrency, 10);
    }

    #[tokio::test]
    async fn test_deleted_local_file_is_reported_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::test_config(dir.path());
        config.s3.endpoint_url = Some("http://127.0.0.1:9".to_string());
        config.s3.force_path_style = true;
        let store = S3Store::new(&config.s3).await;

        let err = store
            .upload_file(
                &dir.path().join("gone.mp4"),
                "camera/gone.mp4",
                &TransferConfig::from(&config.s3),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::LocalFileMissing(_)));
        assert!(!err.is_retryable());
    }
}

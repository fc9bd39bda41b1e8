//! Per-file detect-then-upload pipeline.
//!
//! ```text
//! Admitted -> Stabilizing -> StableReady -> Uploading -> Uploaded
//!                  |                            |  ^
//!                  |                            v  |
//!                  |                         Retrying
//!                  v                            v
//!      Vanished / StabilizationTimeout   NonRetryableFailure / ExhaustedRetries
//! ```

use crate::executor::{UploadError, UploadExecutor, UploadReport};
use crate::key::{derive_key, KeyError};
use crate::stability::{FileProbe, FsProbe, StabilityDetector, StabilityError};
use crate::store::StoreError;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Terminal state of one candidate file.
#[derive(Debug)]
pub enum PipelineOutcome {
    Uploaded(UploadReport),
    Vanished,
    StabilizationTimeout,
    NonRetryableFailure(UploadError),
    ExhaustedRetries(UploadError),
    /// Shutdown interrupted stabilization or a retry backoff
    Abandoned,
    /// The path cannot be mapped to an object key
    InvalidPath(KeyError),
}

impl PipelineOutcome {
    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Uploaded(_) => "uploaded",
            PipelineOutcome::Vanished => "vanished",
            PipelineOutcome::StabilizationTimeout => "stabilization_timeout",
            PipelineOutcome::NonRetryableFailure(_) => "non_retryable",
            PipelineOutcome::ExhaustedRetries(_) => "exhausted_retries",
            PipelineOutcome::Abandoned => "abandoned",
            PipelineOutcome::InvalidPath(_) => "invalid_path",
        }
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, PipelineOutcome::Uploaded(_))
    }
}

/// Stabilizes a file, derives its key and uploads it.
pub struct FilePipeline<P = FsProbe> {
    detector: StabilityDetector<P>,
    executor: UploadExecutor,
    watch_root: PathBuf,
    prefix: String,
}

impl<P: FileProbe> FilePipeline<P> {
    pub fn new(
        detector: StabilityDetector<P>,
        executor: UploadExecutor,
        watch_root: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            executor,
            watch_root: watch_root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    /// Drive `path` to a terminal state. Never panics on per-file errors.
    #[instrument(skip(self, shutdown), fields(path = %path.display()))]
    pub async fn process(&self, path: &Path, shutdown: &CancellationToken) -> PipelineOutcome {
        let key = match derive_key(path, &self.watch_root, &self.prefix) {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "Cannot derive object key");
                return PipelineOutcome::InvalidPath(e);
            }
        };

        let size = match self.detector.wait_until_stable(path, shutdown).await {
            Ok(size) => size,
            Err(StabilityError::Vanished(_)) => {
                info!("File disappeared");
                return PipelineOutcome::Vanished;
            }
            Err(e @ StabilityError::Timeout { .. }) => {
                warn!(error = %e, "Giving up on file");
                return PipelineOutcome::StabilizationTimeout;
            }
            Err(StabilityError::Cancelled(_)) => {
                info!("Shutdown before file settled");
                return PipelineOutcome::Abandoned;
            }
        };

        info!(
            size_mb = format!("{:.1}", size as f64 / (1024.0 * 1024.0)),
            key = %key,
            "File stable, starting upload"
        );

        match self.executor.upload(path, &key, size, shutdown).await {
            Ok(report) => PipelineOutcome::Uploaded(report),
            Err(UploadError::NonRetryable {
                source: StoreError::LocalFileMissing(_),
                ..
            }) => {
                info!("File disappeared before upload");
                PipelineOutcome::Vanished
            }
            Err(e @ UploadError::NonRetryable { .. }) => PipelineOutcome::NonRetryableFailure(e),
            Err(e @ UploadError::ExhaustedRetries { .. }) => PipelineOutcome::ExhaustedRetries(e),
            Err(UploadError::Cancelled { .. }) => PipelineOutcome::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StabilizationConfig;
    use crate::store::{MockObjectStore, TransferConfig};
    use std::sync::Arc;

    fn fast_stabilization() -> StabilizationConfig {
        StabilizationConfig {
            stable_checks: 3,
            poll_interval_ms: 10,
            lock_backoff_ms: 20,
            timeout_secs: 2,
        }
    }

    fn pipeline(root: &Path, store: MockObjectStore) -> FilePipeline {
        let executor = UploadExecutor::new(
            Arc::new(store),
            "security-cam-backups",
            TransferConfig {
                multipart_threshold_bytes: 25 * 1024 * 1024,
                part_size_bytes: 25 * 1024 * 1024,
                max_concurrency: 10,
            },
            3,
        );
        FilePipeline::new(
            StabilityDetector::new(&fast_stabilization()),
            executor,
            root,
            "camera/",
        )
    }

    #[tokio::test]
    async fn test_stable_file_is_uploaded_under_derived_key() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("driveway");
        std::fs::create_dir_all(&nested).unwrap();
        let path = nested.join("clip001.mp4");
        std::fs::write(&path, vec![3u8; 1024]).unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_upload_file()
            .withf(|_, key, _| key.to_string() == "camera/driveway/clip001.mp4")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = pipeline(dir.path(), store)
            .process(&path, &CancellationToken::new())
            .await;

        match outcome {
            PipelineOutcome::Uploaded(report) => assert_eq!(report.attempts, 1),
            other => panic!("Expected Uploaded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_vanished_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();

        let outcome = pipeline(dir.path(), store)
            .process(&dir.path().join("gone.mp4"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::Vanished));
    }

    #[tokio::test]
    async fn test_empty_file_times_out_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholder.mp4");
        std::fs::write(&path, b"").unwrap();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();

        let outcome = pipeline(dir.path(), store)
            .process(&path, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::StabilizationTimeout));
        assert_eq!(outcome.label(), "stabilization_timeout");
    }

    #[tokio::test]
    async fn test_missing_bucket_is_non_retryable_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip001.mp4");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_upload_file()
            .times(1)
            .returning(|_, _, _| Err(StoreError::NoSuchBucket("security-cam-backups".to_string())));

        let outcome = pipeline(dir.path(), store)
            .process(&path, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::NonRetryableFailure(_)));
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_upload_file().never();

        let outcome = pipeline(dir.path(), store)
            .process(Path::new("/somewhere/else/clip.mp4"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_file_deleted_before_upload_is_vanished_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip005.mp4");
        std::fs::write(&path, vec![9u8; 256]).unwrap();

        let mut store = MockObjectStore::new();
        store.expect_upload_file().times(1).returning(|path, _, _| {
            Err(StoreError::LocalFileMissing(path.display().to_string()))
        });

        let start = std::time::Instant::now();
        let outcome = pipeline(dir.path(), store)
            .process(&path, &CancellationToken::new())
            .await;

        assert!(matches!(outcome, PipelineOutcome::Vanished));
        // no 2s backoff before giving up
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }
}

//! Upload execution with bounded exponential-backoff retry.

use crate::store::{ObjectStore, StoreError, TransferConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Terminal upload failures for one file.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload of {key} failed permanently on attempt {attempt}: {source}")]
    NonRetryable {
        key: String,
        attempt: u32,
        #[source]
        source: StoreError,
    },

    #[error("Upload of {key} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        key: String,
        attempts: u32,
        #[source]
        last_error: StoreError,
    },

    #[error("Upload of {key} abandoned by shutdown after {attempts} attempts")]
    Cancelled { key: String, attempts: u32 },
}

/// Successful transfer of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub key: String,
    /// Attempt number that succeeded (1-based)
    pub attempts: u32,
    /// Wall-clock time of the successful transfer
    pub elapsed: Duration,
}

/// Delay slept after failed attempt `attempt` (1-based): `2^attempt` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Transfers stabilized files, retrying transient store failures.
pub struct UploadExecutor {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    transfer: TransferConfig,
    max_attempts: u32,
}

impl UploadExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        transfer: TransferConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            transfer,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload `local_path` (of `size_bytes`, as stabilized) to `key`.
    ///
    /// A non-retryable store error ends the loop on first occurrence. Shutdown
    /// is honoured between attempts: a pending backoff is never started or
    /// finished once `shutdown` has fired.
    pub async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        size_bytes: u64,
        shutdown: &CancellationToken,
    ) -> Result<UploadReport, UploadError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let size_mb = format!("{:.1}", size_bytes as f64 / (1024.0 * 1024.0));

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(
                file = %file_name,
                size_mb = %size_mb,
                destination = %format!("s3://{}/{}", self.bucket, key),
                attempt,
                max_attempts = self.max_attempts,
                "Uploading"
            );

            let start = Instant::now();
            let err = match self.store.upload_file(local_path, key, &self.transfer).await {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    info!(
                        file = %file_name,
                        attempt,
                        elapsed_secs = format!("{:.1}", elapsed.as_secs_f64()),
                        "Successfully uploaded"
                    );
                    metrics::histogram!("uploader.upload.duration_seconds")
                        .record(elapsed.as_secs_f64());
                    return Ok(UploadReport {
                        key: key.to_string(),
                        attempts: attempt,
                        elapsed,
                    });
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                error!(file = %file_name, error = %err, "Upload failed, not retrying");
                return Err(UploadError::NonRetryable {
                    key: key.to_string(),
                    attempt,
                    source: err,
                });
            }

            warn!(file = %file_name, attempt, error = %err, "Upload attempt failed");

            if attempt >= self.max_attempts {
                error!(
                    path = %local_path.display(),
                    attempts = attempt,
                    "Failed to upload after all attempts"
                );
                return Err(UploadError::ExhaustedRetries {
                    key: key.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }

            let wait = backoff_delay(attempt);
            if shutdown.is_cancelled() {
                return Err(UploadError::Cancelled {
                    key: key.to_string(),
                    attempts: attempt,
                });
            }

            info!(wait_secs = wait.as_secs(), "Retrying");
            metrics::counter!("uploader.upload.retries").increment(1);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(UploadError::Cancelled {
                        key: key.to_string(),
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

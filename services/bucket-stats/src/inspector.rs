//! Read-only bucket queries.

use crate::config::S3Config;
use crate::lifecycle::LifecycleReport;
use crate::stats::ObjectSummary;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::Object;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Bucket '{0}' does not exist")]
    NoSuchBucket(String),

    #[error("Access to bucket '{bucket}' denied: {message}")]
    AccessDenied { bucket: String, message: String },

    #[error("Failed to list objects: {0}")]
    Listing(String),
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketInspector: Send + Sync {
    /// List one page of objects under the configured prefix.
    async fn list_page(&self, continuation_token: Option<String>) -> Result<ObjectPage, ReportError>;

    /// Fetch the bucket's lifecycle configuration.
    async fn lifecycle(&self) -> LifecycleReport;
}

pub struct S3Inspector {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3Inspector {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        debug!(bucket = %config.bucket, region = %config.region, "S3 client initialized");

        Self {
            client: S3Client::from_conf(s3_config_builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    fn classify<E>(&self, err: SdkError<E>) -> ReportError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match err.code() {
            Some("NoSuchBucket") => ReportError::NoSuchBucket(self.bucket.clone()),
            Some("AccessDenied") | Some("AllAccessDisabled") => ReportError::AccessDenied {
                bucket: self.bucket.clone(),
                message: err.message().unwrap_or("access denied").to_string(),
            },
            _ => ReportError::Listing(DisplayErrorContext(&err).to_string()),
        }
    }
}

#[async_trait]
impl BucketInspector for S3Inspector {
    async fn list_page(&self, continuation_token: Option<String>) -> Result<ObjectPage, ReportError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let objects = response.contents().iter().filter_map(to_summary).collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    async fn lifecycle(&self) -> LifecycleReport {
        match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(output) => LifecycleReport::from(&output),
            Err(e) => match e.code() {
                Some("NoSuchLifecycleConfiguration") => LifecycleReport::NotConfigured,
                Some("AccessDenied") => {
                    warn!(bucket = %self.bucket, "Permission denied reading lifecycle configuration");
                    LifecycleReport::Unavailable(
                        "permission denied (requires s3:GetLifecycleConfiguration)".to_string(),
                    )
                }
                _ => LifecycleReport::Unavailable(DisplayErrorContext(&e).to_string()),
            },
        }
    }
}

fn to_summary(object: &Object) -> Option<ObjectSummary> {
    let key = object.key()?;
    let last_modified = object.last_modified()?;
    let last_modified = DateTime::<Utc>::from_timestamp(last_modified.secs(), last_modified.subsec_nanos())?;

    Some(ObjectSummary {
        key: key.to_string(),
        size: object.size().unwrap_or(0).max(0) as u64,
        last_modified,
    })
}

/// Walk every page of the listing, handing each object to `visit`.
pub async fn for_each_object<F>(inspector: &dyn BucketInspector, mut visit: F) -> Result<u64, ReportError>
where
    F: FnMut(&ObjectSummary),
{
    let mut token = None;
    let mut pages = 0;

    loop {
        let page = inspector.list_page(token).await?;
        pages += 1;
        debug!(page = pages, objects = page.objects.len(), "Listed page");

        for object in &page.objects {
            visit(object);
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    info!(pages, "Listing complete");
    Ok(pages)
}

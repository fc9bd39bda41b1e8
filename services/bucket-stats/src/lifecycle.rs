//! Bucket lifecycle rules as reported by S3.

use aws_sdk_s3::operation::get_bucket_lifecycle_configuration::GetBucketLifecycleConfigurationOutput;
use aws_sdk_s3::primitives::{DateTime, DateTimeFormat};
use aws_sdk_s3::types::LifecycleRule;

/// Outcome of a lifecycle lookup. Never fails the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleReport {
    Configured(Vec<RuleSummary>),
    NotConfigured,
    /// Access denied or any other error, with the reason
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSummary {
    pub id: Option<String>,
    pub status: String,
    pub filter_prefix: Option<String>,
    pub expiration_days: Option<i32>,
    pub expiration_date: Option<String>,
    pub transitions: Vec<TransitionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionSummary {
    pub storage_class: Option<String>,
    pub days: Option<i32>,
}

impl From<&GetBucketLifecycleConfigurationOutput> for LifecycleReport {
    fn from(output: &GetBucketLifecycleConfigurationOutput) -> Self {
        let rules: Vec<RuleSummary> = output.rules().iter().map(RuleSummary::from).collect();
        if rules.is_empty() {
            LifecycleReport::NotConfigured
        } else {
            LifecycleReport::Configured(rules)
        }
    }
}

impl From<&LifecycleRule> for RuleSummary {
    fn from(rule: &LifecycleRule) -> Self {
        let expiration = rule.expiration();

        Self {
            id: rule.id().map(str::to_string),
            status: rule.status().as_str().to_string(),
            filter_prefix: rule
                .filter()
                .and_then(|filter| filter.prefix())
                .map(str::to_string),
            expiration_days: expiration.and_then(|e| e.days()),
            expiration_date: expiration.and_then(|e| e.date()).map(format_date),
            transitions: rule
                .transitions()
                .iter()
                .map(|t| TransitionSummary {
                    storage_class: t.storage_class().map(|c| c.as_str().to_string()),
                    days: t.days(),
                })
                .collect(),
        }
    }
}

fn format_date(date: &DateTime) -> String {
    date.fmt(DateTimeFormat::DateTime)
        .unwrap_or_else(|_| date.secs().to_string())
}

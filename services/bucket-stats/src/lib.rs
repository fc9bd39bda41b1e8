//! Cambackup Bucket Stats
//!
//! Read-only report over the clip backup bucket: object totals, date range,
//! per-extension breakdown, storage growth and the lifecycle rules S3 reports.
//!
//! ```text
//! ListObjectsV2 pages ──▶ StatsAccumulator ──▶ BucketStats ─┐
//!                                                            ├──▶ BucketReport ──▶ text
//! GetBucketLifecycleConfiguration ──▶ LifecycleReport ──────┘
//! ```

pub mod config;
pub mod inspector;
pub mod lifecycle;
pub mod report;
pub mod stats;

pub use config::Config;
pub use inspector::{for_each_object, BucketInspector, ObjectPage, ReportError, S3Inspector};
pub use lifecycle::{LifecycleReport, RuleSummary, TransitionSummary};
pub use report::{gather, render, BucketReport};
pub use stats::{extension_of, format_size, BucketStats, ObjectSummary, StatsAccumulator};

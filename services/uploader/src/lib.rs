//! Cambackup Uploader
//!
//! Watches a camera recording directory and backs up every new clip to S3.
//! Each created file is held until its size stops changing and it can be
//! opened for reading, then uploaded with bounded exponential-backoff retry.
//!
//! ## Features
//!
//! - **Stabilization**: a file is uploaded only after several consecutive
//!   identical, non-zero size readings with no sharing lock held
//! - **Exclusion rules**: case-sensitive base-name prefixes and a
//!   case-insensitive extension allow-list
//! - **Deduplication**: at most one pipeline per path at any instant
//! - **Bounded retry**: transient failures back off `2^n` seconds, missing
//!   bucket or denied access fail on the spot
//! - **Multipart uploads** above a configurable threshold
//!
//! ## Architecture
//!
//! ```text
//!  Watch root                                          S3 Bucket
//! ┌──────────────┐                                   ┌──────────────┐
//! │ camera       │                                   │ {prefix}/    │
//! │ recordings   │                                   │   {rel/path} │
//! └──────────────┘                                   └──────────────┘
//!        │ notify                                           ▲
//!        ▼                                                  │
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐│
//! │ Watcher      │────▶│ Event        │────▶│ File         ││
//! │ (listener)   │     │ Router       │     │ Pipeline     ││
//! └──────────────┘     └──────────────┘     └──────────────┘│
//!                             │              │          │   │
//!                             ▼              ▼          ▼   │
//!                      ┌──────────────┐ ┌──────────┐ ┌──────────────┐
//!                      │ In-flight    │ │ Stability│ │ Upload       │
//!                      │ Tracker      │ │ Detector │ │ Executor     │
//!                      └──────────────┘ └──────────┘ └──────────────┘
//! ```

pub mod config;
pub mod executor;
pub mod in_flight;
pub mod key;
pub mod pipeline;
pub mod router;
pub mod stability;
pub mod store;
pub mod watcher;

pub use config::{Config, ConfigValidationError};
pub use executor::{backoff_delay, UploadError, UploadExecutor, UploadReport};
pub use in_flight::{InFlightGuard, InFlightTracker};
pub use key::{content_type_for, derive_key, KeyError};
pub use pipeline::{FilePipeline, PipelineOutcome};
pub use router::{Admission, EventRouter, FileFilter, RawEvent};
pub use stability::{FileProbe, FsProbe, Probe, StabilityDetector, StabilityError};
pub use store::{ObjectStore, S3Store, StoreError, TransferConfig};
pub use watcher::{convert_notify_event, run_listener, watch, WatchError};

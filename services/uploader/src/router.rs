//! Admission of filesystem creation events into the upload pipeline.

use crate::config::WatchConfig;
use crate::in_flight::{InFlightGuard, InFlightTracker};
use crate::pipeline::{FilePipeline, PipelineOutcome};
use crate::stability::{FileProbe, FsProbe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, Instrument};

/// A "created" notification from the directory watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl RawEvent {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
        }
    }
}

/// Routing decision for one event.
#[derive(Debug)]
pub enum Admission {
    Admitted(InFlightGuard),
    Directory,
    Excluded,
    UnsupportedExtension,
    Duplicate,
}

impl Admission {
    fn reason(&self) -> &'static str {
        match self {
            Admission::Admitted(_) => "admitted",
            Admission::Directory => "directory",
            Admission::Excluded => "excluded_prefix",
            Admission::UnsupportedExtension => "extension",
            Admission::Duplicate => "duplicate",
        }
    }
}

/// File name and extension rules.
#[derive(Debug, Clone)]
pub struct FileFilter {
    excluded_prefixes: Vec<String>,
    allowed_extensions: Vec<String>,
}

impl FileFilter {
    pub fn new(excluded_prefixes: Vec<String>, allowed_extensions: Vec<String>) -> Self {
        Self {
            excluded_prefixes,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            config.excluded_prefixes.clone(),
            config.allowed_extensions.clone(),
        )
    }

    /// Base name starts with one of the excluded prefixes (case-sensitive).
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        self.excluded_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// File name ends in `.{ext}` for an allowed extension (case-insensitive).
    /// A bare dotfile such as `.mp4` matches too.
    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_ascii_lowercase();
        self.allowed_extensions.iter().any(|allowed| {
            name.len() > allowed.len()
                && name.ends_with(allowed.as_str())
                && name[..name.len() - allowed.len()].ends_with('.')
        })
    }
}

/// Filters events, suppresses duplicates and spawns one pipeline per file.
///
/// Owns the process-wide state: the in-flight set, the pipeline (and through
/// it the store client), the task tracker and the shutdown token.
pub struct EventRouter<P = FsProbe> {
    filter: FileFilter,
    in_flight: InFlightTracker,
    pipeline: Arc<FilePipeline<P>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl<P: FileProbe + 'static> EventRouter<P> {
    pub fn new(filter: FileFilter, pipeline: FilePipeline<P>, shutdown: CancellationToken) -> Self {
        Self {
            filter,
            in_flight: InFlightTracker::new(),
            pipeline: Arc::new(pipeline),
            tasks: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    /// Decide whether `event` enters the pipeline, claiming its path if so.
    pub fn admit(&self, event: &RawEvent) -> Admission {
        if event.is_dir {
            return Admission::Directory;
        }

        if self.filter.is_excluded(&event.path) {
            return Admission::Excluded;
        }

        if !self.filter.has_allowed_extension(&event.path) {
            return Admission::UnsupportedExtension;
        }

        match self.in_flight.try_admit(&event.path) {
            Some(guard) => Admission::Admitted(guard),
            None => Admission::Duplicate,
        }
    }

    /// Admit `event` and, if admitted, run its pipeline on a new task.
    pub fn route(&self, event: RawEvent) -> Option<JoinHandle<PipelineOutcome>> {
        let guard = match self.admit(&event) {
            Admission::Admitted(guard) => guard,
            rejected => {
                self.log_rejection(&event.path, &rejected);
                metrics::counter!("uploader.events.rejected", "reason" => rejected.reason())
                    .increment(1);
                return None;
            }
        };

        info!(path = %event.path.display(), "Admitted new file");
        metrics::counter!("uploader.events.admitted").increment(1);

        let pipeline = self.pipeline.clone();
        let shutdown = self.shutdown.clone();
        let span = tracing::info_span!("file", path = %event.path.display());

        Some(self.tasks.spawn(
            async move {
                // held for the whole pipeline; dropping it releases the path
                let guard = guard;
                let outcome = pipeline.process(guard.path(), &shutdown).await;
                match &outcome {
                    PipelineOutcome::Uploaded(_) => {
                        metrics::counter!("uploader.files.uploaded").increment(1);
                    }
                    other => {
                        metrics::counter!("uploader.files.failed", "outcome" => other.label())
                            .increment(1);
                    }
                }
                debug!(outcome = outcome.label(), "Pipeline finished");
                outcome
            }
            .instrument(span),
        ))
    }

    fn log_rejection(&self, path: &Path, admission: &Admission) {
        match admission {
            Admission::Excluded => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(file = %name, "Skipping excluded file");
            }
            Admission::Duplicate => {
                debug!(path = %path.display(), "Already processing, ignoring duplicate event");
            }
            Admission::Directory | Admission::UnsupportedExtension => {
                trace!(path = %path.display(), reason = admission.reason(), "Ignoring event");
            }
            Admission::Admitted(_) => {}
        }
    }

    /// Stop accepting pipelines and wait for the outstanding ones.
    pub async fn drain(&self) {
        self.tasks.close();
        info!(outstanding = self.tasks.len(), "Waiting for in-flight files");
        self.tasks.wait().await;
    }
}

//! Tracking of paths currently inside the stabilize-then-upload pipeline.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Set of paths being processed, shared between the router and pipelines.
///
/// Admission hands back an [`InFlightGuard`]; the path leaves the set when the
/// guard is dropped, which covers success, failure, cancellation and panics.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `path` unless it is already in flight.
    pub fn try_admit(&self, path: &Path) -> Option<InFlightGuard> {
        let inserted = self.paths.lock().insert(path.to_path_buf());
        inserted.then(|| InFlightGuard {
            paths: self.paths.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }
}

/// Membership token for one in-flight path.
#[derive(Debug)]
pub struct InFlightGuard {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.paths.lock().remove(&self.path);
    }
}

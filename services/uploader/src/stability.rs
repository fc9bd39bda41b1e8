//! File stabilization detection.
//!
//! Recorders create clip files up front and keep appending while they record,
//! so a creation event is not a signal that the file can be uploaded. The
//! detector samples the file until its size has been unchanged (and non-zero)
//! across a configured number of consecutive reads and the file can be opened
//! for reading.

use crate::config::StabilizationConfig;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Terminal stabilization failures.
#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("File no longer exists: {0}")]
    Vanished(PathBuf),

    #[error("File {path} did not stabilize within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("Stabilization of {0} cancelled by shutdown")]
    Cancelled(PathBuf),
}

/// Outcome of a single sample of a candidate file.
#[derive(Debug)]
pub enum Probe {
    /// The path does not exist
    Missing,
    /// The file opened and yielded a read; `size` was taken just before opening
    Readable { size: u64 },
    /// Another process holds the file (permission denied / sharing violation)
    Locked,
    /// Any other OS-level error
    Failed(io::Error),
}

/// Source of file samples.
#[async_trait]
pub trait FileProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Probe;
}

/// Probe backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

#[async_trait]
impl FileProbe for FsProbe {
    async fn probe(&self, path: &Path) -> Probe {
        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => return classify_io_error(e),
        };

        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => return classify_io_error(e),
        };

        let mut first_byte = [0u8; 1];
        match file.read(&mut first_byte).await {
            Ok(_) => Probe::Readable { size },
            Err(e) => classify_io_error(e),
        }
    }
}

fn classify_io_error(err: io::Error) -> Probe {
    match err.kind() {
        io::ErrorKind::NotFound => Probe::Missing,
        io::ErrorKind::PermissionDenied => Probe::Locked,
        _ if is_sharing_violation(&err) => Probe::Locked,
        _ => Probe::Failed(err),
    }
}

#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_err: &io::Error) -> bool {
    false
}

/// Per-wait sampling state.
#[derive(Debug)]
struct StabilityRecord {
    last_size: Option<u64>,
    stable_count: u32,
    started: Instant,
}

impl StabilityRecord {
    fn new() -> Self {
        Self {
            last_size: None,
            stable_count: 0,
            started: Instant::now(),
        }
    }

    /// Record a readable sample and return the consecutive stable count.
    fn observe(&mut self, size: u64) -> u32 {
        if self.last_size == Some(size) && size > 0 {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
        self.last_size = Some(size);
        self.stable_count
    }

    fn reset(&mut self) {
        self.last_size = None;
        self.stable_count = 0;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Waits for candidate files to stop growing.
pub struct StabilityDetector<P = FsProbe> {
    probe: P,
    stable_checks: u32,
    poll_interval: Duration,
    lock_backoff: Duration,
    timeout: Duration,
}

impl StabilityDetector<FsProbe> {
    pub fn new(config: &StabilizationConfig) -> Self {
        Self::with_probe(FsProbe, config)
    }
}

impl<P: FileProbe> StabilityDetector<P> {
    pub fn with_probe(probe: P, config: &StabilizationConfig) -> Self {
        Self {
            probe,
            stable_checks: config.stable_checks,
            poll_interval: config.poll_interval(),
            lock_backoff: config.lock_backoff(),
            timeout: config.timeout(),
        }
    }

    /// Sample `path` until it is stable and return its settled size.
    pub async fn wait_until_stable(
        &self,
        path: &Path,
        shutdown: &CancellationToken,
    ) -> Result<u64, StabilityError> {
        info!(path = %path.display(), "Waiting for file to stabilize");

        let mut record = StabilityRecord::new();

        loop {
            if record.elapsed() > self.timeout {
                return Err(StabilityError::Timeout {
                    path: path.to_path_buf(),
                    timeout: self.timeout,
                });
            }

            let pause = match self.probe.probe(path).await {
                Probe::Missing => return Err(StabilityError::Vanished(path.to_path_buf())),
                Probe::Readable { size } => {
                    let stable_count = record.observe(size);
                    debug!(
                        path = %path.display(),
                        size_bytes = size,
                        stable_count,
                        "Sampled file size"
                    );

                    if stable_count >= self.stable_checks {
                        info!(path = %path.display(), size_bytes = size, "File ready");
                        return Ok(size);
                    }
                    self.poll_interval
                }
                Probe::Locked => {
                    debug!(path = %path.display(), "File locked, resetting stability count");
                    record.reset();
                    self.lock_backoff
                }
                Probe::Failed(e) => {
                    warn!(path = %path.display(), error = %e, "OS error while checking file");
                    record.reset();
                    self.lock_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Err(StabilityError::Cancelled(path.to_path_buf()));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Size(u64),
        Locked,
        Error,
        Missing,
    }

    /// Replays a fixed list of samples; the last one repeats forever.
    #[derive(Clone)]
    struct ScriptedProbe {
        steps: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new(steps: &[Step]) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.iter().copied().collect())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileProbe for ScriptedProbe {
        async fn probe(&self, _path: &Path) -> Probe {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock();
                if steps.len() > 1 {
                    steps.pop_front().unwrap()
                } else {
                    *steps.front().unwrap()
                }
            };
            match step {
                Step::Size(size) => Probe::Readable { size },
                Step::Locked => Probe::Locked,
                Step::Error => Probe::Failed(io::Error::new(io::ErrorKind::Other, "io glitch")),
                Step::Missing => Probe::Missing,
            }
        }
    }

    fn detector(probe: ScriptedProbe) -> StabilityDetector<ScriptedProbe> {
        StabilityDetector::with_probe(probe, &StabilizationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_on_nth_consecutive_equal_sample() {
        let probe = ScriptedProbe::new(&[
            Step::Size(10),
            Step::Size(20),
            Step::Size(30),
            Step::Size(30),
            Step::Size(30),
            Step::Size(30),
        ]);
        let detector = detector(probe.clone());
        let start = Instant::now();

        let size = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 30);
        // The first 30 starts the run; three more equal reads complete it.
        assert_eq!(probe.calls(), 6);
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_change_resets_count() {
        let probe = ScriptedProbe::new(&[
            Step::Size(5),
            Step::Size(5),
            Step::Size(5),
            Step::Size(8),
            Step::Size(8),
            Step::Size(8),
            Step::Size(8),
        ]);
        let detector = detector(probe.clone());

        let size = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 8);
        assert_eq!(probe.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_after_consistent_reads() {
        let probe = ScriptedProbe::new(&[
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
            Step::Missing,
        ]);
        let detector = detector(probe);

        let err = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Vanished(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_growing_file_times_out() {
        let sizes: Vec<Step> = (1..=500).map(|n| Step::Size(n * 1024)).collect();
        let probe = ScriptedProbe::new(&sizes);
        let detector = detector(probe);
        let start = Instant::now();

        let err = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Timeout { .. }));
        assert!(start.elapsed() > Duration::from_secs(60));
        assert!(start.elapsed() <= Duration::from_millis(60_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_byte_file_never_stabilizes() {
        let probe = ScriptedProbe::new(&[Step::Size(0)]);
        let detector = detector(probe.clone());

        let err = detector
            .wait_until_stable(Path::new("/cams/placeholder.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Timeout { .. }));
        assert!(probe.calls() > 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_resets_count_and_backs_off() {
        let probe = ScriptedProbe::new(&[
            Step::Size(10),
            Step::Size(10),
            Step::Locked,
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
        ]);
        let detector = detector(probe.clone());
        let start = Instant::now();

        let size = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 10);
        assert_eq!(probe.calls(), 7);
        // 2 polls, 1s lock backoff, 3 polls
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_os_error_resets_count() {
        let probe = ScriptedProbe::new(&[
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
            Step::Error,
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
            Step::Size(10),
        ]);
        let detector = detector(probe.clone());

        let size = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 10);
        assert_eq!(probe.calls(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_lock_becomes_timeout() {
        let probe = ScriptedProbe::new(&[Step::Locked]);
        let detector = detector(probe);

        let err = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let probe = ScriptedProbe::new(&[Step::Size(1), Step::Size(2), Step::Size(3)]);
        let detector = detector(probe);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = detector
            .wait_until_stable(Path::new("/cams/clip.mp4"), &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, StabilityError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_fs_probe_reads_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();

        assert!(matches!(FsProbe.probe(&path).await, Probe::Readable { size: 2048 }));
        assert!(matches!(
            FsProbe.probe(&dir.path().join("missing.mp4")).await,
            Probe::Missing
        ));
    }

    #[tokio::test]
    async fn test_real_file_stabilizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let config = StabilizationConfig {
            stable_checks: 3,
            poll_interval_ms: 10,
            lock_backoff_ms: 20,
            timeout_secs: 5,
        };
        let detector = StabilityDetector::new(&config);

        let size = detector
            .wait_until_stable(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 4096);
    }
}

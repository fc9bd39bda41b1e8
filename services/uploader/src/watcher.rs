//! Recursive directory watching via `notify`.

use crate::router::{EventRouter, RawEvent};
use crate::stability::FileProbe;
use notify::event::CreateKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Start watching `root` recursively.
///
/// The returned watcher must be kept alive; dropping it stops event delivery
/// and closes the receiver.
pub fn watch(
    root: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<RawEvent>), WatchError> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for raw in convert_notify_event(event) {
                    debug!(path = %raw.path.display(), is_dir = raw.is_dir, "Created");
                    if tx.send(raw).is_err() {
                        // listener gone, shutting down
                        return;
                    }
                }
            }
            Err(e) => error!(error = %e, "Watch error"),
        },
        NotifyConfig::default(),
    )
    .map_err(WatchError::Create)?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|source| WatchError::Watch {
            path: root.to_path_buf(),
            source,
        })?;

    info!(path = %root.display(), "Watching path");
    Ok((watcher, rx))
}

/// Map a notify event to the creation events it carries.
pub fn convert_notify_event(event: Event) -> Vec<RawEvent> {
    let kind = match event.kind {
        EventKind::Create(kind) => kind,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| {
            let is_dir = match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                _ => path.is_dir(),
            };
            RawEvent { path, is_dir }
        })
        .collect()
}

/// Feed watcher events to the router until shutdown or the channel closes.
pub async fn run_listener<P: FileProbe + 'static>(
    mut events: mpsc::UnboundedReceiver<RawEvent>,
    router: Arc<EventRouter<P>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Listener stopping");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    router.route(event);
                }
                None => {
                    debug!("Watcher channel closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{ModifyKind, RemoveKind};

    #[test]
    fn test_create_file_event_is_converted() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/cams/clip001.mp4"));

        assert_eq!(
            convert_notify_event(event),
            vec![RawEvent::file("/cams/clip001.mp4")]
        );
    }

    #[test]
    fn test_create_folder_event_is_directory() {
        let event = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/cams/driveway"));

        let raw = convert_notify_event(event);
        assert_eq!(raw.len(), 1);
        assert!(raw[0].is_dir);
    }

    #[test]
    fn test_ambiguous_create_kind_checks_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();

        let event = Event::new(EventKind::Create(CreateKind::Any))
            .add_path(sub.clone())
            .add_path(file.clone());

        let raw = convert_notify_event(event);
        assert_eq!(
            raw,
            vec![
                RawEvent {
                    path: sub,
                    is_dir: true
                },
                RawEvent::file(file),
            ]
        );
    }

    #[test]
    fn test_non_create_events_are_ignored() {
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/cams/clip001.mp4"));
        let remove = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/cams/clip001.mp4"));

        assert!(convert_notify_event(modify).is_empty());
        assert!(convert_notify_event(remove).is_empty());
    }

    #[test]
    fn test_watch_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = watch(&dir.path().join("does-not-exist"));
        assert!(matches!(result, Err(WatchError::Watch { .. })));
    }
}

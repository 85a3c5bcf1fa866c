//! Directory watching
//!
//! `notify` delivers events on its own thread; they are filtered there and
//! forwarded over a bounded channel to the async processing loop.

use anpr2mqtt_core::config::FilenamePattern;
use anyhow::Context;
use notify::event::{AccessKind, AccessMode, CreateKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    /// File closed after writing
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Index of the watch that produced the event
    pub watch: usize,
    pub kind: FileEventKind,
    pub path: PathBuf,
}

pub struct DirectoryWatcher {
    watchers: Vec<RecommendedWatcher>,
    tx: mpsc::Sender<FileEvent>,
    rx: mpsc::Receiver<FileEvent>,
}

impl DirectoryWatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            watchers: Vec::new(),
            tx,
            rx,
        }
    }

    /// Watch a directory (not recursively) for files matching `pattern`
    ///
    /// Returns the index reported in [`FileEvent::watch`].
    pub fn watch(&mut self, dir: &Path, pattern: FilenamePattern) -> anyhow::Result<usize> {
        let index = self.watchers.len();
        let tx = self.tx.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for file_event in file_events(index, &event, &pattern) {
                    if tx.blocking_send(file_event).is_err() {
                        debug!("Event receiver closed");
                        return;
                    }
                }
            }
            Err(e) => error!("Watch error: {}", e),
        })
        .context("Failed to set up file system watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        info!("Watching {} (watch #{})", dir.display(), index);
        self.watchers.push(watcher);
        Ok(index)
    }

    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}

impl Default for DirectoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a raw notify event to the events this application handles
pub fn event_kind(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => Some(FileEventKind::Created),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FileEventKind::Closed),
        _ => None,
    }
}

fn file_events(watch: usize, event: &Event, pattern: &FilenamePattern) -> Vec<FileEvent> {
    let Some(kind) = event_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| pattern.is_match(&name.to_string_lossy()))
                .unwrap_or(false)
        })
        .map(|path| FileEvent {
            watch,
            kind,
            path: path.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, ModifyKind};

    const NAME: &str = "20250602103045407_B4DM3N_VEHICLE_DETECTION.jpg";

    #[test]
    fn test_event_kind() {
        assert_eq!(
            event_kind(&EventKind::Create(CreateKind::File)),
            Some(FileEventKind::Created)
        );
        assert_eq!(
            event_kind(&EventKind::Access(AccessKind::Close(AccessMode::Write))),
            Some(FileEventKind::Closed)
        );
        assert_eq!(event_kind(&EventKind::Create(CreateKind::Folder)), None);
        assert_eq!(
            event_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            None
        );
        assert_eq!(
            event_kind(&EventKind::Access(AccessKind::Close(AccessMode::Read))),
            None
        );
    }

    #[test]
    fn test_file_events_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join(NAME);
        let other = dir.path().join("notes.txt");
        std::fs::write(&image, b"jpeg").unwrap();
        std::fs::write(&other, b"text").unwrap();

        let event = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
            .add_path(image.clone())
            .add_path(other)
            .add_path(dir.path().to_path_buf());
        let events = file_events(3, &event, &FilenamePattern::default());
        assert_eq!(
            events,
            vec![FileEvent {
                watch: 3,
                kind: FileEventKind::Closed,
                path: image,
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_reports_closed_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new();
        let index = watcher.watch(dir.path(), FilenamePattern::default()).unwrap();

        let path = dir.path().join(NAME);
        std::fs::write(&path, b"jpeg bytes").unwrap();

        let closed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(event) = watcher.recv().await {
                if event.kind == FileEventKind::Closed {
                    return Some(event);
                }
            }
            None
        })
        .await;
        // Close events are only reported by the inotify backend
        if cfg!(target_os = "linux") {
            let event = closed.unwrap().unwrap();
            assert_eq!(event.watch, index);
            assert_eq!(event.path.file_name(), path.file_name());
        }
    }

    #[test]
    fn test_watch_missing_directory() {
        let mut watcher = DirectoryWatcher::new();
        assert!(watcher
            .watch(Path::new("/nonexistent/anpr2mqtt"), FilenamePattern::default())
            .is_err());
    }
}

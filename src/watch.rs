//! Change notifications for the watched document.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::debug;

/// One batch of mutations. Either kind is reason enough to re-scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationBatch {
    /// Elements were added, removed or replaced.
    pub structure_changed: bool,
    /// Existing content changed in place.
    pub text_changed: bool,
}

impl MutationBatch {
    pub fn is_scan_worthy(&self) -> bool {
        self.structure_changed || self.text_changed
    }

    pub fn from_event_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) | EventKind::Remove(_) => Self {
                structure_changed: true,
                text_changed: false,
            },
            EventKind::Modify(ModifyKind::Name(_)) => Self {
                structure_changed: true,
                text_changed: false,
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => Self::default(),
            EventKind::Modify(_) => Self {
                structure_changed: false,
                text_changed: true,
            },
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Self::default(),
        }
    }
}

/// Watches the directory holding the document and forwards scan-worthy
/// batches that touch the document itself. The parent directory is watched so
/// that editors replacing the file through a rename are still seen.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl DocumentWatcher {
    pub fn spawn(document: &Path) -> Result<(Self, Receiver<MutationBatch>)> {
        let (tx, rx) = mpsc::channel();
        let path = document.to_path_buf();
        let file_name = path.file_name().map(|name| name.to_os_string());
        let watch_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                forward_event(result, file_name.as_deref(), &tx);
            },
            Config::default(),
        )
        .context("failed to create document watcher")?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_dir.display()))?;

        Ok((
            Self {
                _watcher: watcher,
                path,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn forward_event(
    result: notify::Result<Event>,
    file_name: Option<&std::ffi::OsStr>,
    tx: &Sender<MutationBatch>,
) {
    let event = match result {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "watch error");
            return;
        }
    };
    let touches_document = event
        .paths
        .iter()
        .any(|path| path.file_name() == file_name);
    if !touches_document {
        return;
    }
    let batch = MutationBatch::from_event_kind(&event.kind);
    if batch.is_scan_worthy() {
        let _ = tx.send(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

    #[test]
    fn event_kinds_map_to_mutation_classes() {
        let created = MutationBatch::from_event_kind(&EventKind::Create(CreateKind::File));
        assert!(created.structure_changed && !created.text_changed);

        let removed = MutationBatch::from_event_kind(&EventKind::Remove(RemoveKind::File));
        assert!(removed.is_scan_worthy());

        let renamed = MutationBatch::from_event_kind(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To,
        )));
        assert!(renamed.structure_changed);

        let written = MutationBatch::from_event_kind(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content,
        )));
        assert!(written.text_changed && !written.structure_changed);
    }

    #[test]
    fn metadata_and_access_are_ignored() {
        let touched = MutationBatch::from_event_kind(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime,
        )));
        assert!(!touched.is_scan_worthy());
        assert!(!MutationBatch::from_event_kind(&EventKind::Any).is_scan_worthy());
    }

    #[test]
    fn only_events_for_the_document_are_forwarded() {
        let (tx, rx) = mpsc::channel();
        let name = std::ffi::OsString::from("page.json");

        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/x/other.json"));
        forward_event(Ok(other), Some(name.as_os_str()), &tx);
        assert!(rx.try_recv().is_err());

        let mine = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/tmp/x/page.json"));
        forward_event(Ok(mine), Some(name.as_os_str()), &tx);
        assert_eq!(
            rx.try_recv().expect("forwarded"),
            MutationBatch {
                structure_changed: false,
                text_changed: true,
            }
        );
    }
}

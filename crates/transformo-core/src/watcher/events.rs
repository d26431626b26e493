use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use serde::Serialize;

use crate::convert::ConversionReport;

/// A filesystem change the dispatcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Removed(path) => path,
        }
    }

    /// Map an OS notification to watch events.
    ///
    /// A rename into the watched tree counts as a creation. Directory events
    /// and metadata-only changes are dropped.
    pub fn from_notify(event: &notify::Event) -> Vec<Self> {
        let each = |f: fn(PathBuf) -> Self| -> Vec<Self> {
            event.paths.iter().cloned().map(f).collect()
        };

        match event.kind {
            EventKind::Create(CreateKind::Folder) => Vec::new(),
            EventKind::Create(_) => each(Self::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(Self::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(Self::Removed),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
                [from, to] => vec![Self::Removed(from.clone()), Self::Created(to.clone())],
                _ => Vec::new(),
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) => each(Self::Modified),
            EventKind::Remove(RemoveKind::Folder) => Vec::new(),
            EventKind::Remove(_) => each(Self::Removed),
            // A writer closing the file is the strongest hint it is complete
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => each(Self::Modified),
            _ => Vec::new(),
        }
    }
}

/// What happened to a file the watcher picked up.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    /// Passed the filters; stability check started
    Accepted { path: PathBuf },
    /// Size kept changing or the file disappeared; it will be retried on
    /// the next event
    Unstable { path: PathBuf },
    /// Already has a text layer
    AlreadyReadable { path: PathBuf },
    Converted { report: ConversionReport },
    Failed { path: PathBuf, error: String },
}

impl IngestEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Accepted { path }
            | Self::Unstable { path }
            | Self::AlreadyReadable { path }
            | Self::Failed { path, .. } => path,
            Self::Converted { report } => &report.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, MetadataKind};

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, path| event.add_path(PathBuf::from(*path)))
    }

    #[test]
    fn test_create_and_rename_into_tree() {
        assert_eq!(
            WatchEvent::from_notify(&event(EventKind::Create(CreateKind::File), &["/in/a.pdf"])),
            vec![WatchEvent::Created("/in/a.pdf".into())]
        );
        assert_eq!(
            WatchEvent::from_notify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/in/b.pdf"]
            )),
            vec![WatchEvent::Created("/in/b.pdf".into())]
        );
        assert_eq!(
            WatchEvent::from_notify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/in/.b.pdf.part", "/in/b.pdf"]
            )),
            vec![
                WatchEvent::Removed("/in/.b.pdf.part".into()),
                WatchEvent::Created("/in/b.pdf".into())
            ]
        );
    }

    #[test]
    fn test_modify_and_remove() {
        assert_eq!(
            WatchEvent::from_notify(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/in/a.pdf"]
            )),
            vec![WatchEvent::Modified("/in/a.pdf".into())]
        );
        assert_eq!(
            WatchEvent::from_notify(&event(EventKind::Remove(RemoveKind::File), &["/in/a.pdf"])),
            vec![WatchEvent::Removed("/in/a.pdf".into())]
        );
        assert_eq!(
            WatchEvent::from_notify(&event(
                EventKind::Access(AccessKind::Close(AccessMode::Write)),
                &["/in/a.pdf"]
            )),
            vec![WatchEvent::Modified("/in/a.pdf".into())]
        );
    }

    #[test]
    fn test_ignored_kinds() {
        for kind in [
            EventKind::Create(CreateKind::Folder),
            EventKind::Remove(RemoveKind::Folder),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Access(AccessKind::Any),
        ] {
            assert!(WatchEvent::from_notify(&event(kind, &["/in/x"])).is_empty());
        }
    }
}

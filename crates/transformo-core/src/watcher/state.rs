use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::fsutil::FileSignature;

/// Files the watcher already knows about in its root.
///
/// Owned by the dispatcher loop; created on start and dropped on stop.
#[derive(Debug, Default)]
pub struct WatchState {
    /// Known files and their signature when last handled
    known: HashMap<PathBuf, Option<FileSignature>>,
    /// Files with a job running
    in_flight: HashSet<PathBuf>,
}

impl WatchState {
    /// Start with every listed file already known.
    pub fn seeded(known: HashMap<PathBuf, Option<FileSignature>>) -> Self {
        Self {
            known,
            in_flight: HashSet::new(),
        }
    }

    pub fn is_known(&self, path: &Path) -> bool {
        self.known.contains_key(path)
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.contains(path)
    }

    /// True if `path` is known and its signature differs from `current`.
    pub fn has_changed(&self, path: &Path, current: Option<FileSignature>) -> bool {
        self.known
            .get(path)
            .is_some_and(|previous| *previous != current)
    }

    /// Mark a job as started. Returns false if one is already running.
    pub fn begin(&mut self, path: &Path) -> bool {
        self.in_flight.insert(path.to_path_buf())
    }

    /// Record a handled file so later events for it are ignored.
    pub fn complete(&mut self, path: &Path, signature: Option<FileSignature>) {
        self.in_flight.remove(path);
        self.known.insert(path.to_path_buf(), signature);
    }

    /// Forget a file so the next event for it is treated as new.
    pub fn forget(&mut self, path: &Path) {
        self.in_flight.remove(path);
        self.known.remove(path);
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

//! Filesystem helpers shared by the writers, the watcher and the text cache.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::format::DocumentFormat;

/// Write `bytes` to `path` so readers never observe a partial file.
///
/// The data goes to a temp file in the destination directory, is synced, and
/// is then renamed over `path`. On any error the temp file is removed and
/// `path` is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".transformo-")
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Cheap identity of a file's current contents: size and modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileSignature {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Size of a file in bytes
pub fn file_len(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// `.pdf` / `.docx` files under `root`, optionally descending into
/// subdirectories. Unreadable entries are skipped.
pub fn list_documents(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walk = WalkDir::new(root).follow_links(false);
    if !recursive {
        walk = walk.max_depth(1);
    }

    walk.into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| DocumentFormat::from_path(path).is_some())
        .collect()
}

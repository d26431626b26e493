//! Extracted-text cache keyed by absolute path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::classify::{Fallback, SEARCH_POLICY};
use crate::docx;
use crate::format::DocumentFormat;
use crate::fsutil::FileSignature;
use crate::pdf;

use super::normalize_text;

/// Cached text of one document.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub raw: String,
    /// Whitespace runs collapsed to single spaces, case preserved
    pub normalized: String,
    /// Lowercased `normalized`, used for matching
    pub folded: String,
    /// File size and mtime at extraction time
    pub signature: Option<FileSignature>,
}

impl CacheEntry {
    fn new(path: PathBuf, raw: String, signature: Option<FileSignature>) -> Self {
        let normalized = normalize_text(&raw);
        let folded = normalized.to_lowercase();
        Self {
            path,
            raw,
            normalized,
            folded,
            signature,
        }
    }
}

/// Extract the text of a PDF or Word document.
pub fn extract_document_text(path: &Path) -> anyhow::Result<String> {
    match DocumentFormat::from_path(path) {
        Some(DocumentFormat::Pdf) => Ok(pdf::extract_text(path)?.text),
        Some(DocumentFormat::Docx) => {
            let bytes = docx::read_file(path)?;
            let paragraphs = docx::read_paragraphs(&bytes)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(paragraphs.join("\n"))
        }
        None => anyhow::bail!("Unsupported document type: {}", path.display()),
    }
}

type Extractor = Arc<dyn Fn(&Path) -> anyhow::Result<String> + Send + Sync>;

#[derive(Debug, Clone)]
enum Extracted {
    Text(Arc<CacheEntry>),
    /// Extraction failed for the file as it was at `signature`
    Failed,
    /// A refresh is running; older extractions must not land
    Pending,
}

#[derive(Debug, Clone)]
struct Slot {
    /// Flight that produced this slot; a slot is only replaced by a newer one
    generation: u64,
    extracted: Extracted,
    signature: Option<FileSignature>,
}

/// One extraction that concurrent lookups of the same path share.
#[derive(Clone)]
struct Flight {
    generation: u64,
    cell: Arc<OnceCell<Option<Arc<CacheEntry>>>>,
}

/// Text cache shared by searches and the ingestion watcher.
///
/// Each path is extracted at most once at a time: concurrent lookups of a
/// path that is being extracted wait for that extraction instead of starting
/// their own, while [`refresh`](Self::refresh) always starts a new one.
/// Files that fail extraction are remembered and retried only once their
/// signature changes. Entries are not invalidated implicitly unless the cache
/// was built with `revalidate`, in which case an entry whose file signature
/// changed is re-extracted on lookup.
pub struct TextCache {
    slots: RwLock<HashMap<PathBuf, Slot>>,
    in_flight: Mutex<HashMap<PathBuf, Flight>>,
    generations: AtomicU64,
    extractions: AtomicUsize,
    revalidate: bool,
    extractor: Extractor,
}

impl Default for TextCache {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TextCache {
    pub fn new(revalidate: bool) -> Self {
        Self::with_extractor(revalidate, Arc::new(extract_document_text))
    }

    fn with_extractor(revalidate: bool, extractor: Extractor) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            extractions: AtomicUsize::new(0),
            revalidate,
            extractor,
        }
    }

    /// Number of extractions performed so far.
    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    /// Number of documents with cached text.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot.extracted, Extracted::Text(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached entry, extracting the file if needed.
    ///
    /// Returns `None` if the file cannot be extracted. The failure is
    /// remembered until the file changes.
    pub async fn get_or_extract(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        let key = cache_key(path);

        if let Some(hit) = self.lookup(&key).await {
            return hit;
        }

        let flight = {
            let mut in_flight = self.in_flight.lock().await;
            // A flight may have finished since the first check
            if let Some(hit) = self.lookup(&key).await {
                return hit;
            }
            match in_flight.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.new_flight();
                    in_flight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        self.fly(key, flight).await
    }

    /// Re-extract `path` now, replacing any cached entry.
    ///
    /// Never joins an extraction that was already running, since it may have
    /// read the file before the change that prompted the refresh.
    pub async fn refresh(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        let key = cache_key(path);

        let flight = {
            let mut in_flight = self.in_flight.lock().await;
            let flight = self.new_flight();
            in_flight.insert(key.clone(), flight.clone());
            self.slots.write().await.insert(
                key.clone(),
                Slot {
                    generation: flight.generation,
                    extracted: Extracted::Pending,
                    signature: None,
                },
            );
            flight
        };

        self.fly(key, flight).await
    }

    /// Drop the cached entry for `path`.
    pub async fn invalidate(&self, path: &Path) {
        self.slots.write().await.remove(&cache_key(path));
    }

    /// True if `path` is cached and its size or mtime changed since.
    pub async fn is_stale(&self, path: &Path) -> bool {
        let key = cache_key(path);
        match self.slots.read().await.get(&key) {
            Some(slot) => has_changed(&key, slot.signature),
            None => false,
        }
    }

    /// `Some(result)` if the cache can answer for `key` without extracting.
    async fn lookup(&self, key: &Path) -> Option<Option<Arc<CacheEntry>>> {
        let slot = self.slots.read().await.get(key).cloned()?;
        match slot.extracted {
            Extracted::Text(entry) => {
                if self.revalidate && has_changed(key, slot.signature) {
                    tracing::debug!(path = %key.display(), "Cached text is stale");
                    return None;
                }
                Some(Some(entry))
            }
            Extracted::Failed if !has_changed(key, slot.signature) => Some(None),
            Extracted::Failed | Extracted::Pending => None,
        }
    }

    fn new_flight(&self) -> Flight {
        Flight {
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
            cell: Arc::new(OnceCell::new()),
        }
    }

    async fn fly(&self, key: PathBuf, flight: Flight) -> Option<Arc<CacheEntry>> {
        let entry = flight
            .cell
            .get_or_init(|| async {
                let (slot, entry) = self.extract(key.clone(), flight.generation).await;
                if let Some(slot) = slot {
                    self.store(&key, slot).await;
                }
                entry
            })
            .await
            .clone();

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(&key)
            .is_some_and(|f| Arc::ptr_eq(&f.cell, &flight.cell))
        {
            in_flight.remove(&key);
        }

        entry
    }

    async fn store(&self, key: &Path, slot: Slot) {
        let mut slots = self.slots.write().await;
        match slots.get(key) {
            Some(current) if current.generation > slot.generation => {
                tracing::debug!(path = %key.display(), "Dropping superseded extraction");
            }
            _ => {
                slots.insert(key.to_path_buf(), slot);
            }
        }
    }

    /// Extract `key`. The slot is `None` when the result must not be cached.
    async fn extract(
        &self,
        key: PathBuf,
        generation: u64,
    ) -> (Option<Slot>, Option<Arc<CacheEntry>>) {
        self.extractions.fetch_add(1, Ordering::SeqCst);

        let path = key.clone();
        let extractor = self.extractor.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            let signature = FileSignature::of(&path).ok();
            (extractor(&path), signature)
        })
        .await;

        let (text, signature) = match extracted {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(path = %key.display(), error = %e, "Extraction task failed");
                return (None, None);
            }
        };

        let (extracted, entry) = match text {
            Ok(text) => {
                tracing::debug!(path = %key.display(), chars = text.len(), "Cached document text");
                let entry = Arc::new(CacheEntry::new(key, text, signature));
                (Extracted::Text(entry.clone()), Some(entry))
            }
            Err(e) => {
                tracing::warn!(path = %key.display(), error = %e, "Text extraction failed");
                match SEARCH_POLICY {
                    Fallback::Skip => (Extracted::Failed, None),
                    Fallback::AssumeScanned => {
                        let entry = Arc::new(CacheEntry::new(key, String::new(), signature));
                        (Extracted::Text(entry.clone()), Some(entry))
                    }
                }
            }
        };

        let slot = Slot {
            generation,
            extracted,
            signature,
        };
        (Some(slot), entry)
    }
}

fn cache_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn has_changed(path: &Path, signature: Option<FileSignature>) -> bool {
    FileSignature::of(path).ok() != signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::test_support::text_pdf;

    #[tokio::test]
    async fn test_entry_forms() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, text_pdf(&["Hello   World", "Second\tPage"])).unwrap();

        let cache = TextCache::default();
        let entry = cache.get_or_extract(&path).await.unwrap();
        assert!(entry.raw.contains("Hello"));
        assert!(!entry.normalized.contains("  "));
        assert!(entry.normalized.contains("Hello World"));
        assert_eq!(entry.folded, entry.normalized.to_lowercase());
        assert!(entry.path.is_absolute());
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, text_pdf(&["cached"])).unwrap();

        let cache = TextCache::default();
        cache.get_or_extract(&path).await.unwrap();
        cache.get_or_extract(&path).await.unwrap();
        assert_eq!(cache.extraction_count(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_extract_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, text_pdf(&["single flight"])).unwrap();

        let cache = Arc::new(TextCache::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move { cache.get_or_extract(&path).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(cache.extraction_count(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_retried_only_after_change() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();

        let cache = TextCache::default();
        assert!(cache.get_or_extract(&path).await.is_none());
        assert!(cache.get_or_extract(&path).await.is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.extraction_count(), 1);

        std::fs::write(&path, docx::write_docx(&["fixed now".to_string()]).unwrap()).unwrap();
        let entry = cache.get_or_extract(&path).await.unwrap();
        assert!(entry.folded.contains("fixed"));
        assert_eq!(cache.extraction_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_does_not_join_older_extraction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.docx");
        std::fs::write(&path, docx::write_docx(&["old words".to_string()]).unwrap()).unwrap();

        // The first extraction reads the file, then blocks until released
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let reads = Arc::new(AtomicUsize::new(0));
        let extractor: Extractor = {
            let reads = reads.clone();
            Arc::new(move |path: &Path| {
                let text = extract_document_text(path)?;
                if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = release_rx.lock().unwrap().recv();
                }
                Ok(text)
            })
        };
        let cache = Arc::new(TextCache::with_extractor(false, extractor));

        let lookup = {
            let cache = cache.clone();
            let path = path.clone();
            tokio::spawn(async move { cache.get_or_extract(&path).await })
        };
        while reads.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        std::fs::write(
            &path,
            docx::write_docx(&["new words after the write".to_string()]).unwrap(),
        )
        .unwrap();
        let refreshed = cache.refresh(&path).await.unwrap();
        assert!(refreshed.folded.contains("new words"));

        release_tx.send(()).unwrap();
        let stale = lookup.await.unwrap().unwrap();
        assert!(stale.folded.contains("old words"));

        // The older extraction finished last but does not replace the refresh
        let cached = cache.get_or_extract(&path).await.unwrap();
        assert!(cached.folded.contains("new words"));
        assert_eq!(cache.extraction_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_kept_until_refresh() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.docx");
        std::fs::write(&path, docx::write_docx(&["old words".to_string()]).unwrap()).unwrap();

        let cache = TextCache::default();
        assert!(cache.get_or_extract(&path).await.unwrap().folded.contains("old"));

        std::fs::write(
            &path,
            docx::write_docx(&["brand new replacement words".to_string()]).unwrap(),
        )
        .unwrap();
        assert!(cache.is_stale(&path).await);
        assert!(cache.get_or_extract(&path).await.unwrap().folded.contains("old"));

        let refreshed = cache.refresh(&path).await.unwrap();
        assert!(refreshed.folded.contains("replacement"));
        assert!(!cache.is_stale(&path).await);
    }

    #[tokio::test]
    async fn test_revalidate_reextracts_changed_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.docx");
        std::fs::write(&path, docx::write_docx(&["before".to_string()]).unwrap()).unwrap();

        let cache = TextCache::new(true);
        cache.get_or_extract(&path).await.unwrap();

        std::fs::write(
            &path,
            docx::write_docx(&["after the edit happened".to_string()]).unwrap(),
        )
        .unwrap();
        let entry = cache.get_or_extract(&path).await.unwrap();
        assert!(entry.folded.contains("after"));
        assert_eq!(cache.extraction_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("a.pdf");
        std::fs::write(&path, text_pdf(&["x"])).unwrap();

        let cache = TextCache::default();
        cache.get_or_extract(&path).await.unwrap();
        cache.invalidate(&path).await;
        assert!(cache.is_empty().await);

        cache.get_or_extract(&path).await.unwrap();
        assert_eq!(cache.extraction_count(), 2);
    }
}

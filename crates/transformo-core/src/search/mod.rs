//! Substring search over the text of PDF and Word documents under a root.

mod cache;

pub use cache::{extract_document_text, CacheEntry, TextCache};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::fsutil::list_documents;

/// Extractions run concurrently per search.
const EXTRACT_CONCURRENCY: usize = 8;

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Answers substring queries from the shared [`TextCache`].
#[derive(Clone)]
pub struct SearchIndex {
    cache: Arc<TextCache>,
}

impl SearchIndex {
    pub fn new(cache: Arc<TextCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<TextCache> {
        &self.cache
    }

    /// Base names of the documents under `root` whose text contains `term`,
    /// ignoring case.
    ///
    /// Document text is matched in its whitespace-collapsed form while the
    /// term is only lowercased, so a term with a run of spaces never matches.
    /// An empty term matches every readable document.
    pub async fn search(&self, term: &str, root: &Path) -> BTreeSet<String> {
        let needle = term.to_lowercase();

        let walk_root = root.to_path_buf();
        let listing = tokio::task::spawn_blocking(move || list_documents(&walk_root, true));
        let documents = match listing.await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::error!(root = %root.display(), error = %e, "Directory walk failed");
                return BTreeSet::new();
            }
        };

        let entries: Vec<_> = stream::iter(documents)
            .map(|path| {
                let cache = self.cache.clone();
                async move { cache.get_or_extract(&path).await }
            })
            .buffer_unordered(EXTRACT_CONCURRENCY)
            .collect()
            .await;

        let matches: BTreeSet<String> = entries
            .into_iter()
            .flatten()
            .filter(|entry| entry.folded.contains(&needle))
            .filter_map(|entry| {
                entry
                    .path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect();

        tracing::debug!(term, root = %root.display(), hits = matches.len(), "Search finished");
        matches
    }
}

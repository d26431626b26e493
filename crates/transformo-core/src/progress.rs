//! Per-document OCR progress.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

/// Counters for the OCR units (pages or images) of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StageProgress {
    /// Total units that entered the pool.
    pub fn total(&self) -> usize {
        self.pending + self.active + self.completed + self.failed
    }

    /// Check if any unit is still queued or running.
    pub fn is_active(&self) -> bool {
        self.pending > 0 || self.active > 0
    }
}

/// Progress for one document under conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentProgress {
    pub document: String,
    pub pages: StageProgress,
}

impl DocumentProgress {
    pub fn new(document: String) -> Self {
        Self {
            document,
            ..Default::default()
        }
    }
}

/// Progress update sent by the orchestrator and pool workers.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    Queued { document: String, count: usize },
    Started { document: String },
    Completed { document: String },
    Failed { document: String, error: String },
}

/// Tracks page progress for every document being converted.
#[derive(Clone)]
pub struct ProgressTracker {
    documents: Arc<RwLock<HashMap<String, DocumentProgress>>>,
    /// Channel to notify listeners of progress changes
    notify_tx: mpsc::Sender<DocumentProgress>,
}

impl ProgressTracker {
    pub fn new() -> (Self, mpsc::Receiver<DocumentProgress>) {
        let (notify_tx, notify_rx) = mpsc::channel(256);
        (
            Self {
                documents: Arc::new(RwLock::new(HashMap::new())),
                notify_tx,
            },
            notify_rx,
        )
    }

    /// Apply a progress update.
    pub async fn apply(&self, update: ProgressUpdate) {
        let mut documents = self.documents.write().await;

        let document = match &update {
            ProgressUpdate::Queued { document, .. }
            | ProgressUpdate::Started { document }
            | ProgressUpdate::Completed { document }
            | ProgressUpdate::Failed { document, .. } => document.clone(),
        };

        match update {
            ProgressUpdate::Queued { document, count } => {
                let progress = documents
                    .entry(document.clone())
                    .or_insert_with(|| DocumentProgress::new(document));
                progress.pages.pending += count;
            }
            ProgressUpdate::Started { document } => {
                if let Some(progress) = documents.get_mut(&document) {
                    progress.pages.pending = progress.pages.pending.saturating_sub(1);
                    progress.pages.active += 1;
                }
            }
            ProgressUpdate::Completed { document } => {
                if let Some(progress) = documents.get_mut(&document) {
                    progress.pages.active = progress.pages.active.saturating_sub(1);
                    progress.pages.completed += 1;
                }
            }
            ProgressUpdate::Failed { document, .. } => {
                if let Some(progress) = documents.get_mut(&document) {
                    progress.pages.active = progress.pages.active.saturating_sub(1);
                    progress.pages.failed += 1;
                }
            }
        }

        // Listeners that fall behind miss intermediate snapshots
        if let Some(progress) = documents.get(&document) {
            let _ = self.notify_tx.try_send(progress.clone());
        }
    }

    /// Get progress for a document.
    pub async fn get(&self, document: &str) -> Option<DocumentProgress> {
        self.documents.read().await.get(document).cloned()
    }

    /// Remove a document from tracking.
    pub async fn remove(&self, document: &str) {
        self.documents.write().await.remove(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_follow_updates() {
        let (tracker, mut rx) = ProgressTracker::new();
        let doc = "scan.pdf".to_string();

        tracker
            .apply(ProgressUpdate::Queued {
                document: doc.clone(),
                count: 3,
            })
            .await;
        for _ in 0..3 {
            tracker
                .apply(ProgressUpdate::Started {
                    document: doc.clone(),
                })
                .await;
        }
        tracker
            .apply(ProgressUpdate::Completed {
                document: doc.clone(),
            })
            .await;
        tracker
            .apply(ProgressUpdate::Failed {
                document: doc.clone(),
                error: "boom".to_string(),
            })
            .await;

        let progress = tracker.get(&doc).await.unwrap();
        assert_eq!(
            progress.pages,
            StageProgress {
                pending: 0,
                active: 1,
                completed: 1,
                failed: 1,
            }
        );
        assert_eq!(progress.pages.total(), 3);
        assert!(progress.pages.is_active());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.pages.pending, 3);

        tracker
            .apply(ProgressUpdate::Completed {
                document: doc.clone(),
            })
            .await;
        assert!(!tracker.get(&doc).await.unwrap().pages.is_active());

        tracker.remove(&doc).await;
        assert!(tracker.get(&doc).await.is_none());
    }

    #[tokio::test]
    async fn test_updates_for_unknown_document_are_ignored() {
        let (tracker, _rx) = ProgressTracker::new();
        tracker
            .apply(ProgressUpdate::Started {
                document: "ghost.pdf".to_string(),
            })
            .await;
        assert!(tracker.get("ghost.pdf").await.is_none());
    }
}

//! Global OCR worker pool shared by every conversion.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::worker::{recognize_image, render_page, OcrImageResult, OcrPageResult};
use super::{OcrEngine, OcrError, OcrOptions};
use crate::docx::MediaImage;
use crate::pdf::{Rasterizer, SourcePdf};
use crate::progress::{ProgressTracker, ProgressUpdate};

/// Shared receiver for multiple workers pulling from one unbounded channel.
struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> SharedReceiver<T> {
    fn new_unbounded(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// Recognize one page of a PDF.
pub struct PageJob {
    pub source: Arc<SourcePdf>,
    pub page_index: usize,
    pub dpi: u32,
    pub cancel: CancellationToken,
    pub reply: mpsc::UnboundedSender<OcrPageResult>,
}

/// Recognize one image embedded in a Word document.
pub struct ImageJob {
    /// Progress key of the owning document
    pub document: String,
    pub index: usize,
    pub image: Arc<MediaImage>,
    pub cancel: CancellationToken,
    pub reply: mpsc::UnboundedSender<OcrImageResult>,
}

pub enum OcrJob {
    Page(PageJob),
    Image(ImageJob),
}

/// Everything a worker needs besides the job itself.
#[derive(Clone)]
struct WorkerContext {
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
    options: OcrOptions,
    progress: ProgressTracker,
}

/// Handle to a fixed set of OCR workers.
///
/// Workers stop once every clone of the pool has been dropped and the queue
/// has drained.
#[derive(Clone)]
pub struct OcrPool {
    tx: mpsc::UnboundedSender<OcrJob>,
    workers: usize,
    progress: ProgressTracker,
}

impl OcrPool {
    /// Spawn `workers` workers on the current tokio runtime.
    pub fn spawn(
        workers: usize,
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn OcrEngine>,
        options: OcrOptions,
        progress: ProgressTracker,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = SharedReceiver::new_unbounded(rx);
        let context = WorkerContext {
            rasterizer,
            engine,
            options,
            progress: progress.clone(),
        };

        spawn_ocr_workers(workers, rx, context);
        tracing::debug!(workers, "OCR pool started");

        Self {
            tx,
            workers,
            progress,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Queue a job.
    pub fn submit(&self, job: OcrJob) -> Result<(), OcrError> {
        self.tx.send(job).map_err(|_| OcrError::PoolClosed)
    }
}

fn spawn_ocr_workers(count: usize, rx: SharedReceiver<OcrJob>, context: WorkerContext) {
    for i in 0..count {
        let rx = rx.clone();
        let context = context.clone();

        tokio::spawn(async move {
            tracing::debug!(worker = i, "OCR worker started");

            while let Some(job) = rx.recv().await {
                match job {
                    OcrJob::Page(job) => run_page_job(job, &context).await,
                    OcrJob::Image(job) => run_image_job(job, &context).await,
                }
            }

            tracing::debug!(worker = i, "OCR worker stopped");
        });
    }
}

async fn run_page_job(job: PageJob, context: &WorkerContext) {
    let document = job.source.path.display().to_string();
    let page_index = job.page_index;

    if job.cancel.is_cancelled() {
        let _ = job.reply.send(OcrPageResult::failed(page_index, OcrError::Cancelled));
        return;
    }

    context
        .progress
        .apply(ProgressUpdate::Started {
            document: document.clone(),
        })
        .await;

    let result = {
        let source = job.source.clone();
        let dpi = job.dpi;
        let rasterizer = context.rasterizer.clone();
        let engine = context.engine.clone();
        let options = context.options.clone();

        tokio::task::spawn_blocking(move || {
            render_page(
                page_index,
                &source,
                dpi,
                rasterizer.as_ref(),
                engine.as_ref(),
                &options,
            )
        })
        .await
        .unwrap_or_else(|e| OcrPageResult::failed(page_index, OcrError::Panicked(e.to_string())))
    };

    let update = match &result.outcome {
        Ok(_) => ProgressUpdate::Completed { document },
        Err(e) => ProgressUpdate::Failed {
            document,
            error: e.to_string(),
        },
    };
    context.progress.apply(update).await;

    // The orchestrator may have given up on this document
    let _ = job.reply.send(result);
}

async fn run_image_job(job: ImageJob, context: &WorkerContext) {
    let index = job.index;

    if job.cancel.is_cancelled() {
        let name = job.image.name.clone();
        let _ = job
            .reply
            .send(OcrImageResult::failed(index, name, OcrError::Cancelled));
        return;
    }

    context
        .progress
        .apply(ProgressUpdate::Started {
            document: job.document.clone(),
        })
        .await;

    let result = {
        let image = job.image.clone();
        let engine = context.engine.clone();
        let options = context.options.clone();

        let name = job.image.name.clone();
        tokio::task::spawn_blocking(move || {
            recognize_image(index, &image, engine.as_ref(), &options)
        })
        .await
        .unwrap_or_else(|e| OcrImageResult::failed(index, name, OcrError::Panicked(e.to_string())))
    };

    let update = match &result.outcome {
        Ok(_) => ProgressUpdate::Completed {
            document: job.document,
        },
        Err(e) => ProgressUpdate::Failed {
            document: job.document,
            error: e.to_string(),
        },
    };
    context.progress.apply(update).await;

    let _ = job.reply.send(result);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ocr::test_support::{FakeOcrEngine, FakeRasterizer};
    use crate::pdf::{PageImage, PageSize};

    fn source(pages: usize) -> Arc<SourcePdf> {
        Arc::new(SourcePdf {
            path: "scan.pdf".into(),
            bytes: Arc::new(Vec::new()),
            page_sizes: vec![PageSize::new(612.0, 792.0); pages],
        })
    }

    fn pool_with(engine: Arc<dyn OcrEngine>, workers: usize, pages: usize) -> OcrPool {
        let (progress, _rx) = ProgressTracker::new();
        OcrPool::spawn(
            workers,
            Arc::new(FakeRasterizer::new(vec![(612.0, 792.0); pages])),
            engine,
            OcrOptions::default(),
            progress,
        )
    }

    #[tokio::test]
    async fn test_pool_answers_every_page() {
        let pool = pool_with(Arc::new(FakeOcrEngine::with_jitter(5)), 4, 6);
        assert_eq!(pool.workers(), 4);
        let source = source(6);
        let (reply, mut results) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        pool.progress()
            .apply(ProgressUpdate::Queued {
                document: "scan.pdf".to_string(),
                count: 6,
            })
            .await;

        for page_index in 0..6 {
            pool.submit(OcrJob::Page(PageJob {
                source: source.clone(),
                page_index,
                dpi: 72,
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))
            .unwrap();
        }
        drop(reply);

        let mut seen = Vec::new();
        while let Some(result) = results.recv().await {
            assert!(result.is_ok());
            seen.push(result.page_index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);

        let progress = pool.progress().get("scan.pdf").await.unwrap();
        assert_eq!(progress.pages.completed, 6);
    }

    #[tokio::test]
    async fn test_zero_workers_still_spawns_one() {
        let pool = pool_with(Arc::new(FakeOcrEngine::default()), 0, 1);
        assert_eq!(pool.workers(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_jobs_never_reach_engine() {
        let engine = Arc::new(FakeOcrEngine::default());
        let pool = pool_with(engine.clone(), 2, 3);
        let (reply, mut results) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let source = source(3);
        for page_index in 0..3 {
            pool.submit(OcrJob::Page(PageJob {
                source: source.clone(),
                page_index,
                dpi: 72,
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))
            .unwrap();
        }
        drop(reply);

        while let Some(result) = results.recv().await {
            assert!(matches!(result.outcome, Err(OcrError::Cancelled)));
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    struct PanickingEngine {
        calls: AtomicUsize,
    }

    impl OcrEngine for PanickingEngine {
        fn recognize_page(&self, _page: &PageImage, _options: &OcrOptions) -> Result<Vec<u8>, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("engine crashed");
        }

        fn recognize_text(&self, _image: &[u8], _options: &OcrOptions) -> Result<String, OcrError> {
            panic!("engine crashed");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_page_failure() {
        let engine = Arc::new(PanickingEngine {
            calls: AtomicUsize::new(0),
        });
        let pool = pool_with(engine.clone(), 1, 2);
        let (reply, mut results) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let source = source(2);
        for page_index in 0..2 {
            pool.submit(OcrJob::Page(PageJob {
                source: source.clone(),
                page_index,
                dpi: 72,
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))
            .unwrap();
        }
        drop(reply);

        let mut failures = 0;
        while let Some(result) = results.recv().await {
            assert!(matches!(result.outcome, Err(OcrError::Panicked(_))));
            failures += 1;
        }
        // The worker survives the first panic and handles the second page
        assert_eq!(failures, 2);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_image_jobs() {
        let pool = pool_with(Arc::new(FakeOcrEngine::default()), 2, 0);
        let (reply, mut results) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        for (index, byte) in [4u8, 0xff].into_iter().enumerate() {
            pool.submit(OcrJob::Image(ImageJob {
                document: "letter.docx".to_string(),
                index,
                image: Arc::new(MediaImage {
                    name: format!("word/media/image{}.png", index + 1),
                    data: vec![byte],
                }),
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))
            .unwrap();
        }
        drop(reply);

        let mut outcomes = Vec::new();
        while let Some(result) = results.recv().await {
            outcomes.push((result.index, result.outcome.is_ok()));
        }
        outcomes.sort_unstable();
        assert_eq!(outcomes, vec![(0, true), (1, false)]);
    }
}

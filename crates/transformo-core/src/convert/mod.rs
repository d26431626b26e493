//! Document OCR orchestration.
//!
//! A conversion fans one job per page (or embedded image) out to the shared
//! [`OcrPool`], collects the results into slots indexed by page, and writes
//! the surviving pages in source order. The output is written once, atomically,
//! and only if the conversion was not cancelled and at least one page was
//! recognized.

mod report;

pub use report::{ConversionReport, ConversionState, PageFailure};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::docx::{self, DocxError};
use crate::format::{self, DocumentFormat};
use crate::fsutil;
use crate::ocr::{
    ImageJob, OcrError, OcrImageResult, OcrJob, OcrOptions, OcrPageResult, OcrPool, PageJob,
    TesseractEngine,
};
use crate::pdf::{MupdfRasterizer, PageSize, PdfAssembler, PdfError, SourcePdf};
use crate::progress::{DocumentProgress, ProgressTracker, ProgressUpdate};
use report::StateLog;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported document type: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to open source PDF: {0}")]
    Open(#[source] PdfError),

    #[error("Word document error: {0}")]
    Docx(#[from] DocxError),

    #[error("document has no pages")]
    EmptyDocument,

    #[error("none of the {pages_total} pages could be recognized")]
    NoPagesRecognized { pages_total: usize },

    #[error("conversion cancelled")]
    Cancelled,

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("failed to assemble output PDF: {0}")]
    Assemble(#[source] PdfError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("conversion task failed: {0}")]
    Task(String),
}

fn task_error(e: tokio::task::JoinError) -> ConvertError {
    ConvertError::Task(e.to_string())
}

/// Results that carry the slot they belong to.
trait Slotted {
    fn slot(&self) -> usize;
}

impl Slotted for OcrPageResult {
    fn slot(&self) -> usize {
        self.page_index
    }
}

impl Slotted for OcrImageResult {
    fn slot(&self) -> usize {
        self.index
    }
}

/// Wait until all `n` slots are filled, in whatever order results arrive.
async fn collect_slots<T: Slotted>(
    results: &mut mpsc::UnboundedReceiver<T>,
    n: usize,
) -> Result<Vec<Option<T>>, ConvertError> {
    let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
    let mut resolved = 0;

    while resolved < n {
        let Some(result) = results.recv().await else {
            return Err(OcrError::PoolClosed.into());
        };
        let index = result.slot();
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                resolved += 1;
            }
            _ => tracing::warn!(slot = index, "Ignoring unexpected OCR result"),
        }
    }

    Ok(slots)
}

/// Converts scanned documents into searchable ones.
#[derive(Clone)]
pub struct Converter {
    pool: OcrPool,
    dpi: u32,
}

impl Converter {
    pub fn new(pool: OcrPool, dpi: u32) -> Self {
        Self { pool, dpi }
    }

    /// Build a converter backed by MuPDF and the tesseract executable.
    ///
    /// Must be called inside a tokio runtime. The receiver yields page
    /// progress snapshots; dropping it is fine.
    pub fn from_config(config: &Config) -> (Self, mpsc::Receiver<DocumentProgress>) {
        let (progress, progress_rx) = ProgressTracker::new();
        let pool = OcrPool::spawn(
            config.page_worker_count(),
            Arc::new(MupdfRasterizer),
            Arc::new(TesseractEngine::new(&config.ocr.tesseract_path)),
            OcrOptions::from(&config.ocr),
            progress,
        );
        (Self::new(pool, config.dpi), progress_rx)
    }

    pub fn pool(&self) -> &OcrPool {
        &self.pool
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Convert `source` into `output_dir`, naming the output after the source.
    pub async fn convert_document(
        &self,
        source: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConvertError> {
        let unsupported = || ConvertError::UnsupportedFormat(source.to_path_buf());
        let format = DocumentFormat::from_path(source).ok_or_else(unsupported)?;
        let output = format::output_path_for(source, output_dir).ok_or_else(unsupported)?;

        match format {
            DocumentFormat::Pdf => self.convert_pdf(source, &output, self.dpi, cancel).await,
            DocumentFormat::Docx => self.convert_docx(source, &output, cancel).await,
        }
    }

    /// OCR every page of a scanned PDF and write a searchable PDF to `output`.
    ///
    /// Page N of the output is the N-th recognized source page, scaled to that
    /// source page's physical size. Pages that fail are left out and listed in
    /// the report.
    pub async fn convert_pdf(
        &self,
        source: &Path,
        output: &Path,
        dpi: u32,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConvertError> {
        let document = source.display().to_string();
        let result = self.run_pdf(source, output, dpi, cancel).await;
        self.finish(&document, source, &result).await;
        result
    }

    async fn run_pdf(
        &self,
        source: &Path,
        output: &Path,
        dpi: u32,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConvertError> {
        let path = source.to_path_buf();
        let source_pdf = tokio::task::spawn_blocking(move || SourcePdf::open(&path))
            .await
            .map_err(task_error)?
            .map_err(ConvertError::Open)?;
        let source_pdf = Arc::new(source_pdf);
        let pages_total = source_pdf.page_count();
        if pages_total == 0 {
            return Err(ConvertError::EmptyDocument);
        }
        let mut state = StateLog::opened(source);

        let document = source_pdf.path.display().to_string();
        self.pool
            .progress()
            .apply(ProgressUpdate::Queued {
                document,
                count: pages_total,
            })
            .await;

        let (reply, mut results) = mpsc::unbounded_channel();
        for page_index in 0..pages_total {
            self.pool.submit(OcrJob::Page(PageJob {
                source: source_pdf.clone(),
                page_index,
                dpi,
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))?;
        }
        drop(reply);
        state.advance();
        tracing::debug!(path = %source.display(), pages = pages_total, dpi, "Dispatched pages");

        state.advance();
        let slots = collect_slots(&mut results, pages_total).await?;
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let page_sizes = source_pdf.page_sizes.clone();
        let (assembler, failed_pages) =
            tokio::task::spawn_blocking(move || reassemble(slots, &page_sizes))
                .await
                .map_err(task_error)?;
        let pages_written = assembler.page_count();
        if pages_written == 0 {
            return Err(ConvertError::NoPagesRecognized { pages_total });
        }
        state.advance();

        let bytes = tokio::task::spawn_blocking(move || assembler.to_bytes())
            .await
            .map_err(task_error)?
            .map_err(ConvertError::Assemble)?;
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        write_output(output, bytes).await?;
        state.advance();

        let report = ConversionReport {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            pages_total,
            pages_written,
            failed_pages,
            completed_at: chrono::Utc::now(),
        };
        state.advance();

        Ok(report)
    }

    /// OCR every image embedded in a Word document and write a new document
    /// holding one paragraph of recognized text per image, in reading order.
    pub async fn convert_docx(
        &self,
        source: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConvertError> {
        let document = source.display().to_string();
        let result = self.run_docx(source, output, &document, cancel).await;
        self.finish(&document, source, &result).await;
        result
    }

    async fn run_docx(
        &self,
        source: &Path,
        output: &Path,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport, ConvertError> {
        let path = source.to_path_buf();
        let images = tokio::task::spawn_blocking(move || {
            docx::read_file(&path).and_then(|bytes| docx::media_images(&bytes))
        })
        .await
        .map_err(task_error)??;
        let pages_total = images.len();
        if pages_total == 0 {
            return Err(ConvertError::EmptyDocument);
        }
        let mut state = StateLog::opened(source);

        self.pool
            .progress()
            .apply(ProgressUpdate::Queued {
                document: document.to_string(),
                count: pages_total,
            })
            .await;

        let (reply, mut results) = mpsc::unbounded_channel();
        for (index, image) in images.into_iter().enumerate() {
            self.pool.submit(OcrJob::Image(ImageJob {
                document: document.to_string(),
                index,
                image: Arc::new(image),
                cancel: cancel.clone(),
                reply: reply.clone(),
            }))?;
        }
        drop(reply);
        state.advance();

        state.advance();
        let slots = collect_slots(&mut results, pages_total).await?;
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let mut paragraphs = Vec::new();
        let mut failed_pages = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            match slot.map(|result| result.outcome) {
                Some(Ok(text)) => paragraphs.push(text),
                Some(Err(e)) => failed_pages.push(PageFailure {
                    page_index: index,
                    reason: e.to_string(),
                }),
                None => failed_pages.push(PageFailure {
                    page_index: index,
                    reason: "no result".to_string(),
                }),
            }
        }
        let pages_written = paragraphs.len();
        if pages_written == 0 {
            return Err(ConvertError::NoPagesRecognized { pages_total });
        }
        state.advance();

        let bytes = tokio::task::spawn_blocking(move || docx::write_docx(&paragraphs))
            .await
            .map_err(task_error)??;
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        write_output(output, bytes).await?;
        state.advance();

        let report = ConversionReport {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            pages_total,
            pages_written,
            failed_pages,
            completed_at: chrono::Utc::now(),
        };
        state.advance();

        Ok(report)
    }

    async fn finish(
        &self,
        document: &str,
        source: &Path,
        result: &Result<ConversionReport, ConvertError>,
    ) {
        self.pool.progress().remove(document).await;

        match result {
            Ok(report) => tracing::info!(
                path = %source.display(),
                output = %report.output.display(),
                pages = report.pages_written,
                failed = report.failed_pages.len(),
                state = %ConversionState::Done,
                "Conversion complete"
            ),
            Err(ConvertError::Cancelled) => tracing::info!(
                path = %source.display(),
                state = %ConversionState::Failed,
                "Conversion cancelled"
            ),
            Err(e) => tracing::error!(
                path = %source.display(),
                error = %e,
                state = %ConversionState::Failed,
                "Conversion failed"
            ),
        }
    }
}

/// Append recognized pages in source order.
fn reassemble(
    slots: Vec<Option<OcrPageResult>>,
    page_sizes: &[PageSize],
) -> (PdfAssembler, Vec<PageFailure>) {
    let mut assembler = PdfAssembler::new();
    let mut failures = Vec::new();

    for (page_index, slot) in slots.into_iter().enumerate() {
        let outcome = match slot {
            Some(result) => result.outcome.map_err(|e| e.to_string()),
            None => Err("no result".to_string()),
        };
        let appended = outcome.and_then(|overlay| {
            let target = page_sizes
                .get(page_index)
                .copied()
                .ok_or_else(|| "missing page size".to_string())?;
            assembler
                .append_page(&overlay, target)
                .map_err(|e| e.to_string())
        });
        if let Err(reason) = appended {
            failures.push(PageFailure { page_index, reason });
        }
    }

    (assembler, failures)
}

async fn write_output(output: &Path, bytes: Vec<u8>) -> Result<(), ConvertError> {
    let path = output.to_path_buf();
    tokio::task::spawn_blocking(move || fsutil::write_atomic(&path, &bytes))
        .await
        .map_err(task_error)?
        .map_err(|source| ConvertError::Write {
            path: output.to_path_buf(),
            source,
        })
}

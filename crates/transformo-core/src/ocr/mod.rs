//! Optical character recognition: the engine boundary, the per-page worker
//! and the shared worker pool.

mod pool;
mod tesseract;
mod worker;

pub use pool::{ImageJob, OcrJob, OcrPool, PageJob};
pub use tesseract::TesseractEngine;
pub use worker::{recognize_image, render_page, OcrImageResult, OcrPageResult};

#[cfg(test)]
pub(crate) use worker::test_support;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::OcrSettings;
use crate::pdf::{PageImage, PdfError};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("page {page_index} is out of range")]
    PageOutOfRange { page_index: usize },

    #[error("failed to rasterize page: {0}")]
    Raster(#[from] PdfError),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    #[error("OCR engine produced no output")]
    EmptyOutput,

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR task panicked: {0}")]
    Panicked(String),

    #[error("cancelled before recognition started")]
    Cancelled,

    #[error("OCR worker pool is shut down")]
    PoolClosed,
}

/// Per-call recognition settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOptions {
    /// Tesseract language string, e.g. `eng` or `eng+deu`
    pub language: String,
    /// Page segmentation mode
    pub psm: u8,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            psm: 3,
        }
    }
}

impl From<&OcrSettings> for OcrOptions {
    fn from(settings: &OcrSettings) -> Self {
        Self {
            language: settings.language.clone(),
            psm: settings.psm,
        }
    }
}

/// An OCR backend.
///
/// Both methods are blocking and are called from `spawn_blocking` tasks,
/// possibly many at once.
pub trait OcrEngine: Send + Sync {
    /// Recognize a rasterized page and return a single-page PDF holding the
    /// page image with an invisible text layer on top.
    fn recognize_page(&self, page: &PageImage, options: &OcrOptions) -> Result<Vec<u8>, OcrError>;

    /// Recognize an encoded image (PNG or JPEG) and return its plain text.
    fn recognize_text(&self, image: &[u8], options: &OcrOptions) -> Result<String, OcrError>;
}

//! PDF container operations: text extraction, page geometry, rasterization and
//! reassembly of OCR output.

mod assemble;
mod extractor;
mod geometry;
mod raster;

pub use assemble::PdfAssembler;
pub use extractor::{extract_text, extract_text_from_bytes, has_text_layer, ExtractedDocument};
pub use geometry::PageSize;
pub use raster::{MupdfRasterizer, PageImage, Rasterizer};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to read PDF {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PDF: {0}")]
    Parse(#[source] lopdf::Error),

    #[error("PDF has no pages")]
    NoPages,

    #[error("page {page_index} has no usable page box")]
    InvalidPageBox { page_index: usize },

    #[error("failed to render page {page_index}: {source}")]
    Render {
        page_index: usize,
        #[source]
        source: mupdf::Error,
    },

    #[error("rendered page {page_index} has an unexpected pixel layout")]
    PixelLayout { page_index: usize },

    #[error("failed to encode page image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to serialize PDF: {0}")]
    Serialize(String),
}

/// A source PDF held in memory for the duration of one conversion.
///
/// The bytes are shared with page workers, which each open their own
/// rasterizer handle over them.
#[derive(Debug, Clone)]
pub struct SourcePdf {
    pub path: PathBuf,
    pub bytes: Arc<Vec<u8>>,
    /// Physical size of each page, indexed by 0-based page index
    pub page_sizes: Vec<PageSize>,
}

impl SourcePdf {
    /// Read and parse a PDF, recording each page's physical size.
    pub fn open(path: &Path) -> Result<Self, PdfError> {
        let bytes = std::fs::read(path).map_err(|source| PdfError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = lopdf::Document::load_mem(&bytes).map_err(PdfError::Parse)?;
        let page_sizes = geometry::page_sizes(&doc)?;

        Ok(Self {
            path: path.to_path_buf(),
            bytes: Arc::new(bytes),
            page_sizes,
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }
}

//! One unit of OCR work: a page in, an overlay page out.

use super::{OcrEngine, OcrError, OcrOptions};
use crate::docx::MediaImage;
use crate::pdf::{PageImage, Rasterizer, SourcePdf};

/// Result of recognizing one source page.
#[derive(Debug)]
pub struct OcrPageResult {
    pub page_index: usize,
    /// Single-page overlay PDF, or why the page could not be recognized
    pub outcome: Result<Vec<u8>, OcrError>,
}

impl OcrPageResult {
    pub fn failed(page_index: usize, error: OcrError) -> Self {
        Self {
            page_index,
            outcome: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Result of recognizing one embedded Word image.
#[derive(Debug)]
pub struct OcrImageResult {
    /// Position of the image in reading order
    pub index: usize,
    pub name: String,
    pub outcome: Result<String, OcrError>,
}

impl OcrImageResult {
    pub fn failed(index: usize, name: String, error: OcrError) -> Self {
        Self {
            index,
            name,
            outcome: Err(error),
        }
    }
}

/// Rasterize page `page_index` of `source` at `dpi` and recognize it.
///
/// Never returns an error: failures are reported in the result, tagged with
/// the page index.
pub fn render_page(
    page_index: usize,
    source: &SourcePdf,
    dpi: u32,
    rasterizer: &dyn Rasterizer,
    engine: &dyn OcrEngine,
    options: &OcrOptions,
) -> OcrPageResult {
    let outcome = recognize_page(page_index, source, dpi, rasterizer, engine, options);
    if let Err(e) = &outcome {
        tracing::warn!(
            path = %source.path.display(),
            page = page_index,
            error = %e,
            "Page OCR failed"
        );
    }
    OcrPageResult {
        page_index,
        outcome,
    }
}

fn recognize_page(
    page_index: usize,
    source: &SourcePdf,
    dpi: u32,
    rasterizer: &dyn Rasterizer,
    engine: &dyn OcrEngine,
    options: &OcrOptions,
) -> Result<Vec<u8>, OcrError> {
    let source_size = *source
        .page_sizes
        .get(page_index)
        .ok_or(OcrError::PageOutOfRange { page_index })?;

    let pixels = rasterizer.rasterize(&source.bytes, page_index, dpi)?;
    let image = PageImage {
        page_index,
        dpi,
        pixels,
        source_size,
    };

    engine.recognize_page(&image, options)
}

/// Recognize one embedded image as plain text.
pub fn recognize_image(
    index: usize,
    image: &MediaImage,
    engine: &dyn OcrEngine,
    options: &OcrOptions,
) -> OcrImageResult {
    let outcome = engine.recognize_text(&image.data, options);
    if let Err(e) = &outcome {
        tracing::warn!(image = %image.name, error = %e, "Image OCR failed");
    }
    OcrImageResult {
        index,
        name: image.name.clone(),
        outcome,
    }
}

//! Page rasterization.

use std::io::Cursor;

use image::RgbImage;
use mupdf::{Colorspace, Matrix};

use super::{PageSize, PdfError};

/// A rasterized source page, ready for recognition.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index in the source document
    pub page_index: usize,
    /// Resolution the page was rendered at
    pub dpi: u32,
    pub pixels: RgbImage,
    /// Physical size of the source page
    pub source_size: PageSize,
}

impl PageImage {
    /// Encode the pixel buffer as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, PdfError> {
        let mut out = Vec::new();
        self.pixels
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
        Ok(out)
    }
}

/// Renders one page of a PDF to an RGB pixel buffer.
///
/// Implementations are called from many blocking tasks at once and must not
/// share per-document state between calls.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8], page_index: usize, dpi: u32) -> Result<RgbImage, PdfError>;
}

/// MuPDF-backed rasterizer.
///
/// MuPDF documents are not thread-safe, so every call opens its own document
/// over the shared bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfRasterizer;

impl Rasterizer for MupdfRasterizer {
    fn rasterize(&self, pdf: &[u8], page_index: usize, dpi: u32) -> Result<RgbImage, PdfError> {
        let render_err = |source| PdfError::Render { page_index, source };

        let document = mupdf::Document::from_bytes(pdf, "application/pdf").map_err(render_err)?;
        let page = document.load_page(page_index as i32).map_err(render_err)?;

        // PDF user space is 72 units per inch
        let scale = dpi as f32 / 72.0;
        let matrix = Matrix::new_scale(scale, scale);
        let pixmap = page
            .to_pixmap(&matrix, &Colorspace::device_rgb(), false, true)
            .map_err(render_err)?;

        let width = pixmap.width() as u32;
        let height = pixmap.height() as u32;
        let samples = pixmap.samples();
        let n = pixmap.n() as usize;
        if n < 3 {
            return Err(PdfError::PixelLayout { page_index });
        }

        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for pixel in samples.chunks_exact(n).take((width * height) as usize) {
            rgb.extend_from_slice(&pixel[..3]);
        }

        tracing::debug!(page = page_index, width, height, dpi, "Rasterized page");

        RgbImage::from_raw(width, height, rgb).ok_or(PdfError::PixelLayout { page_index })
    }
}

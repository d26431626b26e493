use std::path::Path;

use anyhow::{Context, Result};

/// Result of extracting text from a PDF
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Extracted text content
    pub text: String,
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Number of pages that produced non-whitespace text
    pub text_pages: usize,
}

/// Extract text from a PDF file
pub fn extract_text(path: &Path) -> Result<ExtractedDocument> {
    let pdf_bytes = std::fs::read(path).context("Failed to read PDF file")?;
    extract_text_from_bytes(&pdf_bytes)
}

/// Extract text from PDF bytes
pub fn extract_text_from_bytes(pdf_bytes: &[u8]) -> Result<ExtractedDocument> {
    let doc = lopdf::Document::load_mem(pdf_bytes).context("Failed to parse PDF")?;

    // get_pages is keyed by 1-based page number, so iteration is in page order
    let pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    let page_count = pages.len();

    let mut full_text = String::new();
    let mut text_pages = 0;

    for page_num in &pages {
        let page_text = doc.extract_text(&[*page_num]).unwrap_or_default();
        if !page_text.trim().is_empty() {
            text_pages += 1;
        }
        full_text.push_str(&page_text);
        if !page_text.ends_with('\n') && !page_text.is_empty() {
            full_text.push('\n');
        }
    }

    tracing::debug!(
        chars = full_text.len(),
        pages = page_count,
        text_pages,
        "Extracted PDF text"
    );

    Ok(ExtractedDocument {
        text: full_text,
        page_count,
        text_pages,
    })
}

/// Check whether any page of the PDF carries extractable text.
///
/// Stops at the first page with non-whitespace text.
pub fn has_text_layer(pdf_bytes: &[u8]) -> Result<bool> {
    let doc = lopdf::Document::load_mem(pdf_bytes).context("Failed to parse PDF")?;

    for page_num in doc.get_pages().keys() {
        let page_text = doc.extract_text(&[*page_num]).unwrap_or_default();
        if !page_text.trim().is_empty() {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::test_support::{scanned_pdf, text_pdf};

    #[test]
    fn test_extract_text_simple() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("test.pdf");

        std::fs::write(&pdf_path, text_pdf(&["Hello World"])).unwrap();

        let result = extract_text(&pdf_path).unwrap();

        assert_eq!(result.page_count, 1);
        assert_eq!(result.text_pages, 1);
        assert!(
            result.text.contains("Hello") || result.text.contains("World"),
            "Expected text to contain 'Hello' or 'World', got: '{}'",
            result.text
        );
    }

    #[test]
    fn test_extract_text_multipage() {
        let pdf_bytes = text_pdf(&["Page One", "Page Two", "Page Three"]);

        let result = extract_text_from_bytes(&pdf_bytes).unwrap();

        assert_eq!(result.page_count, 3);
        assert_eq!(result.text_pages, 3);
        assert!(!result.text.is_empty());
    }

    #[test]
    fn test_extract_text_image_only() {
        let pdf_bytes = scanned_pdf(&[(612.0, 792.0), (612.0, 792.0)]);

        let result = extract_text_from_bytes(&pdf_bytes).unwrap();

        assert_eq!(result.page_count, 2);
        assert_eq!(result.text_pages, 0);
        assert!(result.text.trim().is_empty());
    }

    #[test]
    fn test_extract_text_file_not_found() {
        let result = extract_text(Path::new("/nonexistent/path/to/file.pdf"));

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("Failed to read PDF file"),
            "Expected 'Failed to read PDF file' error, got: {}",
            err
        );
    }

    #[test]
    fn test_extract_text_invalid_pdf() {
        let result = extract_text_from_bytes(b"this is not a valid pdf file");

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("Failed to parse PDF"),
            "Expected 'Failed to parse PDF' error, got: {}",
            err
        );
    }

    #[test]
    fn test_extract_text_empty_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("empty.pdf");
        std::fs::File::create(&pdf_path).unwrap();

        let result = extract_text(&pdf_path);

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse PDF"));
    }

    #[test]
    fn test_has_text_layer() {
        assert!(has_text_layer(&text_pdf(&["Invoice 42"])).unwrap());
        assert!(!has_text_layer(&scanned_pdf(&[(612.0, 792.0)])).unwrap());
        assert!(has_text_layer(b"garbage").is_err());
    }
}

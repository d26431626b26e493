//! Decides whether a document already carries machine-readable text.

use std::path::Path;

use serde::Serialize;

use crate::docx;
use crate::format::DocumentFormat;
use crate::pdf;

/// Outcome of inspecting a document for a text layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readability {
    /// At least one page or paragraph has non-whitespace text
    MachineReadable,
    /// The document opened fine but holds no text
    Scanned,
    /// The document could not be opened or parsed
    Unreadable,
}

/// What an `Unreadable` document counts as at a given call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Treat it as scanned and attempt conversion
    AssumeScanned,
    /// Treat it as not scanned and leave it alone
    Skip,
}

/// Ingestion over-converts rather than missing a scanned document.
pub const CONVERSION_POLICY: Fallback = Fallback::AssumeScanned;

/// Search never queues work for files it cannot read.
pub const SEARCH_POLICY: Fallback = Fallback::Skip;

/// Inspect a PDF or Word document.
///
/// Files with any other extension are `Unreadable`.
pub fn readability(path: &Path) -> Readability {
    let Some(format) = DocumentFormat::from_path(path) else {
        return Readability::Unreadable;
    };

    let result = match format {
        DocumentFormat::Pdf => std::fs::read(path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| pdf::has_text_layer(&bytes)),
        DocumentFormat::Docx => docx::read_file(path)
            .and_then(|bytes| docx::has_text(&bytes))
            .map_err(anyhow::Error::from),
    };

    match result {
        Ok(true) => Readability::MachineReadable,
        Ok(false) => Readability::Scanned,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not inspect document");
            Readability::Unreadable
        }
    }
}

/// True if the document needs OCR, resolving `Unreadable` with `policy`.
pub fn is_scanned(path: &Path, policy: Fallback) -> bool {
    match readability(path) {
        Readability::MachineReadable => false,
        Readability::Scanned => true,
        Readability::Unreadable => policy == Fallback::AssumeScanned,
    }
}

//! Document format detection and output naming.

use std::path::{Path, PathBuf};

/// Suffix appended to converted PDF file stems.
pub const PDF_OUTPUT_SUFFIX: &str = "_converted";
/// Suffix appended to converted Word file stems.
pub const DOCX_OUTPUT_SUFFIX: &str = "_searchable";

/// Container formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    fn output_suffix(self) -> &'static str {
        match self {
            Self::Pdf => PDF_OUTPUT_SUFFIX,
            Self::Docx => DOCX_OUTPUT_SUFFIX,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Deterministic output path for a source document:
/// `<output_dir>/<stem>_converted.pdf` or `<output_dir>/<stem>_searchable.docx`.
pub fn output_path_for(source: &Path, output_dir: &Path) -> Option<PathBuf> {
    let format = DocumentFormat::from_path(source)?;
    let stem = source.file_stem()?.to_string_lossy();
    let name = format!("{}{}.{}", stem, format.output_suffix(), format.extension());
    Some(output_dir.join(name))
}

/// True if the file name already carries an output suffix.
pub fn is_converted_output(path: &Path) -> bool {
    let Some(format) = DocumentFormat::from_path(path) else {
        return false;
    };
    path.file_stem()
        .map(|stem| stem.to_string_lossy().ends_with(format.output_suffix()))
        .unwrap_or(false)
}

//! OCR through the `tesseract` command-line program.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{OcrEngine, OcrError, OcrOptions};
use crate::pdf::PageImage;

/// Shells out to `tesseract`, one process per page or image.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: PathBuf,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that the executable can be started
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Run tesseract on `input`, writing `<output_base>.<ext>` for each
    /// requested output config.
    fn run(
        &self,
        input: &Path,
        output_base: &Path,
        options: &OcrOptions,
        dpi: Option<u32>,
        configs: &[&str],
    ) -> Result<(), OcrError> {
        let mut command = Command::new(&self.program);
        command
            .arg(input)
            .arg(output_base)
            .arg("-l")
            .arg(&options.language)
            .arg("--psm")
            .arg(options.psm.to_string());
        if let Some(dpi) = dpi {
            command.arg("--dpi").arg(dpi.to_string());
        }
        command.args(configs);

        let output = command.output().map_err(|source| OcrError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(OcrError::EngineFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize_page(&self, page: &PageImage, options: &OcrOptions) -> Result<Vec<u8>, OcrError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("page.png");
        let output_base = scratch.path().join("page");

        std::fs::write(&input, page.to_png()?)?;
        self.run(&input, &output_base, options, Some(page.dpi), &["pdf"])?;

        let pdf = std::fs::read(output_base.with_extension("pdf"))?;
        if pdf.is_empty() {
            return Err(OcrError::EmptyOutput);
        }

        tracing::debug!(page = page.page_index, bytes = pdf.len(), "Recognized page");
        Ok(pdf)
    }

    fn recognize_text(&self, image: &[u8], options: &OcrOptions) -> Result<String, OcrError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("image");
        let output_base = scratch.path().join("text");

        std::fs::write(&input, image)?;
        self.run(&input, &output_base, options, None, &[])?;

        let text = std::fs::read_to_string(output_base.with_extension("txt"))?;
        Ok(text.trim().to_string())
    }
}

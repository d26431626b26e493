//! Transformo Core - scanned document ingestion
//!
//! This crate contains the ingestion pipeline behind Transformo:
//! - Readability classification of PDF and Word documents (lopdf, zip)
//! - Page OCR through a shared worker pool (mupdf, tesseract)
//! - Document conversion that reassembles OCR pages in order
//! - A directory watcher with a stability gate (notify)
//! - A text cache and substring search over converted output

pub mod classify;
pub mod config;
pub mod convert;
pub mod docx;
pub mod format;
pub mod fsutil;
pub mod ocr;
pub mod pdf;
pub mod progress;
pub mod search;
pub mod watcher;

pub use classify::{is_scanned, readability, Fallback, Readability};
pub use config::{Config, OcrSettings, WatchBackend};
pub use convert::{ConversionReport, ConvertError, Converter};
pub use format::DocumentFormat;
pub use ocr::{OcrEngine, OcrError, OcrOptions, OcrPool, TesseractEngine};
pub use pdf::{MupdfRasterizer, PageImage, Rasterizer};
pub use progress::{DocumentProgress, ProgressTracker};
pub use search::{SearchIndex, TextCache};
pub use watcher::{IngestEvent, IngestionWatcher, WatchError, WatchSettings};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "TRANSFORMO_CONFIG";

/// Rasterization resolution used when none is configured.
pub const DEFAULT_DPI: u32 = 111;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How the watcher learns about new files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// OS change notifications via `notify`
    Notify,
    /// Periodic directory listing diffed against the known-file set
    Poll,
}

/// Settings handed to the OCR engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Path or name of the tesseract executable
    pub tesseract_path: PathBuf,
    /// Recognition language(s), tesseract syntax (e.g. "eng+deu")
    pub language: String,
    /// Page segmentation mode
    pub psm: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            psm: 3,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory watched for incoming documents
    pub watch_dir: PathBuf,
    /// Directory that receives converted documents
    pub output_dir: PathBuf,
    /// Watch subdirectories too
    pub recursive: bool,
    pub backend: WatchBackend,
    /// Listing interval for the poll backend
    pub poll_interval_ms: u64,
    /// Treat `Modified` events like `Created` ones
    pub react_to_modified: bool,
    /// Rasterization resolution for OCR
    pub dpi: u32,
    /// Number of size samples the stability gate takes
    pub stability_checks: u32,
    /// Delay between stability samples
    pub stability_interval_ms: u64,
    /// Page OCR workers shared by all conversions (0 = available parallelism)
    pub page_workers: usize,
    pub ocr: OcrSettings,
    /// Re-extract cached text when a file's signature changed
    pub search_revalidate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            output_dir: PathBuf::from("converted"),
            recursive: true,
            backend: WatchBackend::Notify,
            poll_interval_ms: 1000,
            react_to_modified: false,
            dpi: DEFAULT_DPI,
            stability_checks: 5,
            stability_interval_ms: 600,
            page_workers: 0,
            ocr: OcrSettings::default(),
            search_revalidate: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from `$TRANSFORMO_CONFIG` or the user config dir, or use defaults
    pub fn load_or_default() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `~/.config/transformo/config.json` on Linux, the platform equivalent elsewhere
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("transformo").join("config.json"))
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)
    }

    pub fn stability_interval(&self) -> Duration {
        Duration::from_millis(self.stability_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolved worker count for the page OCR pool
    pub fn page_worker_count(&self) -> usize {
        if self.page_workers > 0 {
            return self.page_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dpi, 111);
        assert_eq!(config.stability_checks, 5);
        assert_eq!(config.stability_interval(), Duration::from_millis(600));
        assert_eq!(config.output_dir, PathBuf::from("converted"));
        assert_eq!(config.ocr.psm, 3);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "watch_dir": "/srv/inbox", "backend": "poll", "ocr": { "language": "deu" } }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.watch_dir, PathBuf::from("/srv/inbox"));
        assert_eq!(config.backend, WatchBackend::Poll);
        assert_eq!(config.ocr.language, "deu");
        assert_eq!(config.ocr.psm, 3);
        assert_eq!(config.dpi, DEFAULT_DPI);
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_page_worker_count_never_zero() {
        let config = Config::default();
        assert!(config.page_worker_count() >= 1);

        let config = Config {
            page_workers: 3,
            ..Config::default()
        };
        assert_eq!(config.page_worker_count(), 3);
    }
}

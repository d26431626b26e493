use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one document conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Opened,
    Dispatched,
    Collecting,
    Reassembled,
    Written,
    Done,
    Failed,
}

impl ConversionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Dispatched => "dispatched",
            Self::Collecting => "collecting",
            Self::Reassembled => "reassembled",
            Self::Written => "written",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// The state that follows this one on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Opened => Some(Self::Dispatched),
            Self::Dispatched => Some(Self::Collecting),
            Self::Collecting => Some(Self::Reassembled),
            Self::Reassembled => Some(Self::Written),
            Self::Written => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logs state transitions for one document.
pub(crate) struct StateLog<'a> {
    path: &'a Path,
    state: ConversionState,
}

impl<'a> StateLog<'a> {
    pub fn opened(path: &'a Path) -> Self {
        tracing::debug!(path = %path.display(), state = %ConversionState::Opened, "Conversion state");
        Self {
            path,
            state: ConversionState::Opened,
        }
    }

    pub fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            self.state = next;
            tracing::debug!(path = %self.path.display(), state = %next, "Conversion state");
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }
}

/// A page (or embedded image) that did not make it into the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    pub page_index: usize,
    pub reason: String,
}

/// Summary of a finished conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Pages (or images) in the source
    pub pages_total: usize,
    /// Pages (or paragraphs) in the output
    pub pages_written: usize,
    /// Sorted by page index
    pub failed_pages: Vec<PageFailure>,
    pub completed_at: DateTime<Utc>,
}

impl ConversionReport {
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

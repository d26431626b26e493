//! Ingestion watcher.
//!
//! Observes a directory for new documents, waits until each has finished
//! being written, and converts the scanned ones into the output directory.
//!
//! OS notifications (or a periodic listing) are mapped to [`WatchEvent`]s on
//! one channel. A single dispatcher task owns the [`WatchState`], filters
//! events, and spawns one job per accepted file; job outcomes flow back to
//! the dispatcher and out to listeners as [`IngestEvent`]s.

mod events;
mod stability;
mod state;

pub use events::{IngestEvent, WatchEvent};
pub use stability::{Stability, StabilityGate};
pub use state::WatchState;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::classify::{is_scanned, CONVERSION_POLICY};
use crate::config::{Config, WatchBackend};
use crate::convert::{ConversionReport, ConvertError, Converter};
use crate::format::{self, DocumentFormat};
use crate::fsutil::{self, FileSignature};
use crate::search::TextCache;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch directory {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start file watcher: {0}")]
    Notify(#[from] notify::Error),

    #[error("watcher task failed: {0}")]
    Task(String),
}

/// Watcher settings, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub recursive: bool,
    pub backend: WatchBackend,
    pub poll_interval: Duration,
    /// Also convert known files whose contents changed
    pub react_to_modified: bool,
    pub stability_checks: u32,
    pub stability_interval: Duration,
}

impl WatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.watch_dir.clone(),
            output_dir: config.output_dir.clone(),
            recursive: config.recursive,
            backend: config.backend,
            poll_interval: config.poll_interval(),
            react_to_modified: config.react_to_modified,
            stability_checks: config.stability_checks,
            stability_interval: config.stability_interval(),
        }
    }
}

/// Canonical form when the path exists, absolute form otherwise.
fn resolve_dir(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Decides which paths are ingestion candidates.
#[derive(Debug, Clone)]
struct PathFilter {
    output_dir: PathBuf,
}

impl PathFilter {
    fn accepts(&self, path: &Path) -> bool {
        if DocumentFormat::from_path(path).is_none() || format::is_converted_output(path) {
            return false;
        }
        if path.starts_with(&self.output_dir) {
            return false;
        }
        // Hidden files and Office lock files (`~$name.docx`)
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        !(name.starts_with('.') || name.starts_with("~$"))
    }
}

/// Everything a conversion job needs, shared by all jobs of one run.
struct JobContext {
    converter: Converter,
    cache: Arc<TextCache>,
    gate: StabilityGate,
    output_dir: PathBuf,
    cancel: CancellationToken,
}

#[derive(Debug)]
enum JobOutcome {
    Unstable,
    AlreadyReadable,
    Converted(ConversionReport),
    Failed(String),
    Cancelled,
}

struct Running {
    cancel: CancellationToken,
    /// OS watch handle; dropping it stops notifications
    notify: Option<RecommendedWatcher>,
    poller: Option<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
}

/// Watches a directory and converts scanned documents that appear in it.
pub struct IngestionWatcher {
    settings: WatchSettings,
    converter: Converter,
    cache: Arc<TextCache>,
    events_tx: mpsc::UnboundedSender<IngestEvent>,
    running: Option<Running>,
}

impl IngestionWatcher {
    /// Create a stopped watcher. The receiver yields what happened to each
    /// file the watcher picked up.
    pub fn new(
        settings: WatchSettings,
        converter: Converter,
        cache: Arc<TextCache>,
    ) -> (Self, mpsc::UnboundedReceiver<IngestEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                settings,
                converter,
                cache,
                events_tx,
                running: None,
            },
            events_rx,
        )
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start watching. Documents already present are recorded as known and
    /// left alone. Calling `start` on a running watcher does nothing.
    pub async fn start(&mut self) -> Result<(), WatchError> {
        if self.running.is_some() {
            return Ok(());
        }

        if !self.settings.root.is_dir() {
            return Err(WatchError::MissingRoot(self.settings.root.clone()));
        }
        std::fs::create_dir_all(&self.settings.output_dir).map_err(|source| {
            WatchError::OutputDir {
                path: self.settings.output_dir.clone(),
                source,
            }
        })?;

        let root = resolve_dir(&self.settings.root);
        let output_dir = resolve_dir(&self.settings.output_dir);
        let recursive = self.settings.recursive;

        let listing_root = root.clone();
        let existing = tokio::task::spawn_blocking(move || snapshot(&listing_root, recursive))
            .await
            .map_err(|e| WatchError::Task(e.to_string()))?;
        let state = WatchState::seeded(existing.clone());

        let cancel = CancellationToken::new();
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();

        let (notify, poller) = match self.settings.backend {
            WatchBackend::Notify => {
                let watcher = spawn_notify(&root, recursive, watch_tx)?;
                (Some(watcher), None)
            }
            WatchBackend::Poll => {
                let poller = tokio::spawn(run_poller(
                    root.clone(),
                    recursive,
                    self.settings.poll_interval,
                    existing,
                    watch_tx,
                    cancel.clone(),
                ));
                (None, Some(poller))
            }
        };

        let context = Arc::new(JobContext {
            converter: self.converter.clone(),
            cache: self.cache.clone(),
            gate: StabilityGate::new(
                self.settings.stability_checks,
                self.settings.stability_interval,
            ),
            output_dir: output_dir.clone(),
            cancel: cancel.clone(),
        });
        let dispatcher = Dispatcher {
            context,
            filter: PathFilter { output_dir },
            react_to_modified: self.settings.react_to_modified,
            state,
            events: self.events_tx.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(watch_rx, cancel.clone()));

        tracing::info!(
            root = %root.display(),
            backend = ?self.settings.backend,
            recursive,
            "Watcher started"
        );

        self.running = Some(Running {
            cancel,
            notify,
            poller,
            dispatcher,
        });
        Ok(())
    }

    /// Stop watching and wait for in-flight jobs to wind down. In-flight
    /// conversions are cancelled and write nothing. Does nothing if the
    /// watcher is not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        drop(running.notify);

        if let Some(poller) = running.poller {
            if let Err(e) = poller.await {
                tracing::error!(error = %e, "Poller task failed");
            }
        }
        if let Err(e) = running.dispatcher.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }

        tracing::info!(root = %self.settings.root.display(), "Watcher stopped");
    }
}

fn spawn_notify(
    root: &Path,
    recursive: bool,
    tx: mpsc::UnboundedSender<WatchEvent>,
) -> Result<RecommendedWatcher, WatchError> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                for watch_event in WatchEvent::from_notify(&event) {
                    // Closed once the dispatcher is gone
                    let _ = tx.send(watch_event);
                }
            }
            Err(e) => tracing::warn!(error = %e, "File watcher error"),
        },
        notify::Config::default(),
    )?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(root, mode)?;

    Ok(watcher)
}

/// Current documents under `root` with their signatures.
fn snapshot(root: &Path, recursive: bool) -> HashMap<PathBuf, Option<FileSignature>> {
    fsutil::list_documents(root, recursive)
        .into_iter()
        .map(|path| {
            let signature = FileSignature::of(&path).ok();
            (path, signature)
        })
        .collect()
}

/// Events for one poll tick.
///
/// Every listed document is reported as `Created`; the dispatcher's
/// [`WatchState`] drops the ones it already handled, which also lets a file
/// that was skipped as unstable be picked up again. A listed document whose
/// signature changed since the previous tick is reported as `Modified` as
/// well, and documents that disappeared as `Removed`.
fn poll_events(
    previous: &HashMap<PathBuf, Option<FileSignature>>,
    current: &HashMap<PathBuf, Option<FileSignature>>,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    let mut listed: Vec<_> = current.iter().collect();
    listed.sort_by(|a, b| a.0.cmp(b.0));
    for (path, signature) in listed {
        match previous.get(path) {
            Some(before) if before != signature => {
                events.push(WatchEvent::Modified(path.clone()));
            }
            _ => events.push(WatchEvent::Created(path.clone())),
        }
    }

    let mut removed: Vec<_> = previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();
    removed.sort();
    events.extend(removed.into_iter().map(WatchEvent::Removed));

    events
}

async fn run_poller(
    root: PathBuf,
    recursive: bool,
    interval: Duration,
    mut previous: HashMap<PathBuf, Option<FileSignature>>,
    tx: mpsc::UnboundedSender<WatchEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the start-up listing covers it
    ticker.tick().await;

    tracing::debug!(root = %root.display(), ?interval, "Poller started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {}
        }

        let listing_root = root.clone();
        let current =
            match tokio::task::spawn_blocking(move || snapshot(&listing_root, recursive)).await {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Directory listing failed");
                    continue;
                }
            };

        for event in poll_events(&previous, &current) {
            if tx.send(event).is_err() {
                return;
            }
        }
        previous = current;
    }

    tracing::debug!(root = %root.display(), "Poller stopped");
}

/// Owns the watch state and turns events into jobs.
struct Dispatcher {
    context: Arc<JobContext>,
    filter: PathFilter,
    react_to_modified: bool,
    state: WatchState,
    events: mpsc::UnboundedSender<IngestEvent>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut watch_rx: mpsc::UnboundedReceiver<WatchEvent>,
        cancel: CancellationToken,
    ) {
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();
        let mut job_paths: HashMap<tokio::task::Id, PathBuf> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Dispatcher cancelled");
                    break;
                }

                Some(joined) = jobs.join_next_with_id(), if !jobs.is_empty() => {
                    self.finish_job(joined, &mut job_paths);
                }

                event = watch_rx.recv() => match event {
                    Some(event) => {
                        if let Some(path) = self.accept(event) {
                            let context = self.context.clone();
                            let job_path = path.clone();
                            let handle =
                                jobs.spawn(async move { run_job(&context, &job_path).await });
                            job_paths.insert(handle.id(), path);
                        }
                    }
                    None => {
                        tracing::debug!("Watch event stream ended");
                        break;
                    }
                }
            }
        }

        // Jobs observe the cancellation token and finish quickly
        while let Some(joined) = jobs.join_next_with_id().await {
            self.finish_job(joined, &mut job_paths);
        }
    }

    /// Decide whether an event starts a job. Returns the path to process.
    fn accept(&mut self, event: WatchEvent) -> Option<PathBuf> {
        let path = event.path();
        if !self.filter.accepts(path) {
            tracing::trace!(path = %path.display(), "Ignoring path");
            return None;
        }

        if let WatchEvent::Removed(path) = &event {
            if !self.state.is_in_flight(path) {
                self.state.forget(path);
            }
            return None;
        }

        if self.state.is_in_flight(path) || !path.is_file() {
            return None;
        }

        let known = self.state.is_known(path);
        let changed = self.state.has_changed(path, FileSignature::of(path).ok());
        // A Modified event for an unknown path covers files skipped earlier
        // as unstable
        let accept = !known || (self.react_to_modified && changed);
        if !accept {
            return None;
        }

        let path = path.to_path_buf();
        self.state.begin(&path);
        tracing::debug!(path = %path.display(), event = ?event, "Accepted file");
        self.emit(IngestEvent::Accepted { path: path.clone() });
        Some(path)
    }

    fn finish_job(
        &mut self,
        joined: Result<(tokio::task::Id, JobOutcome), tokio::task::JoinError>,
        job_paths: &mut HashMap<tokio::task::Id, PathBuf>,
    ) {
        let (path, outcome) = match joined {
            Ok((id, outcome)) => (job_paths.remove(&id), outcome),
            Err(e) => {
                tracing::error!(error = %e, "Ingestion job panicked");
                (job_paths.remove(&e.id()), JobOutcome::Failed(e.to_string()))
            }
        };
        let Some(path) = path else {
            return;
        };

        match outcome {
            JobOutcome::Unstable => {
                self.state.forget(&path);
                self.emit(IngestEvent::Unstable { path });
            }
            JobOutcome::Cancelled => self.state.forget(&path),
            JobOutcome::AlreadyReadable => {
                self.state.complete(&path, FileSignature::of(&path).ok());
                self.emit(IngestEvent::AlreadyReadable { path });
            }
            JobOutcome::Converted(report) => {
                self.state.complete(&path, FileSignature::of(&path).ok());
                self.emit(IngestEvent::Converted { report });
            }
            JobOutcome::Failed(error) => {
                self.state.complete(&path, FileSignature::of(&path).ok());
                self.emit(IngestEvent::Failed { path, error });
            }
        }
    }

    fn emit(&self, event: IngestEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Stability gate, classification, conversion and cache refresh for one file.
async fn run_job(context: &JobContext, path: &Path) -> JobOutcome {
    let stability = tokio::select! {
        biased;

        _ = context.cancel.cancelled() => return JobOutcome::Cancelled,

        stability = context.gate.wait(path) => stability,
    };
    match stability {
        Stability::Stable { len: 0 } => {
            // Created but not written yet
            tracing::debug!(path = %path.display(), "File is empty, skipping");
            return JobOutcome::Unstable;
        }
        Stability::Stable { .. } => {}
        Stability::Unstable | Stability::Vanished => {
            tracing::warn!(path = %path.display(), ?stability, "File is not stable, skipping");
            return JobOutcome::Unstable;
        }
    }

    let classify_path = path.to_path_buf();
    let scanned =
        match tokio::task::spawn_blocking(move || is_scanned(&classify_path, CONVERSION_POLICY))
            .await
        {
            Ok(scanned) => scanned,
            Err(e) => return JobOutcome::Failed(e.to_string()),
        };
    if !scanned {
        tracing::info!(path = %path.display(), "Document already has text, skipping");
        return JobOutcome::AlreadyReadable;
    }

    tracing::info!(path = %path.display(), "Converting scanned document");
    match context
        .converter
        .convert_document(path, &context.output_dir, &context.cancel)
        .await
    {
        Ok(report) => {
            if context.cache.refresh(&report.output).await.is_none() {
                tracing::warn!(output = %report.output.display(), "Could not index converted document");
            }
            JobOutcome::Converted(report)
        }
        Err(ConvertError::Cancelled) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Failed(e.to_string()),
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use transformo_core::{
    Config, Converter, IngestionWatcher, SearchIndex, TesseractEngine, TextCache, WatchBackend,
    WatchSettings,
};

#[derive(Parser, Debug)]
#[command(name = "transformo")]
#[command(about = "Watches a folder and turns scanned documents into searchable ones")]
struct Args {
    /// JSON config file (defaults to $TRANSFORMO_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a directory and convert scanned documents as they arrive
    Watch {
        /// Directory to watch (overrides `watch_dir`)
        dir: Option<PathBuf>,
        /// Output directory (overrides `output_dir`)
        #[arg(long)]
        output: Option<PathBuf>,
        /// List the directory periodically instead of using OS notifications
        #[arg(long)]
        poll: bool,
    },
    /// Convert documents once, regardless of whether they look scanned
    Convert {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List documents under a directory whose text contains a term
    Search {
        term: String,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Report whether documents already have a text layer
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("transformo=info".parse()?)
                .add_directive("transformo_core=info".parse()?),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(args.command, config))
}

async fn run(command: Command, mut config: Config) -> anyhow::Result<()> {
    match command {
        Command::Watch { dir, output, poll } => {
            if let Some(dir) = dir {
                config.watch_dir = dir;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if poll {
                config.backend = WatchBackend::Poll;
            }
            watch(config).await
        }
        Command::Convert { paths, output } => {
            if let Some(output) = output {
                config.output_dir = output;
            }
            convert(config, paths).await
        }
        Command::Search { term, root } => {
            let root = root.unwrap_or_else(|| config.output_dir.clone());
            let index = SearchIndex::new(Arc::new(TextCache::new(config.search_revalidate)));
            for name in index.search(&term, &root).await {
                println!("{name}");
            }
            Ok(())
        }
        Command::Classify { paths } => {
            for path in paths {
                let readability = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || transformo_core::readability(&path)
                })
                .await?;
                println!("{}\t{}", path.display(), serde_json::to_string(&readability)?);
            }
            Ok(())
        }
    }
}

/// Fail early instead of failing every page of every document.
fn require_tesseract(config: &Config) -> anyhow::Result<()> {
    let engine = TesseractEngine::new(&config.ocr.tesseract_path);
    if !engine.is_available() {
        anyhow::bail!(
            "tesseract not found at {} (set ocr.tesseract_path in the config)",
            config.ocr.tesseract_path.display()
        );
    }
    Ok(())
}

async fn watch(config: Config) -> anyhow::Result<()> {
    require_tesseract(&config)?;
    let (converter, mut progress_rx) = Converter::from_config(&config);
    let workers = converter.pool().workers();
    let cache = Arc::new(TextCache::new(config.search_revalidate));
    let (mut watcher, mut events_rx) =
        IngestionWatcher::new(WatchSettings::from_config(&config), converter, cache);

    tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            tracing::debug!(
                document = %progress.document,
                completed = progress.pages.completed,
                failed = progress.pages.failed,
                total = progress.pages.total(),
                "OCR progress"
            );
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    watcher.start().await?;
    tracing::info!(
        watch_dir = %config.watch_dir.display(),
        output_dir = %config.output_dir.display(),
        workers,
        "Watching. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down...");
    watcher.stop().await;
    Ok(())
}

async fn convert(config: Config, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    require_tesseract(&config)?;
    config
        .ensure_dirs()
        .context("Failed to create output directory")?;
    let (converter, _progress_rx) = Converter::from_config(&config);
    let cancel = CancellationToken::new();

    let mut failures = 0;
    for path in paths {
        match converter
            .convert_document(&path, &config.output_dir, &cancel)
            .await
        {
            Ok(report) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Conversion failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} document(s) failed to convert");
    }
    Ok(())
}

//! Subforge - subtitle pipeline for uploaded media
//!
//! Command line entry point: runs jobs through the pipeline, compiles render
//! descriptions, probes media and mirrors remote listings into the cache.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subforge::cli::{Args, Commands, CompileFormat};
use subforge::config::Config;
use subforge::export::{Exporter, OverlayStrategy};
use subforge::job::{InMemoryJobStore, JobStatus};
use subforge::media::MediaToolkitFactory;
use subforge::notify::{JobEvent, NotificationBus};
use subforge::pipeline::{EnqueueRequest, Pipeline, PipelineServices};
use subforge::storage::ArtifactStore;
use subforge::subtitle::{
    build_overlay_filter, build_style_document, parse_srt, RenderDescription, Resolution, StyleConfig,
};
use subforge::sync::{
    CacheSync, CredentialProvider, DriveListing, InMemoryCredentialStore, InMemoryRemoteFileCache,
    OAuthExchange, RemoteFileCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("subforge.toml").exists() {
                info!("Found subforge.toml in current directory, loading...");
                Config::from_file("subforge.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Process {
            input,
            owner,
            name,
            subtitle,
            target_lang,
            style,
            export,
        } => {
            let style = load_style(style.as_deref())?;
            let request = EnqueueRequest {
                owner_id: owner,
                name,
                media_path: input,
                subtitle_path: subtitle,
                target_language: target_lang,
                style,
            };
            process(&config, request, export).await?;
        }
        Commands::Compile {
            input,
            style,
            format,
            font,
            width,
            height,
            output,
        } => {
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("cannot read {}", input.display()))?;
            let cues = parse_srt(&content);
            if cues.is_empty() {
                bail!("{} contains no subtitle cues", input.display());
            }
            let style = load_style(style.as_deref())?.resolve();

            let description = match format {
                CompileFormat::Ass => RenderDescription::StyleDocument {
                    document: build_style_document(&cues, &style, Resolution { width, height }),
                },
                CompileFormat::Overlay => {
                    let font = match font {
                        Some(font) => font,
                        None => OverlayStrategy::new(&config.media.fonts_dir)
                            .find_font()
                            .with_context(|| format!("no font file in {}", config.media.fonts_dir.display()))?,
                    };
                    RenderDescription::Overlay {
                        filter: build_overlay_filter(&cues, &style, &font).unwrap_or_default(),
                    }
                }
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, description.as_str())?;
                    info!("Wrote {} cues to {}", cues.len(), path.display());
                }
                None => println!("{}", description.as_str()),
            }
        }
        Commands::Probe { input } => {
            let toolkit = MediaToolkitFactory::create_toolkit(config.media.clone());
            toolkit.check_availability()?;
            let media = toolkit.probe(&input).await?;

            println!("{:<6} {:<10} {:<12}", "Index", "Type", "Resolution");
            println!("{}", "-".repeat(30));
            for (index, stream) in media.streams.iter().enumerate() {
                let resolution = match (stream.width, stream.height) {
                    (Some(w), Some(h)) => format!("{}x{}", w, h),
                    _ => "-".to_string(),
                };
                println!("{:<6} {:<10} {:<12}", index, stream.codec_type, resolution);
            }
            println!("\nPlayable: {}", media.is_playable());
            println!("Soft subtitles: {}", media.has_subtitle_stream());
        }
        Commands::Sync { credentials, watch } => {
            sync(&config, &credentials, watch).await?;
        }
        Commands::Config { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists, pass --force to overwrite", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

async fn process(config: &Config, mut request: EnqueueRequest, export: bool) -> Result<()> {
    let artifacts = ArtifactStore::new(&config.storage);
    artifacts.ensure_dirs().await?;

    // The pipeline owns (and may delete) its media, so work on a copy
    let upload = upload_path(artifacts.uploads_dir(), &request.media_path);
    tokio::fs::copy(&request.media_path, &upload)
        .await
        .with_context(|| format!("cannot copy {} into uploads", request.media_path.display()))?;
    info!("Processing media file: {}", request.media_path.display());
    request.media_path = upload;

    let jobs = Arc::new(InMemoryJobStore::new());
    let bus = NotificationBus::new(config.notify.capacity);
    let services = PipelineServices::from_config(config);
    let toolkit = services.media.clone();
    toolkit.check_availability()?;
    let pipeline = Pipeline::new(
        jobs.clone(),
        bus.clone(),
        artifacts.clone(),
        services,
        &config.extractor.source_language,
    );

    let owner_id = request.owner_id.clone();
    let mut events = bus.subscribe(None, Some(&owner_id))?;
    let job_id = pipeline.enqueue(request).await?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    while let Some(event) = events.recv().await {
        if event.job_id() != job_id {
            continue;
        }
        match event {
            JobEvent::Update {
                status, progress, ..
            } => {
                pb.set_position(progress as u64);
                pb.set_message(status.to_string());
                if status == JobStatus::Completed {
                    pb.finish_with_message("completed");
                    break;
                }
            }
            JobEvent::Deleted { reason, .. } => {
                pb.abandon_with_message("failed");
                bail!("Job {} failed: {}", job_id, reason);
            }
            JobEvent::Export { .. } => {}
        }
    }
    pipeline.wait(job_id).await?;

    let status = pipeline.status(job_id).await?;
    if let Some(subtitle) = &status.subtitle_ref {
        println!("Subtitles: {}", subtitle.display());
    }

    if export {
        let exporter = Exporter::with_default_strategies(
            jobs,
            bus,
            artifacts,
            toolkit,
            &config.media.fonts_dir,
        );
        let url = exporter.export(job_id).await?;
        println!("Export: {}", url);
    }

    Ok(())
}

async fn sync(config: &Config, credentials: &Path, watch_mode: bool) -> Result<()> {
    let store = Arc::new(InMemoryCredentialStore::from_file(credentials)?);
    let exchange = Arc::new(OAuthExchange::new(&config.sync)?);
    let provider = Arc::new(CredentialProvider::new(store, exchange));
    let listing = Arc::new(DriveListing::new(&config.sync)?);
    let cache = Arc::new(InMemoryRemoteFileCache::new());
    let sync = Arc::new(CacheSync::new(provider.clone(), listing, cache.clone(), &config.sync));

    if watch_mode {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = sync.start(shutdown_rx);
        info!("Remote sync running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(true);
        handle.await?;
        return Ok(());
    }

    let report = sync.sync_all().await?;
    println!(
        "Synced {} owner(s), {} failed, {} file(s) cached",
        report.owners_synced, report.owners_failed, report.files_upserted
    );

    println!("\n{:<20} {:<40} {:<12} {:<25}", "Owner", "Name", "Size", "Modified");
    println!("{}", "-".repeat(100));
    for owner_id in provider.owners().await? {
        for file in cache.list(&owner_id).await? {
            let size = file.size.map(format_size).unwrap_or_else(|| "-".to_string());
            let modified = file
                .modified_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!("{:<20} {:<40} {:<12} {:<25}", owner_id, file.name, size, modified);
        }
    }

    Ok(())
}

fn load_style(path: Option<&Path>) -> Result<StyleConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read style file {}", path.display()))?;
            Ok(serde_json::from_str(&content)?)
        }
        None => Ok(StyleConfig::default()),
    }
}

/// `<uploads>/<millis>.<ext>`, the way uploaded media is named.
fn upload_path(uploads_dir: &Path, input: &Path) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    match input.extension().and_then(|e| e.to_str()) {
        Some(ext) => uploads_dir.join(format!("{}.{}", millis, ext)),
        None => uploads_dir.join(millis.to_string()),
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".subforge").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "subforge.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subforge.log").display()
    );

    Ok(())
}

/// Format a byte count as a human readable string
fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= MB * 1024.0 {
        format!("{:.2} GB", bytes as f64 / MB / 1024.0)
    } else if bytes as f64 >= MB {
        format!("{:.1} MB", bytes as f64 / MB)
    } else {
        format!("{} KB", bytes / 1024)
    }
}

//! Export engine: burns a completed job's subtitles into a new video.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SubforgeError};
use crate::job::{JobId, JobStatus, JobStore};
use crate::media::MediaToolkit;
use crate::notify::{JobEvent, NotificationBus};
use crate::storage::{non_empty_file, ArtifactStore};
use crate::subtitle::{
    build_overlay_filter, build_style_document, parse_srt, render::escape_filter_path, Cue,
    Resolution, ResolvedStyle,
};

/// Result of one strategy attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Rendered,
    /// The strategy cannot run here; try the next one.
    Unavailable(String),
}

/// Inputs shared by every render strategy.
pub struct RenderContext<'a> {
    pub media_path: &'a Path,
    pub output_path: &'a Path,
    pub cues: &'a [Cue],
    pub style: &'a ResolvedStyle,
    pub toolkit: &'a dyn MediaToolkit,
}

#[async_trait]
pub trait RenderStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<StrategyOutcome>;
}

/// Timed `drawtext` overlays using a font file from the fonts directory.
pub struct OverlayStrategy {
    fonts_dir: PathBuf,
}

impl OverlayStrategy {
    pub fn new(fonts_dir: impl Into<PathBuf>) -> Self {
        Self {
            fonts_dir: fonts_dir.into(),
        }
    }

    /// First `.ttf`/`.otf` file by name, directly inside the fonts directory.
    pub fn find_font(&self) -> Option<PathBuf> {
        let mut fonts: Vec<PathBuf> = WalkDir::new(&self.fonts_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"))
                    .unwrap_or(false)
            })
            .collect();
        fonts.sort();
        fonts.into_iter().next()
    }
}

#[async_trait]
impl RenderStrategy for OverlayStrategy {
    fn name(&self) -> &'static str {
        "overlay"
    }

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<StrategyOutcome> {
        let Some(font) = self.find_font() else {
            return Ok(StrategyOutcome::Unavailable(format!(
                "no font file in {}",
                self.fonts_dir.display()
            )));
        };
        let Some(filter) = build_overlay_filter(ctx.cues, ctx.style, &font) else {
            return Ok(StrategyOutcome::Unavailable("no cues to draw".to_string()));
        };
        debug!("Overlay filter with {} directives", ctx.cues.len());

        ctx.toolkit.render(ctx.media_path, &filter, ctx.output_path).await?;
        Ok(StrategyOutcome::Rendered)
    }
}

/// ASS style document handed to the renderer's subtitle filter.
#[derive(Default)]
pub struct StyleDocumentStrategy;

impl StyleDocumentStrategy {
    pub fn new() -> Self {
        Self
    }

    async fn resolution(&self, ctx: &RenderContext<'_>) -> Resolution {
        match ctx.toolkit.probe(ctx.media_path).await {
            Ok(info) => info.resolution().unwrap_or_default(),
            Err(e) => {
                warn!("Could not probe {} for resolution: {}", ctx.media_path.display(), e);
                Resolution::FALLBACK
            }
        }
    }
}

#[async_trait]
impl RenderStrategy for StyleDocumentStrategy {
    fn name(&self) -> &'static str {
        "style-document"
    }

    async fn render(&self, ctx: &RenderContext<'_>) -> Result<StrategyOutcome> {
        let resolution = self.resolution(ctx).await;
        let document = build_style_document(ctx.cues, ctx.style, resolution);
        let document_path = ctx.output_path.with_extension("ass");
        fs::write(&document_path, &document)
            .await
            .map_err(|e| SubforgeError::Storage(format!("cannot write {}: {}", document_path.display(), e)))?;

        let filter_path = std::env::current_dir()
            .ok()
            .and_then(|cwd| pathdiff::diff_paths(&document_path, cwd))
            .unwrap_or_else(|| document_path.clone());
        let filter = format!("ass={}", escape_filter_path(&filter_path));

        let rendered = ctx.toolkit.render(ctx.media_path, &filter, ctx.output_path).await;
        if let Err(e) = fs::remove_file(&document_path).await {
            debug!("Could not remove {}: {}", document_path.display(), e);
        }
        rendered.map(|_| StrategyOutcome::Rendered)
    }
}

pub struct Exporter {
    jobs: Arc<dyn JobStore>,
    bus: NotificationBus,
    artifacts: ArtifactStore,
    toolkit: Arc<dyn MediaToolkit>,
    strategies: Vec<Box<dyn RenderStrategy>>,
}

impl Exporter {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        bus: NotificationBus,
        artifacts: ArtifactStore,
        toolkit: Arc<dyn MediaToolkit>,
        strategies: Vec<Box<dyn RenderStrategy>>,
    ) -> Self {
        Self {
            jobs,
            bus,
            artifacts,
            toolkit,
            strategies,
        }
    }

    /// Overlay first, style document second.
    pub fn with_default_strategies(
        jobs: Arc<dyn JobStore>,
        bus: NotificationBus,
        artifacts: ArtifactStore,
        toolkit: Arc<dyn MediaToolkit>,
        fonts_dir: &Path,
    ) -> Self {
        let strategies: Vec<Box<dyn RenderStrategy>> = vec![
            Box::new(OverlayStrategy::new(fonts_dir)),
            Box::new(StyleDocumentStrategy::new()),
        ];
        Self::new(jobs, bus, artifacts, toolkit, strategies)
    }

    /// Produce (or reuse) the subtitled video for a completed job and return its URL.
    pub async fn export(&self, job_id: JobId) -> Result<String> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| SubforgeError::NotFound(format!("job {}", job_id)))?;

        if job.status != JobStatus::Completed {
            return Err(SubforgeError::Validation(format!(
                "job {} is {}, not completed",
                job_id, job.status
            )));
        }
        let subtitle_path = job.subtitle_ref.clone().unwrap_or_default();
        if !non_empty_file(&subtitle_path).await {
            return Err(SubforgeError::Validation(format!(
                "job {} has no subtitle artifact",
                job_id
            )));
        }

        let output_path = self.artifacts.export_path(&job.media_path);
        if self.reusable(&output_path).await {
            info!(job_id = %job_id, "Reusing existing export {}", output_path.display());
            return self.finish(job_id, &job.owner_id, output_path).await;
        }

        let content = fs::read_to_string(&subtitle_path).await?;
        let cues = parse_srt(&content);
        if cues.is_empty() {
            return Err(SubforgeError::Validation(format!(
                "subtitle {} contains no cues",
                subtitle_path.display()
            )));
        }
        let style = job.style.resolve();

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let ctx = RenderContext {
            media_path: &job.media_path,
            output_path: &output_path,
            cues: &cues,
            style: &style,
            toolkit: self.toolkit.as_ref(),
        };

        let mut last_error = None;
        for strategy in &self.strategies {
            match strategy.render(&ctx).await {
                Ok(StrategyOutcome::Rendered) => {
                    info!(job_id = %job_id, "Rendered export with {} strategy", strategy.name());
                    return self.finish(job_id, &job.owner_id, output_path).await;
                }
                Ok(StrategyOutcome::Unavailable(why)) => {
                    info!("Skipping {} strategy: {}", strategy.name(), why);
                }
                Err(e) => {
                    warn!(job_id = %job_id, "{} strategy failed: {}", strategy.name(), e);
                    self.artifacts.remove_all(&[output_path.clone()]).await;
                    last_error = Some(e);
                }
            }
        }

        let message = match last_error {
            Some(e) => format!("all render strategies failed, last error: {}", e),
            None => "no render strategy available".to_string(),
        };
        Err(SubforgeError::external("Export", message))
    }

    // An existing output is served only when it has no soft subtitle stream
    async fn reusable(&self, output_path: &Path) -> bool {
        if !non_empty_file(output_path).await {
            return false;
        }
        let reuse = match self.toolkit.probe(output_path).await {
            Ok(info) => !info.has_subtitle_stream(),
            Err(e) => {
                warn!("Could not probe existing export {}: {}", output_path.display(), e);
                false
            }
        };
        if !reuse {
            info!("Discarding stale export {}", output_path.display());
            self.artifacts.remove_all(&[output_path.to_path_buf()]).await;
        }
        reuse
    }

    async fn finish(&self, job_id: JobId, owner_id: &str, output_path: PathBuf) -> Result<String> {
        let url = self.artifacts.export_url(&output_path);
        self.jobs.set_exported(job_id, output_path).await?;
        self.bus.publish_job(
            job_id,
            owner_id,
            JobEvent::Export {
                job_id,
                url: url.clone(),
            },
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::job::{InMemoryJobStore, Job};
    use crate::media::{MediaInfo, MockMediaToolkit, StreamInfo};
    use crate::subtitle::StyleConfig;

    struct Fixture {
        dir: tempfile::TempDir,
        jobs: Arc<InMemoryJobStore>,
        artifacts: ArtifactStore,
        bus: NotificationBus,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(&StorageConfig {
            uploads_dir: dir.path().join("uploads"),
            exports_dir: dir.path().join("uploads/exports"),
            public_base_url: "http://localhost:5001/uploads".to_string(),
        });
        std::fs::create_dir_all(dir.path().join("uploads/exports")).unwrap();
        std::fs::create_dir_all(dir.path().join("fonts")).unwrap();
        Fixture {
            dir,
            jobs: Arc::new(InMemoryJobStore::new()),
            artifacts,
            bus: NotificationBus::new(16),
        }
    }

    async fn completed_job(f: &Fixture) -> Job {
        let media = f.dir.path().join("uploads/clip.mp4");
        std::fs::write(&media, b"video").unwrap();
        let srt = f.dir.path().join("uploads/clip.srt");
        std::fs::write(&srt, "1\n00:00:01,000 --> 00:00:02,500\nHi: there\n").unwrap();

        let job = Job::new("owner-1", None, media, StyleConfig::default());
        f.jobs.insert(job.clone()).await.unwrap();
        f.jobs.complete(job.id, srt).await.unwrap()
    }

    fn exporter(f: &Fixture, toolkit: MockMediaToolkit) -> Exporter {
        Exporter::with_default_strategies(
            f.jobs.clone(),
            f.bus.clone(),
            f.artifacts.clone(),
            Arc::new(toolkit),
            &f.dir.path().join("fonts"),
        )
    }

    fn info(codec_types: &[&str]) -> MediaInfo {
        MediaInfo {
            streams: codec_types
                .iter()
                .map(|c| StreamInfo {
                    codec_type: c.to_string(),
                    width: Some(1920),
                    height: Some(1080),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_hard_burned_export_is_reused() {
        let f = fixture();
        let job = completed_job(&f).await;
        let output = f.artifacts.export_path(&job.media_path);
        std::fs::write(&output, b"burned").unwrap();

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(info(&["video", "audio"])));
        toolkit.expect_render().never();

        let mut sub = f.bus.subscribe(Some(job.id), None).unwrap();
        let url = exporter(&f, toolkit).export(job.id).await.unwrap();

        assert_eq!(url, "http://localhost:5001/uploads/exports/clip_subtitled.mp4");
        assert_eq!(sub.try_recv(), Some(JobEvent::Export { job_id: job.id, url }));
        let stored = f.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.exported_ref, Some(output));
    }

    #[tokio::test]
    async fn test_soft_subtitled_export_is_rendered_once() {
        let f = fixture();
        let job = completed_job(&f).await;
        let output = f.artifacts.export_path(&job.media_path);
        std::fs::write(&output, b"soft").unwrap();

        let stale = output.clone();
        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(move |path| {
            if path == stale.as_path() {
                Ok(info(&["video", "audio", "subtitle"]))
            } else {
                Ok(info(&["video", "audio"]))
            }
        });
        toolkit
            .expect_render()
            .times(1)
            .returning(|_, filter, out| {
                assert!(filter.starts_with("ass=") && !filter.contains('\''));
                std::fs::write(out, b"burned").unwrap();
                Ok(())
            });

        exporter(&f, toolkit).export(job.id).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"burned");
        assert!(!output.with_extension("ass").exists());
    }

    #[tokio::test]
    async fn test_overlay_is_preferred_when_a_font_exists() {
        let f = fixture();
        std::fs::write(f.dir.path().join("fonts/NotoSansMyanmar.ttf"), b"font").unwrap();
        let job = completed_job(&f).await;

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().never();
        toolkit.expect_render().times(1).returning(|_, filter, _| {
            assert!(filter.contains("drawtext="));
            assert!(filter.contains(":enable=between(t\\,1\\,2.5)"));
            assert!(filter.contains(":text=Hi\\\\: there:expansion=none:"));
            Ok(())
        });

        exporter(&f, toolkit).export(job.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_overlay_falls_back_to_style_document() {
        let f = fixture();
        std::fs::write(f.dir.path().join("fonts/a.otf"), b"font").unwrap();
        let job = completed_job(&f).await;

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Err(SubforgeError::external("Media probe", "no data")));
        toolkit.expect_render().times(2).returning(|_, filter, _| {
            if filter.contains("drawtext") {
                Err(SubforgeError::external("Renderer", "exit status: 1"))
            } else {
                Ok(())
            }
        });

        assert!(exporter(&f, toolkit).export(job.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_strategies_failing_leaves_job_untouched() {
        let f = fixture();
        let job = completed_job(&f).await;

        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(info(&["video"])));
        toolkit
            .expect_render()
            .returning(|_, _, _| Err(SubforgeError::external("Renderer", "exit status: 1")));

        let err = exporter(&f, toolkit).export(job.id).await.unwrap_err();
        assert!(matches!(err, SubforgeError::ExternalService { .. }));
        let stored = f.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.exported_ref, None);
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let f = fixture();
        let toolkit = MockMediaToolkit::new();
        let exporter = exporter(&f, toolkit);

        let missing = exporter.export(JobId::new()).await.unwrap_err();
        assert!(matches!(missing, SubforgeError::NotFound(_)));

        let pending = Job::new("owner-1", None, f.dir.path().join("uploads/p.mp4"), StyleConfig::default());
        f.jobs.insert(pending.clone()).await.unwrap();
        let err = exporter.export(pending.id).await.unwrap_err();
        assert!(matches!(err, SubforgeError::Validation(_)));
    }
}

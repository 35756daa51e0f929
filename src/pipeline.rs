use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{Result, SubforgeError};
use crate::extract::{ProcessExtractor, SubtitleExtractor};
use crate::job::{Job, JobId, JobStatus, JobStatusView, JobStore};
use crate::media::{MediaToolkit, MediaToolkitFactory};
use crate::notify::{JobEvent, NotificationBus};
use crate::storage::ArtifactStore;
use crate::subtitle::{parse_srt, to_srt, StyleConfig};
use crate::translate::{ProcessTranslator, SubtitleTranslator};

const INGEST: &str = "Subtitle ingest";
const MEDIA_CHECK: &str = "Media validation";

/// Progress checkpoints reported while a job is processing.
pub mod checkpoint {
    pub const ACCEPTED: u8 = 0;
    pub const QUEUED: u8 = 10;
    pub const INGEST: u8 = 30;
    pub const INGESTED: u8 = 60;
    pub const DONE: u8 = 100;
}

/// A caller's request to process one media file.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub owner_id: String,
    pub name: Option<String>,
    pub media_path: PathBuf,
    /// Subtitle document supplied by the caller; skips extraction
    pub subtitle_path: Option<PathBuf>,
    pub target_language: Option<String>,
    pub style: StyleConfig,
}

#[derive(Debug, Clone)]
struct RunInput {
    supplied_subtitle: Option<PathBuf>,
    target_language: Option<String>,
}

/// External services the pipeline drives.
pub struct PipelineServices {
    pub media: Arc<dyn MediaToolkit>,
    pub extractor: Arc<dyn SubtitleExtractor>,
    pub translator: Arc<dyn SubtitleTranslator>,
}

impl PipelineServices {
    /// Process-backed services as configured
    pub fn from_config(config: &Config) -> Self {
        Self {
            media: MediaToolkitFactory::create_toolkit(config.media.clone()),
            extractor: Arc::new(ProcessExtractor::new(config.extractor.clone())),
            translator: Arc::new(ProcessTranslator::new(config.translator.clone())),
        }
    }
}

/// Drives jobs from enqueue to completion in background tasks.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    jobs: Arc<dyn JobStore>,
    bus: NotificationBus,
    artifacts: ArtifactStore,
    services: PipelineServices,
    source_language: String,
    runs: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        bus: NotificationBus,
        artifacts: ArtifactStore,
        services: PipelineServices,
        source_language: &str,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                jobs,
                bus,
                artifacts,
                services,
                source_language: source_language.to_string(),
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record a new job and start its run. Returns as soon as the run is spawned.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId> {
        if request.owner_id.trim().is_empty() {
            return Err(SubforgeError::Validation("owner id is required".to_string()));
        }
        let is_file = fs::metadata(&request.media_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(SubforgeError::Validation(format!(
                "media file not found: {}",
                request.media_path.display()
            )));
        }

        let job = Job::new(
            &request.owner_id,
            request.name.as_deref(),
            request.media_path,
            request.style,
        );
        let job_id = job.id;
        self.inner.jobs.insert(job.clone()).await?;
        info!(job_id = %job_id, owner_id = %job.owner_id, "Job accepted");
        self.publish_progress(&job, checkpoint::ACCEPTED);

        let input = RunInput {
            supplied_subtitle: request.subtitle_path,
            target_language: request.target_language,
        };
        let mut runs = self.inner.runs.lock().await;
        self.spawn_run(&mut runs, job, input);
        Ok(job_id)
    }

    /// Run the whole pipeline again for a finished job, reusing its stored subtitle.
    pub async fn reprocess(&self, job_id: JobId, target_language: Option<String>) -> Result<JobId> {
        let mut runs = self.inner.runs.lock().await;
        if runs.get(&job_id).is_some_and(|h| !h.is_finished()) {
            return Err(SubforgeError::Race(job_id.to_string()));
        }

        let job = self
            .inner
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| SubforgeError::NotFound(format!("job {}", job_id)))?;
        if job.status == JobStatus::Processing {
            return Err(SubforgeError::Race(job_id.to_string()));
        }

        // Re-ingest from the source-language artifact, never a translated variant
        let source_subtitle = self.inner.artifacts.subtitle_path(&job.media_path);
        let mut stale: Vec<PathBuf> = job.exported_ref.iter().cloned().collect();
        stale.extend(job.subtitle_ref.iter().filter(|p| **p != source_subtitle).cloned());
        if !stale.is_empty() {
            self.inner.artifacts.remove_all(&stale).await;
        }
        let job = self.inner.jobs.restart(job_id).await?;
        info!(job_id = %job_id, "Job restarted");
        self.publish_progress(&job, checkpoint::ACCEPTED);

        let input = RunInput {
            supplied_subtitle: Some(source_subtitle),
            target_language,
        };
        self.spawn_run(&mut runs, job, input);
        Ok(job_id)
    }

    /// Wait for the job's current run to finish.
    pub async fn wait(&self, job_id: JobId) -> Result<()> {
        let handle = self.inner.runs.lock().await.remove(&job_id);
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| SubforgeError::external("Pipeline", format!("run aborted: {}", e))),
            None => Ok(()),
        }
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatusView> {
        self.inner
            .jobs
            .get(job_id)
            .await?
            .map(|job| job.status_view())
            .ok_or_else(|| SubforgeError::NotFound(format!("job {}", job_id)))
    }

    pub async fn list_jobs(&self, owner_id: &str) -> Result<Vec<Job>> {
        self.inner.jobs.list_by_owner(owner_id).await
    }

    /// Replace the stored style snapshot; last write wins.
    pub async fn update_style(&self, job_id: JobId, style: StyleConfig) -> Result<()> {
        self.inner.jobs.set_style(job_id, style).await
    }

    fn spawn_run(&self, runs: &mut HashMap<JobId, JoinHandle<()>>, job: Job, input: RunInput) {
        runs.retain(|_, handle| !handle.is_finished());

        let job_id = job.id;
        let pipeline = self.clone();
        let span = info_span!("pipeline", job_id = %job_id);
        let handle = tokio::spawn(async move { pipeline.run(job, input).await }.instrument(span));
        runs.insert(job_id, handle);
    }

    async fn run(&self, job: Job, input: RunInput) {
        match self.execute(&job, &input).await {
            Ok(done) => {
                info!("Job completed");
                self.inner.bus.publish_job(
                    done.id,
                    &done.owner_id,
                    JobEvent::Update {
                        job_id: done.id,
                        status: JobStatus::Completed,
                        progress: checkpoint::DONE,
                        subtitle_ref: done.subtitle_ref.as_ref().map(|p| p.display().to_string()),
                    },
                );
            }
            Err(e) => self.fail(&job, &input, e).await,
        }
    }

    async fn execute(&self, job: &Job, input: &RunInput) -> Result<Job> {
        self.advance(job, checkpoint::QUEUED).await?;
        self.advance(job, checkpoint::INGEST).await?;

        let document = match &input.supplied_subtitle {
            Some(path) => self.read_supplied(path).await?,
            None => self.extract(&job.media_path).await?,
        };

        self.advance(job, checkpoint::INGESTED).await?;

        let subtitle_path = self.inner.artifacts.subtitle_path(&job.media_path);
        self.inner.artifacts.write_verified(&subtitle_path, &document).await?;
        info!("Subtitle artifact written to {}", subtitle_path.display());

        let subtitle_ref = match self.translation_target(input) {
            Some(language) => match self.inner.services.translator.translate(&subtitle_path, language).await {
                Ok(translated) => translated,
                Err(e) => {
                    warn!("Translation to {} failed, keeping original subtitles: {}", language, e);
                    subtitle_path
                }
            },
            None => subtitle_path,
        };

        self.inner.jobs.complete(job.id, subtitle_ref).await
    }

    async fn read_supplied(&self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            SubforgeError::external(INGEST, format!("cannot read {}: {}", path.display(), e))
        })?;
        let cues = parse_srt(&content);
        if cues.is_empty() {
            return Err(SubforgeError::external(
                INGEST,
                format!("{} contains no cues", path.display()),
            ));
        }
        info!("Using supplied subtitle with {} cues", cues.len());
        Ok(to_srt(&cues))
    }

    async fn extract(&self, media_path: &Path) -> Result<String> {
        let info = self
            .inner
            .services
            .media
            .probe(media_path)
            .await
            .map_err(|e| SubforgeError::external(MEDIA_CHECK, e.to_string()))?;
        if !info.is_playable() {
            return Err(SubforgeError::external(MEDIA_CHECK, "no audio or video stream"));
        }

        let raw = self
            .inner
            .services
            .extractor
            .extract(media_path, &self.inner.source_language)
            .await?;
        let cues = parse_srt(&raw);
        if cues.is_empty() {
            return Err(SubforgeError::external("Extraction", "output contains no subtitle cues"));
        }
        info!("Extracted {} cues", cues.len());
        Ok(to_srt(&cues))
    }

    fn translation_target<'a>(&self, input: &'a RunInput) -> Option<&'a str> {
        input
            .target_language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty() && !lang.eq_ignore_ascii_case(&self.inner.source_language))
    }

    async fn advance(&self, job: &Job, progress: u8) -> Result<()> {
        let progress = self.inner.jobs.advance_progress(job.id, progress).await?;
        self.publish_progress(job, progress);
        Ok(())
    }

    fn publish_progress(&self, job: &Job, progress: u8) {
        self.inner.bus.publish_job(
            job.id,
            &job.owner_id,
            JobEvent::Update {
                job_id: job.id,
                status: JobStatus::Processing,
                progress,
                subtitle_ref: None,
            },
        );
    }

    // Failed jobs are removed along with everything written for them
    async fn fail(&self, job: &Job, input: &RunInput, cause: SubforgeError) {
        let reason = cause.to_string();
        error!("Job failed: {}", reason);

        let stored = match self.inner.jobs.remove(job.id).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to delete job record: {}", e);
                None
            }
        };

        let subtitle_path = self.inner.artifacts.subtitle_path(&job.media_path);
        let mut paths = vec![job.media_path.clone(), subtitle_path.clone()];
        if let Some(language) = self.translation_target(input) {
            paths.push(ArtifactStore::translated_path(&subtitle_path, language));
        }
        if let Some(stored) = stored {
            paths.extend(stored.subtitle_ref);
            paths.extend(stored.exported_ref);
        }
        paths.sort();
        paths.dedup();

        let removed = self.inner.artifacts.remove_all(&paths).await;
        info!("Removed {} artifact(s) of failed job", removed);

        self.inner.bus.publish_job(
            job.id,
            &job.owner_id,
            JobEvent::Deleted {
                job_id: job.id,
                reason,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::extract::MockSubtitleExtractor;
    use crate::job::InMemoryJobStore;
    use crate::media::{MediaInfo, MockMediaToolkit, StreamInfo};
    use crate::translate::MockSubtitleTranslator;

    const DOC: &str = "1\n00:00:01,500 --> 00:00:04,000\nHello\n";

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        pipeline: Pipeline,
        bus: NotificationBus,
    }

    fn playable() -> MediaInfo {
        MediaInfo {
            streams: vec![StreamInfo {
                codec_type: "video".to_string(),
                width: Some(1280),
                height: Some(720),
            }],
        }
    }

    fn harness(media: MockMediaToolkit, extractor: MockSubtitleExtractor, translator: MockSubtitleTranslator) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let artifacts = ArtifactStore::new(&StorageConfig {
            uploads_dir: root.join("uploads"),
            exports_dir: root.join("uploads/exports"),
            public_base_url: "http://localhost/uploads".to_string(),
        });
        std::fs::create_dir_all(root.join("uploads")).unwrap();
        let bus = NotificationBus::new(64);
        let pipeline = Pipeline::new(
            Arc::new(InMemoryJobStore::new()),
            bus.clone(),
            artifacts,
            PipelineServices {
                media: Arc::new(media),
                extractor: Arc::new(extractor),
                translator: Arc::new(translator),
            },
            "en",
        );
        Harness { _dir: dir, root, pipeline, bus }
    }

    fn request(root: &Path, target: Option<&str>) -> EnqueueRequest {
        let media = root.join("uploads/1700000000.mp4");
        std::fs::write(&media, b"not really a video").unwrap();
        EnqueueRequest {
            owner_id: "owner-1".to_string(),
            name: Some("Trailer".to_string()),
            media_path: media,
            subtitle_path: None,
            target_language: target.map(str::to_string),
            style: StyleConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_extraction_run_completes_with_translation() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor
            .expect_extract()
            .withf(|_, hint| hint == "en")
            .times(1)
            .returning(|_, _| Ok(DOC.to_string()));
        let mut translator = MockSubtitleTranslator::new();
        translator.expect_translate().times(1).returning(|path, lang| {
            let out = ArtifactStore::translated_path(path, lang);
            std::fs::write(&out, DOC).unwrap();
            Ok(out)
        });

        let h = harness(media, extractor, translator);
        let mut sub = h.bus.subscribe(None, Some("owner-1")).unwrap();
        let id = h.pipeline.enqueue(request(&h.root, Some("my"))).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        let status = h.pipeline.status(id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.subtitle_ref, Some(h.root.join("uploads/1700000000_my.srt")));
        assert!(h.root.join("uploads/1700000000.srt").exists());

        let mut progress = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let JobEvent::Update { progress: p, .. } = event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![0, 10, 30, 60, 100]);
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_original() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().returning(|_, _| Ok(DOC.to_string()));
        let mut translator = MockSubtitleTranslator::new();
        translator
            .expect_translate()
            .returning(|_, _| Err(SubforgeError::external("Translation", "exit status 2")));

        let h = harness(media, extractor, translator);
        let id = h.pipeline.enqueue(request(&h.root, Some("my"))).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        let status = h.pipeline.status(id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.subtitle_ref, Some(h.root.join("uploads/1700000000.srt")));
    }

    #[tokio::test]
    async fn test_same_language_skips_translation() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().returning(|_, _| Ok(DOC.to_string()));
        let mut translator = MockSubtitleTranslator::new();
        translator.expect_translate().never();

        let h = harness(media, extractor, translator);
        let id = h.pipeline.enqueue(request(&h.root, Some("EN"))).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        assert_eq!(h.pipeline.status(id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_supplied_subtitle_skips_extraction() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().never();
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().never();
        let translator = MockSubtitleTranslator::new();

        let h = harness(media, extractor, translator);
        let supplied = h.root.join("upload.srt");
        std::fs::write(&supplied, "00:00:01,000 --> 00:00:02,000\nfirst\nsecond\n").unwrap();
        let mut req = request(&h.root, None);
        req.subtitle_path = Some(supplied);

        let id = h.pipeline.enqueue(req).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        let status = h.pipeline.status(id).await.unwrap();
        let written = std::fs::read_to_string(status.subtitle_ref.unwrap()).unwrap();
        assert!(written.contains("first\nsecond"));
    }

    #[tokio::test]
    async fn test_extraction_failure_deletes_job_and_files() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor
            .expect_extract()
            .returning(|_, _| Err(SubforgeError::external("Extraction", "exit status: 1")));
        let translator = MockSubtitleTranslator::new();

        let h = harness(media, extractor, translator);
        let req = request(&h.root, None);
        let media_path = req.media_path.clone();
        let mut sub = h.bus.subscribe(None, Some("owner-1")).unwrap();
        let id = h.pipeline.enqueue(req).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        let mut deleted = None;
        while let Some(event) = sub.try_recv() {
            if let JobEvent::Deleted { reason, .. } = event {
                deleted = Some(reason);
            }
        }
        assert!(deleted.unwrap().contains("Extraction failed"));
        assert!(matches!(h.pipeline.status(id).await, Err(SubforgeError::NotFound(_))));
        assert!(!media_path.exists());
        assert!(!h.root.join("uploads/1700000000.srt").exists());
    }

    #[tokio::test]
    async fn test_unplayable_media_is_fatal() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(MediaInfo::default()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().never();
        let translator = MockSubtitleTranslator::new();

        let h = harness(media, extractor, translator);
        let id = h.pipeline.enqueue(request(&h.root, None)).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        assert!(h.pipeline.list_jobs("owner-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_validates_input() {
        let h = harness(MockMediaToolkit::new(), MockSubtitleExtractor::new(), MockSubtitleTranslator::new());

        let mut missing = request(&h.root, None);
        missing.media_path = h.root.join("nope.mp4");
        assert!(matches!(h.pipeline.enqueue(missing).await, Err(SubforgeError::Validation(_))));

        let mut anonymous = request(&h.root, None);
        anonymous.owner_id = " ".to_string();
        assert!(matches!(h.pipeline.enqueue(anonymous).await, Err(SubforgeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reprocess_rejects_active_run() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().returning(|_, _| Ok(DOC.to_string()));
        let h = harness(media, extractor, MockSubtitleTranslator::new());

        let id = h.pipeline.enqueue(request(&h.root, None)).await.unwrap();
        let early = h.pipeline.reprocess(id, None).await;
        assert!(matches!(early, Err(SubforgeError::Race(_))));
        h.pipeline.wait(id).await.unwrap();

        h.pipeline.reprocess(id, None).await.unwrap();
        h.pipeline.wait(id).await.unwrap();
        assert_eq!(h.pipeline.status(id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_reprocess_starts_from_untranslated_artifact() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().times(1).returning(|_, _| Ok(DOC.to_string()));
        let mut translator = MockSubtitleTranslator::new();
        translator.expect_translate().times(3).returning(|path, lang| {
            let content = std::fs::read_to_string(path).unwrap();
            let out = ArtifactStore::translated_path(path, lang);
            std::fs::write(&out, content.replace("Hello", "Hello-T")).unwrap();
            Ok(out)
        });

        let h = harness(media, extractor, translator);
        let original = h.root.join("uploads/1700000000.srt");
        let id = h.pipeline.enqueue(request(&h.root, Some("my"))).await.unwrap();
        h.pipeline.wait(id).await.unwrap();
        let first = std::fs::read_to_string(&original).unwrap();

        h.pipeline.reprocess(id, Some("my".to_string())).await.unwrap();
        h.pipeline.wait(id).await.unwrap();

        let status = h.pipeline.status(id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(std::fs::read_to_string(&original).unwrap(), first);
        let translated = std::fs::read_to_string(status.subtitle_ref.unwrap()).unwrap();
        assert!(translated.contains("Hello-T\n"));
        assert!(!translated.contains("Hello-T-T"));

        h.pipeline.reprocess(id, Some("fr".to_string())).await.unwrap();
        h.pipeline.wait(id).await.unwrap();
        assert!(!h.root.join("uploads/1700000000_my.srt").exists());
        assert!(h.root.join("uploads/1700000000_fr.srt").exists());
        assert_eq!(std::fs::read_to_string(&original).unwrap(), first);
    }

    #[tokio::test]
    async fn test_update_style_is_last_write_wins() {
        let mut media = MockMediaToolkit::new();
        media.expect_probe().returning(|_| Ok(playable()));
        let mut extractor = MockSubtitleExtractor::new();
        extractor.expect_extract().returning(|_, _| Ok(DOC.to_string()));
        let h = harness(media, extractor, MockSubtitleTranslator::new());

        let id = h.pipeline.enqueue(request(&h.root, None)).await.unwrap();
        h.pipeline.wait(id).await.unwrap();
        let style = StyleConfig {
            font_size: Some(48),
            ..Default::default()
        };
        h.pipeline.update_style(id, style.clone()).await.unwrap();

        let jobs = h.pipeline.list_jobs("owner-1").await.unwrap();
        assert_eq!(jobs[0].style, style);
    }
}

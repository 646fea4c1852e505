use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::helper::contour_helper::ContourExtractor;
use crate::helper::segmentation::SegmentationMap;
use crate::modules::cache_key::{CacheKey, RenderKey, RenderSettings};
use crate::modules::fingerprint::Fingerprint;
use crate::modules::perceptual_cache::{CacheLookup, PerceptualCache, StoreOutcome};
use crate::modules::renderer::{Artifact, OutputRenderer};
use crate::pipeline::events::{EventKind, EventSink, PipelineEvent, TracingSink};
use crate::pipeline::job::{Job, JobId, JobInput, JobStatus};
use crate::store::store::{InMemoryStore, KeyValueStore};
use crate::utils::coordinate::{ImageShape, LandmarkPoint};
use crate::utils::image::{decode_image_base64, decode_segmentation_base64};

pub type JobStore = Arc<dyn KeyValueStore<JobId, Job>>;

/// One face to outline: the source image, its segmentation map and landmarks.
#[derive(Debug, Clone)]
pub struct FaceInput {
    pub image: RgbImage,
    pub segmentation: SegmentationMap,
    pub landmarks: Vec<LandmarkPoint>,
}

impl FaceInput {
    pub fn new(image: RgbImage, segmentation: SegmentationMap, landmarks: Vec<LandmarkPoint>) -> Self {
        FaceInput { image, segmentation, landmarks }
    }

    /// from_base64 decodes an image and a segmentation image sent as base-64 text.
    ///
    /// # Arguments
    /// * `image` - encoded source image
    /// * `segmentation` - encoded segmentation image
    /// * `palette` - segmentation is colour-coded rather than grayscale ids
    /// * `landmarks` - facial landmarks in image coordinates
    ///
    /// # Returns
    /// * `Result<FaceInput>`
    pub fn from_base64(image: &str, segmentation: &str, palette: bool, landmarks: Vec<LandmarkPoint>) -> Result<Self> {
        Ok(FaceInput {
            image: decode_image_base64(image)?,
            segmentation: decode_segmentation_base64(segmentation, palette)?,
            landmarks,
        })
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.image.height(), self.image.width())
    }

    fn describe(&self) -> JobInput {
        JobInput {
            image_shape: self.shape(),
            segmentation_shape: self.segmentation.shape(),
            landmarks: self.landmarks.clone(),
        }
    }
}

/// A submission refused at the door. The job id still resolves to a failed job.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("job {job_id} rejected: {error}")]
pub struct SubmitError {
    pub job_id: JobId,
    pub error: PipelineError,
}

struct WorkItem {
    job_id: JobId,
    input: FaceInput,
}

struct Finished {
    artifact: Artifact,
    cache_distance: Option<u32>,
}

/// State shared between the submit path and the workers.
struct Shared {
    jobs: JobStore,
    cache: PerceptualCache,
    extractor: ContourExtractor,
    renderer: OutputRenderer,
    settings: RenderSettings,
    events: Arc<dyn EventSink>,
}

impl Shared {
    fn emit(&self, job_id: JobId, kind: EventKind) {
        self.events.emit(PipelineEvent::now(job_id, kind));
    }

    /// Applies one lifecycle step to a stored job and announces it.
    fn update<F>(&self, job_id: JobId, step: F) -> Result<()>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut job = self.jobs.get(&job_id)?.ok_or(PipelineError::JobNotFound(job_id))?;
        let from = job.state;
        step(&mut job)?;
        let to = job.state;
        self.jobs.put(job_id, job)?;
        self.emit(job_id, EventKind::Transition { from, to });
        Ok(())
    }

    async fn process(self: Arc<Self>, item: WorkItem) {
        let job_id = item.job_id;
        if let Err(e) = self.update(job_id, Job::start) {
            error!(job_id = %job_id, error = %e, "cannot start job");
            return;
        }

        let shared = Arc::clone(&self);
        let outcome = tokio::task::spawn_blocking(move || shared.run(job_id, &item.input))
            .await
            .unwrap_or_else(|join| Err(PipelineError::processing(format!("pipeline task aborted: {join}"))));

        let recorded = match outcome {
            Ok(done) => self.update(job_id, |job| job.complete(done.artifact, done.cache_distance)),
            Err(e) => {
                error!(job_id = %job_id, kind = ?e.kind(), error = %e, "job failed");
                self.update(job_id, |job| job.fail(&e))
            }
        };
        if let Err(e) = recorded {
            error!(job_id = %job_id, error = %e, "cannot record job outcome");
        }
    }

    /// fingerprint -> cache lookup -> [extract -> render -> store].
    fn run(&self, job_id: JobId, input: &FaceInput) -> Result<Finished> {
        let render = RenderKey::new(&input.segmentation, &input.landmarks, &self.settings);
        let key = CacheKey::new(render, Fingerprint::of_rgb(&input.image));

        match self.cache.lookup(key) {
            Ok(CacheLookup::Hit(hit)) => {
                self.emit(job_id, EventKind::CacheHit { distance: hit.distance });
                return Ok(Finished { artifact: hit.artifact, cache_distance: Some(hit.distance) });
            }
            Ok(CacheLookup::Miss) => self.emit(job_id, EventKind::CacheMiss),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "cache lookup failed, treating as miss");
                self.emit(job_id, EventKind::CacheMiss);
            }
        }

        self.emit(job_id, EventKind::ExtractionStarted);
        let shape = input.shape();
        let contours = self.extractor.extract(&input.segmentation, &input.landmarks, shape)?;
        let background = self.settings.embed_background.then_some(&input.image);
        let artifact = self.renderer.render(shape, &contours, &self.settings.style, background)?;

        match self.cache.store(key, artifact.clone()) {
            Ok(outcome) => self.emit(
                job_id,
                EventKind::CacheStored { inserted: outcome == StoreOutcome::Inserted },
            ),
            Err(e) => warn!(job_id = %job_id, error = %e, "cache store failed, result not cached"),
        }
        Ok(Finished { artifact, cache_distance: None })
    }
}

/// Admits jobs, runs them on a pool of tokio workers and answers status polls.
pub struct JobCoordinator {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    workers: usize,
    poll_interval: Duration,
    started: AtomicBool,
}

impl JobCoordinator {
    /// new builds a coordinator with in-memory job and cache stores.
    pub fn new(config: &PipelineConfig) -> Self {
        CoordinatorBuilder::new(config.clone()).build()
    }

    pub fn builder(config: PipelineConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// submit validates the input and queues it, returning at once.
    ///
    /// # Arguments
    /// * `input` - image, segmentation map and landmarks
    ///
    /// # Returns
    /// * `Result<JobId, SubmitError>`
    pub fn submit(&self, input: FaceInput) -> std::result::Result<JobId, SubmitError> {
        let job_id = JobId::new();
        let reject = |error: PipelineError| SubmitError { job_id, error };
        let description = input.describe();
        self.shared.emit(job_id, EventKind::Submitted);

        if let Err(error) = self
            .shared
            .extractor
            .validate(&input.segmentation, &input.landmarks, input.shape())
        {
            warn!(job_id = %job_id, error = %error, "submission rejected");
            self.shared
                .jobs
                .put(job_id, Job::rejected(job_id, description, &error))
                .map_err(|e| reject(e.into()))?;
            return Err(reject(error));
        }

        self.shared
            .jobs
            .put(job_id, Job::new(job_id, description))
            .map_err(|e| reject(e.into()))?;
        self.sender
            .send(WorkItem { job_id, input })
            .map_err(|_| reject(PipelineError::processing("work queue is closed")))?;
        Ok(job_id)
    }

    /// get_status returns a snapshot of a job.
    pub fn get_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.shared
            .jobs
            .get(&job_id)?
            .map(JobStatus::from)
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    /// start spawns the worker tasks on the current tokio runtime.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Returns
    /// * `usize` - number of workers spawned by this call
    pub fn start(&self) -> usize {
        if self.started.swap(true, Ordering::SeqCst) {
            return 0;
        }
        for worker in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            let receiver = Arc::clone(&self.receiver);
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };
                    Arc::clone(&shared).process(item).await;
                }
                info!(worker, "worker stopped");
            });
        }
        info!(workers = self.workers, "workers started");
        self.workers
    }

    /// wait_for_terminal polls a job until it completes or fails.
    ///
    /// # Arguments
    /// * `job_id` - job to watch
    /// * `poll_interval` - delay between polls
    ///
    /// # Returns
    /// * `Result<JobStatus>`
    pub async fn wait_for_terminal(&self, job_id: JobId, poll_interval: Duration) -> Result<JobStatus> {
        loop {
            let status = self.get_status(job_id)?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

pub struct CoordinatorBuilder {
    config: PipelineConfig,
    cache: Option<PerceptualCache>,
    jobs: Option<JobStore>,
    events: Option<Arc<dyn EventSink>>,
}

impl CoordinatorBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        CoordinatorBuilder { config, cache: None, jobs: None, events: None }
    }

    pub fn cache(mut self, cache: PerceptualCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn job_store(mut self, jobs: JobStore) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn build(self) -> JobCoordinator {
        let PipelineConfig { extractor, cache, coordinator } = self.config;
        let shared = Shared {
            jobs: self.jobs.unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            cache: self.cache.unwrap_or_else(|| PerceptualCache::in_memory(&cache)),
            extractor: ContourExtractor::new(extractor.clone()),
            renderer: OutputRenderer::for_kind(coordinator.artifact_kind),
            settings: RenderSettings {
                extractor,
                kind: coordinator.artifact_kind,
                style: coordinator.style,
                embed_background: coordinator.embed_background,
            },
            events: self.events.unwrap_or_else(|| Arc::new(TracingSink)),
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        JobCoordinator {
            shared: Arc::new(shared),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            workers: coordinator.workers.max(1),
            poll_interval: Duration::from_millis(coordinator.poll_interval_ms),
            started: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::error::ErrorKind;
    use crate::modules::perceptual_cache::CacheEntry;
    use crate::pipeline::events::ChannelSink;
    use crate::pipeline::job::JobState;
    use crate::store::store::StoreError;

    fn face(seed: u8) -> FaceInput {
        let shape = ImageShape::new(48, 48);
        let image = RgbImage::from_fn(48, 48, |x, y| {
            let v = ((x / 6 * 37 + y / 6 * 91 + seed as u32 * 53) % 200) as u8 + 20;
            Rgb([v, v / 2, 255 - v])
        });
        let segmentation = SegmentationMap::from_fn(shape, |x, y| match (x, y) {
            (8..=20, 8..=20) => 1,
            (26..=40, 26..=40) => 2,
            _ => 0,
        });
        let landmarks = vec![
            LandmarkPoint::new(8.0, 8.0),
            LandmarkPoint::new(40.0, 8.0),
            LandmarkPoint::new(24.0, 40.0),
        ];
        FaceInput::new(image, segmentation, landmarks)
    }

    /// Backing store whose reads always fail.
    struct BrokenStore;

    impl KeyValueStore<CacheKey, CacheEntry> for BrokenStore {
        fn get(&self, _: &CacheKey) -> std::result::Result<Option<CacheEntry>, StoreError> {
            Err(StoreError::Corrupt("unreadable".into()))
        }
        fn put(&self, _: CacheKey, _: CacheEntry) -> std::result::Result<(), StoreError> {
            Err(StoreError::Corrupt("read-only".into()))
        }
        fn exists(&self, _: &CacheKey) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Corrupt("unreadable".into()))
        }
        fn insert_if_absent(&self, _: CacheKey, _: CacheEntry) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Corrupt("read-only".into()))
        }
        fn keys(&self) -> std::result::Result<Vec<CacheKey>, StoreError> {
            Err(StoreError::Corrupt("unreadable".into()))
        }
    }

    /// Backing store that panics on lookup.
    struct PanickingStore;

    impl KeyValueStore<CacheKey, CacheEntry> for PanickingStore {
        fn get(&self, _: &CacheKey) -> std::result::Result<Option<CacheEntry>, StoreError> {
            panic!("store exploded")
        }
        fn put(&self, _: CacheKey, _: CacheEntry) -> std::result::Result<(), StoreError> {
            Ok(())
        }
        fn exists(&self, _: &CacheKey) -> std::result::Result<bool, StoreError> {
            Ok(false)
        }
        fn insert_if_absent(&self, _: CacheKey, _: CacheEntry) -> std::result::Result<bool, StoreError> {
            Ok(true)
        }
        fn keys(&self) -> std::result::Result<Vec<CacheKey>, StoreError> {
            Ok(Vec::new())
        }
    }

    const WAIT: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn test_jobs_stay_pending_until_start() {
        let coordinator = JobCoordinator::new(&PipelineConfig::new());
        let id = coordinator.submit(face(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.get_status(id).unwrap().state, JobState::Pending);

        assert_eq!(coordinator.start(), 2);
        assert_eq!(coordinator.start(), 0);
        let status = coordinator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert!(!status.cache_hit);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let coordinator = JobCoordinator::new(&PipelineConfig::new());
        let err = coordinator.get_status(JobId::new()).unwrap_err();
        assert!(matches!(err, PipelineError::JobNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_recorded_as_failed() {
        let coordinator = JobCoordinator::new(&PipelineConfig::new());
        let mut input = face(1);
        input.segmentation = SegmentationMap::from_fn(ImageShape::new(10, 10), |_, _| 1);
        let rejected = coordinator.submit(input).unwrap_err();
        assert_eq!(rejected.error.kind(), ErrorKind::InvalidInput);

        let status = coordinator.get_status(rejected.job_id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_broken_cache_degrades_to_miss() {
        let config = PipelineConfig::new();
        let (sink, mut rx) = ChannelSink::new();
        let coordinator = JobCoordinator::builder(config.clone())
            .cache(PerceptualCache::new(Arc::new(BrokenStore), &config.cache))
            .events(Arc::new(sink))
            .build();
        coordinator.start();

        let id = coordinator.submit(face(2)).unwrap();
        let status = coordinator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(status.state, JobState::Completed);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&EventKind::CacheMiss));
        assert!(kinds.contains(&EventKind::ExtractionStarted));
        assert!(!kinds.iter().any(|k| matches!(k, EventKind::CacheStored { .. })));
    }

    #[tokio::test]
    async fn test_panicking_pipeline_fails_the_job() {
        let config = PipelineConfig::new();
        let coordinator = JobCoordinator::builder(config.clone())
            .cache(PerceptualCache::new(Arc::new(PanickingStore), &config.cache))
            .build();
        coordinator.start();

        let id = coordinator.submit(face(3)).unwrap();
        let status = coordinator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error_kind(), Some(ErrorKind::ProcessingError));
        assert!(status.artifact.is_none());
    }

    #[tokio::test]
    async fn test_extraction_failure_surfaces_asynchronously() {
        let coordinator = JobCoordinator::new(&PipelineConfig::new());
        coordinator.start();
        let mut input = face(4);
        // a lone pixel passes validation but traces to a single point
        input.segmentation = SegmentationMap::from_fn(input.shape(), |x, y| u32::from(x == 20 && y == 20));
        let id = coordinator.submit(input).unwrap();
        let status = coordinator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error_kind(), Some(ErrorKind::InvalidInput));
    }
}

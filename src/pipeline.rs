//! Per-request detection flow: store, decode, score, aggregate.
//!
//! Decoding and inference are CPU bound and run on the blocking pool. Inference
//! additionally takes a permit from a bounded worker pool; requests beyond the
//! pool size queue for a permit. The permit travels into the blocking task so a
//! timed-out request keeps its slot occupied until the forward pass really ends.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::classifier::ClassificationResult;
use crate::config::Config;
use crate::error::{DetectionError, Result};
use crate::media::frames::{FfmpegOpener, VideoOpener, sample_frames};
use crate::media::{self, DecodedMedia, Modality, StoredMedia, Upload, audio};
use crate::registry::ModelRegistry;
use crate::router::ClassifierRouter;
use crate::verdict::{AggregateVerdict, TierThresholds, aggregate};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Stored,
    Sampled,
    Scored,
    Aggregated,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "RECEIVED",
            Stage::Stored => "STORED",
            Stage::Sampled => "SAMPLED",
            Stage::Scored => "SCORED",
            Stage::Aggregated => "AGGREGATED",
            Stage::Responded => "RESPONDED",
        })
    }
}

/// Logs stage transitions for one request
struct RequestTrace {
    id: u64,
    modality: Modality,
    stage: Stage,
    started: Instant,
}

impl RequestTrace {
    fn start(modality: Modality, filename: &str, bytes: usize) -> Self {
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[req {}] {} {} '{}' ({} bytes)",
            id,
            Stage::Received,
            modality,
            filename,
            bytes
        );
        Self {
            id,
            modality,
            stage: Stage::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        log::debug!(
            "[req {}] {} -> {} after {:?}",
            self.id,
            self.stage,
            stage,
            self.started.elapsed()
        );
        self.stage = stage;
    }

    fn fail(&self, err: &DetectionError) {
        log::debug!(
            "[req {}] {} -> ERROR ({} {}): {}",
            self.id,
            self.stage,
            self.modality,
            err.kind(),
            err
        );
    }
}

pub struct DetectionPipeline {
    registry: Arc<ModelRegistry>,
    router: Arc<ClassifierRouter>,
    sample_count: usize,
    thresholds: TierThresholds,
    workers: Arc<Semaphore>,
    timeout: Duration,
    videos: Arc<dyn VideoOpener>,
}

impl DetectionPipeline {
    pub fn new(registry: Arc<ModelRegistry>, config: &Config) -> Self {
        Self {
            router: Arc::new(ClassifierRouter::new(Arc::clone(&registry))),
            registry,
            sample_count: config.sample_count,
            thresholds: TierThresholds {
                block: config.block_threshold,
            },
            workers: Arc::new(Semaphore::new(config.inference_workers.max(1))),
            timeout: config.inference_timeout,
            videos: Arc::new(FfmpegOpener::new(config.ffmpeg.clone())),
        }
    }

    /// Replace how stored videos are opened for frame sampling
    pub fn with_video_opener(mut self, opener: impl VideoOpener + 'static) -> Self {
        self.videos = Arc::new(opener);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run one upload through the full flow for `modality`
    pub async fn run(&self, modality: Modality, upload: Upload) -> Result<AggregateVerdict> {
        let mut trace = RequestTrace::start(modality, &upload.filename, upload.bytes.len());
        let result = self.run_stages(&mut trace, modality, upload).await;
        match &result {
            Ok(verdict) => {
                trace.advance(Stage::Responded);
                log::info!(
                    "[req {}] {} -> {} ({:.4}, {}) in {:?}",
                    trace.id,
                    modality,
                    verdict.label,
                    verdict.confidence,
                    verdict.status.as_str(),
                    trace.started.elapsed()
                );
            }
            Err(e) => trace.fail(e),
        }
        result
    }

    async fn run_stages(
        &self,
        trace: &mut RequestTrace,
        modality: Modality,
        upload: Upload,
    ) -> Result<AggregateVerdict> {
        let stored = blocking(move || media::store(modality, upload)).await?;
        trace.advance(Stage::Stored);

        let sample_count = self.sample_count;
        let videos = Arc::clone(&self.videos);
        // `stored` is dropped at the end of the task, removing the temp file
        let decoded = blocking(move || decode(&stored, sample_count, videos.as_ref())).await?;
        if let DecodedMedia::Video(frames) = &decoded {
            log::debug!("[req {}] frame indices {:?}", trace.id, frames.indices());
            trace.advance(Stage::Sampled);
        }

        let results = self.score(modality, decoded).await?;
        trace.advance(Stage::Scored);

        let verdict = aggregate(&results, &self.thresholds)?;
        trace.advance(Stage::Aggregated);
        Ok(verdict)
    }

    /// Classify under a worker permit, bounded by the inference timeout.
    /// Registry init on first use happens inside this window too.
    async fn score(
        &self,
        modality: Modality,
        media: DecodedMedia,
    ) -> Result<Vec<ClassificationResult>> {
        let workers = Arc::clone(&self.workers);
        let router = Arc::clone(&self.router);

        let work = async move {
            let permit = workers
                .acquire_owned()
                .await
                .map_err(|_| DetectionError::Inference("inference pool closed".into()))?;
            blocking(move || {
                let _permit = permit;
                router.classify(modality, &media)
            })
            .await
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| DetectionError::InferenceTimeout(self.timeout))?
    }
}

fn decode(
    stored: &StoredMedia,
    sample_count: usize,
    videos: &dyn VideoOpener,
) -> Result<DecodedMedia> {
    match stored.modality {
        Modality::Image => media::decode_image(stored.path()).map(DecodedMedia::Image),
        Modality::Video => {
            let mut video = videos.open(stored.path())?;
            sample_frames(video.as_mut(), sample_count).map(DecodedMedia::Video)
        }
        Modality::Audio => audio::load_waveform(stored.path()).map(DecodedMedia::Audio),
    }
}

/// Run blocking work off the async workers; a panic becomes an `Inference` error
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DetectionError::Inference(format!("worker task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, Label, LabelMap, Sample};
    use crate::registry::ModelLoader;
    use bytes::Bytes;
    use crate::media::frames::VideoSource;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::atomic::AtomicBool;

    /// Fake probability is the mean red level (images) or 0.3 (audio)
    struct Heuristic {
        labels: LabelMap,
        delay: Option<Duration>,
        slow_once: AtomicBool,
    }

    impl Classifier for Heuristic {
        fn name(&self) -> &str {
            "heuristic"
        }

        fn labels(&self) -> &LabelMap {
            &self.labels
        }

        fn forward(&self, samples: &[Sample<'_>]) -> Result<Vec<Vec<f32>>> {
            if let Some(delay) = self.delay {
                if self.slow_once.swap(false, Ordering::SeqCst) {
                    std::thread::sleep(delay);
                }
            }
            Ok(samples
                .iter()
                .map(|s| match s {
                    Sample::Image(img) => {
                        let fake = img.pixels().map(|p| p[0] as f32).sum::<f32>()
                            / (img.pixels().len() as f32 * 255.0);
                        vec![1.0 - fake, fake]
                    }
                    Sample::Waveform(_) => vec![0.7, 0.3],
                })
                .collect())
        }
    }

    struct StubLoader {
        delay: Option<Duration>,
    }

    impl ModelLoader for StubLoader {
        fn load(&self, _modality: Modality) -> Result<Arc<dyn Classifier>> {
            Ok(Arc::new(Heuristic {
                labels: LabelMap::from_names(&["real", "fake"])?,
                delay: self.delay,
                slow_once: AtomicBool::new(true),
            }))
        }
    }

    fn pipeline(delay: Option<Duration>, timeout: Duration) -> DetectionPipeline {
        let config = Config {
            inference_workers: 1,
            inference_timeout: timeout,
            ..Config::default()
        };
        let registry = Arc::new(ModelRegistry::new(StubLoader { delay }));
        DetectionPipeline::new(registry, &config)
    }

    /// Solid 224x224 frames whose red level falls by 2 per frame index
    struct FadingVideo {
        total: usize,
        fail_at: Option<usize>,
    }

    impl VideoSource for FadingVideo {
        fn frame_count(&self) -> usize {
            self.total
        }

        fn read_frame(&mut self, index: usize) -> Result<Option<DynamicImage>> {
            if self.fail_at.is_some_and(|f| index >= f) {
                return Ok(None);
            }
            let red = 255u8.saturating_sub((index * 2) as u8);
            let img = RgbImage::from_pixel(224, 224, Rgb([red, 0, 0]));
            Ok(Some(DynamicImage::ImageRgb8(img)))
        }
    }

    struct FadingOpener {
        total: usize,
        fail_at: Option<usize>,
    }

    impl VideoOpener for FadingOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn VideoSource>> {
            Ok(Box::new(FadingVideo {
                total: self.total,
                fail_at: self.fail_at,
            }))
        }
    }

    fn video_upload() -> Upload {
        Upload {
            filename: "clip.mp4".into(),
            bytes: Bytes::from_static(b"container bytes"),
        }
    }

    fn png_upload(red: u8) -> Upload {
        let img = RgbImage::from_pixel(32, 32, Rgb([red, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        Upload {
            filename: "face.png".into(),
            bytes: Bytes::from(buf.into_inner()),
        }
    }

    fn wav_upload(frames: usize) -> Upload {
        let data_len = (frames * 2) as u32;
        let mut buf = Vec::new();
        buf.extend(b"RIFF");
        buf.extend((36 + data_len).to_le_bytes());
        buf.extend(b"WAVEfmt ");
        buf.extend(16u32.to_le_bytes());
        buf.extend(1u16.to_le_bytes());
        buf.extend(1u16.to_le_bytes());
        buf.extend(16_000u32.to_le_bytes());
        buf.extend(32_000u32.to_le_bytes());
        buf.extend(2u16.to_le_bytes());
        buf.extend(16u16.to_le_bytes());
        buf.extend(b"data");
        buf.extend(data_len.to_le_bytes());
        for i in 0..frames {
            let value = (((i as f32) * 0.1).sin() * 6000.0) as i16;
            buf.extend(value.to_le_bytes());
        }
        Upload {
            filename: "voice.wav".into(),
            bytes: Bytes::from(buf),
        }
    }

    #[tokio::test]
    async fn test_image_end_to_end() {
        let pipeline = pipeline(None, Duration::from_secs(10));
        let verdict = pipeline.run(Modality::Image, png_upload(230)).await.unwrap();

        assert_eq!(verdict.label, Label::Fake);
        assert!(verdict.confidence > 0.85);
        assert_eq!(verdict.results.len(), 1);
        assert_eq!(pipeline.registry().loaded(), vec![Modality::Image]);
    }

    #[tokio::test]
    async fn test_audio_end_to_end() {
        let pipeline = pipeline(None, Duration::from_secs(10));
        let verdict = pipeline.run(Modality::Audio, wav_upload(8_000)).await.unwrap();

        assert_eq!(verdict.label, Label::Real);
        assert!((verdict.confidence - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_video_verdict_is_mean_over_sampled_frames() {
        let pipeline = pipeline(None, Duration::from_secs(10)).with_video_opener(FadingOpener {
            total: 30,
            fail_at: None,
        });
        let verdict = pipeline.run(Modality::Video, video_upload()).await.unwrap();

        let indices: Vec<usize> = verdict.results.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 5, 10, 15, 20, 25]);
        assert!((verdict.results[0].probs.fake - 1.0).abs() < 1e-6);
        assert!((verdict.results[5].probs.fake - 205.0 / 255.0).abs() < 1e-5);

        // reds 255, 245, ..., 205 average to 230
        let expected = 230.0 / 255.0;
        assert_eq!(verdict.label, Label::Fake);
        assert!((verdict.mean.fake - expected).abs() < 1e-5);
        assert!((verdict.confidence - expected).abs() < 1e-5);
        assert!((verdict.mean.sum() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_video_decode_failure_scores_frames_before_it() {
        let pipeline = pipeline(None, Duration::from_secs(10)).with_video_opener(FadingOpener {
            total: 30,
            fail_at: Some(15),
        });
        let verdict = pipeline.run(Modality::Video, video_upload()).await.unwrap();

        let indices: Vec<usize> = verdict.results.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 5, 10]);
        assert!((verdict.mean.fake - 245.0 / 255.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_video_without_frames_is_empty_media() {
        let pipeline = pipeline(None, Duration::from_secs(10)).with_video_opener(FadingOpener {
            total: 0,
            fail_at: None,
        });
        let err = pipeline.run(Modality::Video, video_upload()).await.unwrap_err();
        assert!(matches!(err, DetectionError::EmptyMedia(_)));
        assert!(pipeline.registry().loaded().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_runs_are_deterministic() {
        let pipeline = pipeline(None, Duration::from_secs(10));
        let first = pipeline.run(Modality::Image, png_upload(90)).await.unwrap();
        let second = pipeline.run(Modality::Image, png_upload(90)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected_before_inference() {
        let pipeline = pipeline(None, Duration::from_secs(10));
        let upload = Upload {
            filename: "empty.png".into(),
            bytes: Bytes::new(),
        };
        let err = pipeline.run(Modality::Image, upload).await.unwrap_err();
        assert!(matches!(err, DetectionError::EmptyMedia(_)));
        assert!(pipeline.registry().loaded().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_image_is_unsupported() {
        let pipeline = pipeline(None, Duration::from_secs(10));
        let upload = Upload {
            filename: "photo.jpg".into(),
            bytes: Bytes::from_static(b"definitely not an image"),
        };
        let err = pipeline.run(Modality::Image, upload).await.unwrap_err();
        assert!(matches!(err, DetectionError::UnsupportedMediaType(_)));
    }

    #[tokio::test]
    async fn test_timeout_does_not_break_later_requests() {
        let pipeline = pipeline(Some(Duration::from_millis(400)), Duration::from_millis(100));

        let err = pipeline.run(Modality::Image, png_upload(10)).await.unwrap_err();
        assert!(matches!(err, DetectionError::InferenceTimeout(_)));

        // Let the detached forward pass finish and release its permit
        tokio::time::sleep(Duration::from_millis(600)).await;

        let verdict = pipeline.run(Modality::Image, png_upload(10)).await.unwrap();
        assert_eq!(verdict.label, Label::Real);
    }
}

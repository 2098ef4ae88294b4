//! Video frame sampling
//!
//! Picks at most N evenly spaced frames (`stride = max(1, T / N)`) by seeking
//! straight to each index, so cost is bounded by N seeks instead of T decodes.
//! A frame that fails to decode ends sampling early; whatever was collected
//! before it is still a valid result as long as it is non-empty.

use image::{DynamicImage, ImageFormat, RgbImage, imageops::FilterType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::FfmpegConfig;
use crate::constants::FRAME_SIZE;
use crate::error::{DetectionError, ErrContext, Result};

/// Sampled frame, already RGB and FRAME_SIZE x FRAME_SIZE
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of the frame in the source video
    pub index: usize,
    pub rgb: RgbImage,
}

/// Non-empty, temporally ordered frames
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: Vec<Frame>,
}

impl FrameSet {
    /// Frames must be non-empty; they are ordered by source index
    pub fn from_frames(mut frames: Vec<Frame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(DetectionError::EmptyMedia("could not extract frames".into()));
        }
        frames.sort_by_key(|f| f.index);
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn indices(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.index).collect()
    }
}

/// Random-access frame reader
pub trait VideoSource {
    /// Total frames reported by the container
    fn frame_count(&self) -> usize;

    /// Decode the frame at `index`.
    /// `Ok(None)` means the frame could not be decoded; `Err` is a runtime failure.
    fn read_frame(&mut self, index: usize) -> Result<Option<DynamicImage>>;
}

/// Opens a stored video file as a [`VideoSource`]
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>>;
}

/// Production opener: ffprobe for metadata, ffmpeg for frames
pub struct FfmpegOpener {
    config: FfmpegConfig,
}

impl FfmpegOpener {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(FfmpegVideo::open(path, &self.config)?))
    }
}

/// Indices visited for a video of `total` frames: 0, stride, 2*stride, ... capped at `sample_count`
pub fn frame_indices(total: usize, sample_count: usize) -> impl Iterator<Item = usize> {
    let stride = (total / sample_count.max(1)).max(1);
    (0..total).step_by(stride).take(sample_count)
}

pub fn sample_frames<S: VideoSource + ?Sized>(
    source: &mut S,
    sample_count: usize,
) -> Result<FrameSet> {
    let total = source.frame_count();
    if total == 0 {
        return Err(DetectionError::EmptyMedia("video reports zero frames".into()));
    }

    let mut frames = Vec::with_capacity(sample_count.min(total));
    for index in frame_indices(total, sample_count) {
        match source.read_frame(index)? {
            Some(img) => frames.push(Frame {
                index,
                rgb: normalize_frame(img),
            }),
            None => {
                log::warn!(
                    "[frames] Decode failed at frame {} of {}, keeping {} frames",
                    index,
                    total,
                    frames.len()
                );
                break;
            }
        }
    }

    if frames.is_empty() {
        return Err(DetectionError::EmptyMedia("could not extract frames".into()));
    }

    log::debug!("[frames] Sampled {} of {} frames", frames.len(), total);
    Ok(FrameSet { frames })
}

/// Convert to RGB8 and resize to the fixed square model resolution
pub fn normalize_frame(img: DynamicImage) -> RgbImage {
    let rgb = img.to_rgb8();
    if rgb.dimensions() == (FRAME_SIZE, FRAME_SIZE) {
        return rgb;
    }
    image::imageops::resize(&rgb, FRAME_SIZE, FRAME_SIZE, FilterType::Triangle)
}

/// Video source backed by ffprobe (metadata) and one ffmpeg seek per frame
pub struct FfmpegVideo {
    path: PathBuf,
    config: FfmpegConfig,
    frame_count: usize,
    fps: Option<f64>,
}

impl FfmpegVideo {
    /// Probe the container. Fails with `UnsupportedMediaType` when ffprobe cannot read it.
    pub fn open(path: &Path, config: &FfmpegConfig) -> Result<Self> {
        let output = Command::new(&config.ffprobe_bin)
            .args(["-v", "error"])
            .args(["-select_streams", "v:0"])
            .arg("-count_packets")
            .args([
                "-show_entries",
                "stream=nb_frames,nb_read_packets,avg_frame_rate,r_frame_rate",
            ])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .inference("ffprobe not available")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::UnsupportedMediaType(format!(
                "ffprobe could not read video: {}",
                stderr.trim()
            )));
        }

        let probe = parse_probe(&String::from_utf8_lossy(&output.stdout))?;
        log::debug!(
            "[frames] Probed {:?}: {} frames at {:?} fps",
            path,
            probe.frame_count,
            probe.fps
        );

        Ok(Self {
            path: path.to_path_buf(),
            config: config.clone(),
            frame_count: probe.frame_count,
            fps: probe.fps,
        })
    }

    fn seek_args(&self, index: usize) -> (Vec<String>, Vec<String>) {
        match self.fps {
            Some(fps) => (
                vec!["-ss".into(), format!("{:.6}", seek_time(index, fps))],
                Vec::new(),
            ),
            None => (
                Vec::new(),
                vec!["-vf".into(), format!("select=eq(n\\,{})", index)],
            ),
        }
    }
}

impl VideoSource for FfmpegVideo {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<DynamicImage>> {
        let (pre_input, filters) = self.seek_args(index);
        let threads = self.config.threads.to_string();

        let output = Command::new(&self.config.ffmpeg_bin)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-threads", &threads])
            .args(&pre_input)
            .arg("-i")
            .arg(&self.path)
            .args(["-map", "0:v:0", "-an", "-sn"])
            .args(&filters)
            .args(["-frames:v", "1"])
            .args(["-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .output()
            .inference("ffmpeg not available")?;

        if !output.status.success() || output.stdout.is_empty() {
            log::debug!(
                "[frames] ffmpeg produced no frame at {}: {}",
                index,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        match image::load_from_memory_with_format(&output.stdout, ImageFormat::Png) {
            Ok(img) => Ok(Some(img)),
            Err(e) => {
                log::debug!("[frames] Undecodable frame {}: {}", index, e);
                Ok(None)
            }
        }
    }
}

/// Input-side seek target for frame `index`. Half a frame early, so rounding
/// the timestamp can never land on the following frame's pts.
fn seek_time(index: usize, fps: f64) -> f64 {
    ((index as f64 - 0.5) / fps).max(0.0)
}

#[derive(Debug, PartialEq)]
struct ProbeInfo {
    frame_count: usize,
    fps: Option<f64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

fn parse_probe(json: &str) -> Result<ProbeInfo> {
    let probe: ProbeOutput = serde_json::from_str(json).unsupported("Unreadable ffprobe output")?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DetectionError::UnsupportedMediaType("no video stream".into()))?;

    // Container frame count first; counted packets when the container omits it
    let frame_count = [stream.nb_frames, stream.nb_read_packets]
        .into_iter()
        .flatten()
        .filter_map(|v| v.parse::<usize>().ok())
        .find(|v| *v > 0)
        .unwrap_or(0);

    let fps = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| parse_rate(&rate));

    Ok(ProbeInfo { frame_count, fps })
}

/// Parse an ffprobe rational such as "30000/1001"
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// In-memory video whose frames encode their own index in the red channel
    struct SyntheticVideo {
        total: usize,
        fail_at: Option<usize>,
        visited: Vec<usize>,
    }

    impl SyntheticVideo {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at: None,
                visited: Vec::new(),
            }
        }
    }

    impl VideoSource for SyntheticVideo {
        fn frame_count(&self) -> usize {
            self.total
        }

        fn read_frame(&mut self, index: usize) -> Result<Option<DynamicImage>> {
            self.visited.push(index);
            if self.fail_at.is_some_and(|f| index >= f) {
                return Ok(None);
            }
            let img = RgbImage::from_pixel(64, 48, Rgb([(index % 256) as u8, 0, 0]));
            Ok(Some(DynamicImage::ImageRgb8(img)))
        }
    }

    #[test]
    fn test_thirty_frames_six_samples() {
        let mut video = SyntheticVideo::new(30);
        let frames = sample_frames(&mut video, 6).unwrap();
        assert_eq!(frames.indices(), vec![0, 5, 10, 15, 20, 25]);
        assert_eq!(video.visited, vec![0, 5, 10, 15, 20, 25]);
    }

    #[test]
    fn test_stride_property_for_long_videos() {
        for total in [6, 7, 13, 100, 1001] {
            let n = 6;
            let stride = (total / n).max(1);
            let mut video = SyntheticVideo::new(total);
            let frames = sample_frames(&mut video, n).unwrap();
            let expected: Vec<usize> = (0..n).map(|k| k * stride).collect();
            assert_eq!(frames.indices(), expected, "total={}", total);
        }
    }

    #[test]
    fn test_short_video_visits_every_frame() {
        let mut video = SyntheticVideo::new(4);
        let frames = sample_frames(&mut video, 6).unwrap();
        assert_eq!(frames.indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_zero_frames_is_empty_media() {
        let mut video = SyntheticVideo::new(0);
        let err = sample_frames(&mut video, 6).unwrap_err();
        assert!(matches!(err, DetectionError::EmptyMedia(_)));
        assert!(video.visited.is_empty());
    }

    #[test]
    fn test_decode_failure_truncates_without_retry() {
        let mut video = SyntheticVideo::new(30);
        video.fail_at = Some(15);
        let frames = sample_frames(&mut video, 6).unwrap();
        assert_eq!(frames.indices(), vec![0, 5, 10]);
        assert_eq!(video.visited, vec![0, 5, 10, 15]);
    }

    #[test]
    fn test_first_frame_failure_is_empty_media() {
        let mut video = SyntheticVideo::new(30);
        video.fail_at = Some(0);
        let err = sample_frames(&mut video, 6).unwrap_err();
        assert!(matches!(err, DetectionError::EmptyMedia(_)));
    }

    #[test]
    fn test_frames_normalized_to_model_size() {
        let mut video = SyntheticVideo::new(12);
        let frames = sample_frames(&mut video, 3).unwrap();
        for frame in frames.frames() {
            assert_eq!(frame.rgb.dimensions(), (FRAME_SIZE, FRAME_SIZE));
            assert_eq!(frame.rgb.get_pixel(0, 0)[0], frame.index as u8);
        }
    }

    #[test]
    fn test_normalize_converts_rgba() {
        let rgba = image::RgbaImage::from_pixel(300, 200, image::Rgba([1, 2, 3, 128]));
        let rgb = normalize_frame(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.dimensions(), (224, 224));
        assert_eq!(rgb.get_pixel(100, 100), &Rgb([1, 2, 3]));
    }

    #[test]
    fn test_parse_probe_prefers_container_count() {
        let json = r#"{"streams":[{"nb_frames":"300","nb_read_packets":"299","avg_frame_rate":"30000/1001","r_frame_rate":"30/1"}]}"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.frame_count, 300);
        assert!((probe.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_probe_falls_back_to_packets() {
        let json = r#"{"streams":[{"nb_frames":"N/A","nb_read_packets":"120","avg_frame_rate":"0/0","r_frame_rate":"25/1"}]}"#;
        let probe = parse_probe(json).unwrap();
        assert_eq!(
            probe,
            ProbeInfo {
                frame_count: 120,
                fps: Some(25.0)
            }
        );
    }

    fn video(fps: Option<f64>) -> FfmpegVideo {
        FfmpegVideo {
            path: PathBuf::from("clip.mp4"),
            config: FfmpegConfig::default(),
            frame_count: 300,
            fps,
        }
    }

    #[test]
    fn test_seek_stays_inside_target_frame() {
        let fps = 30000.0 / 1001.0;
        for index in [0usize, 1, 2, 29, 30, 299] {
            let (args, filters) = video(Some(fps)).seek_args(index);
            assert!(filters.is_empty());
            assert_eq!(args[0], "-ss");

            let seek: f64 = args[1].parse().unwrap();
            let pts = index as f64 / fps;
            let previous = (index as f64 - 1.0) / fps;
            assert!(seek <= pts, "index {} seeks to {} past pts {}", index, seek, pts);
            assert!(index == 0 || seek > previous, "index {} seeks back to {}", index, seek);
        }
    }

    #[test]
    fn test_seek_falls_back_to_select_filter() {
        let (args, filters) = video(None).seek_args(7);
        assert!(args.is_empty());
        assert_eq!(filters, vec!["-vf".to_string(), "select=eq(n\\,7)".to_string()]);
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        let err = parse_probe(r#"{"streams":[]}"#).unwrap_err();
        assert!(matches!(err, DetectionError::UnsupportedMediaType(_)));
    }
}

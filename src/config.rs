//! Service configuration, read once from the environment at startup.
//!
//! Every knob has a default so the service starts with no environment at all.
//! Values that fail to parse (or fall outside their valid range) fall back to
//! the default rather than aborting startup.

use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::media::Modality;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Frames sampled per video (N)
    pub sample_count: usize,
    pub block_threshold: f32,
    /// Concurrent forward passes allowed; further requests queue
    pub inference_workers: usize,
    pub inference_timeout: Duration,
    pub max_upload_bytes: usize,
    pub models: ModelsConfig,
    /// Modalities whose classifier is loaded at startup instead of on first use
    pub preload: Vec<Modality>,
    pub result_view_path: String,
    pub ffmpeg: FfmpegConfig,
}

/// Where each modality's weights come from: a local directory or a Hugging Face repo id
#[derive(Debug, Clone)]
pub struct ModelsConfig {
    pub image: String,
    pub video: String,
    pub audio: String,
    /// Label order used when the video model's config has only generic names
    pub video_labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub threads: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            threads: DEFAULT_FFMPEG_THREADS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let video_labels = split_list(&text("VIDEO_MODEL_LABELS", DEFAULT_VIDEO_MODEL_LABELS));

        let preload = lookup("PRELOAD_MODELS")
            .map(|v| {
                split_list(&v)
                    .iter()
                    .filter_map(|name| match Modality::from_str(name) {
                        Ok(m) => Some(m),
                        Err(e) => {
                            log::warn!("[config] Ignoring PRELOAD_MODELS entry: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ffmpeg_defaults = FfmpegConfig::default();
        let timeout_secs = parsed(&lookup, "INFERENCE_TIMEOUT_SECS", |v: &u64| *v > 0)
            .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_SECS);
        let max_upload_mb = parsed(&lookup, "MAX_UPLOAD_MB", |v: &usize| *v > 0)
            .unwrap_or(DEFAULT_MAX_UPLOAD_MB);

        Self {
            port: parsed(&lookup, "PORT", |v: &u16| *v > 0).unwrap_or(DEFAULT_PORT),
            sample_count: parsed(&lookup, "FRAME_SAMPLE_COUNT", |v: &usize| *v > 0)
                .unwrap_or(DEFAULT_SAMPLE_COUNT),
            block_threshold: parsed(&lookup, "BLOCK_THRESHOLD", |v: &f32| {
                *v > 0.0 && *v <= 1.0
            })
            .unwrap_or(DEFAULT_BLOCK_THRESHOLD),
            inference_workers: parsed(&lookup, "INFERENCE_WORKERS", |v: &usize| *v > 0)
                .unwrap_or(DEFAULT_INFERENCE_WORKERS),
            inference_timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            models: ModelsConfig {
                image: text("IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
                video: text("VIDEO_MODEL", DEFAULT_VIDEO_MODEL),
                audio: text("AUDIO_MODEL", DEFAULT_AUDIO_MODEL),
                video_labels,
            },
            preload,
            result_view_path: text("RESULT_VIEW_PATH", DEFAULT_RESULT_VIEW_PATH),
            ffmpeg: FfmpegConfig {
                ffmpeg_bin: text("FFMPEG_PATH", &ffmpeg_defaults.ffmpeg_bin),
                ffprobe_bin: text("FFPROBE_PATH", &ffmpeg_defaults.ffprobe_bin),
                threads: parsed(&lookup, "FFMPEG_THREADS", |v: &usize| *v > 0)
                    .unwrap_or(ffmpeg_defaults.threads),
            },
        }
    }
}

fn parsed<T, F, V>(lookup: &F, key: &str, valid: V) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .filter(|v| valid(v))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

//! Application constants

/// Side length of the square RGB frames handed to the vision classifiers
pub const FRAME_SIZE: u32 = 224;

/// Default number of frames sampled from a video
pub const DEFAULT_SAMPLE_COUNT: usize = 6;

/// Sample rate the audio classifier expects
pub const AUDIO_SAMPLE_RATE: usize = 16_000;

/// Audio is truncated (never padded) to this many seconds
pub const MAX_AUDIO_SECS: usize = 5;

/// Default fake-confidence at or above which a verdict is `blocked`
pub const DEFAULT_BLOCK_THRESHOLD: f32 = 0.7;

/// Maximum upload size (200 MB)
pub const DEFAULT_MAX_UPLOAD_MB: usize = 200;

pub const DEFAULT_INFERENCE_WORKERS: usize = 2;

pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_IMAGE_MODEL: &str = "dima806/deepfake_vs_real_image_detection";

/// Fine-tuned ViT weights converted to safetensors, kept next to the binary
pub const DEFAULT_VIDEO_MODEL: &str = "models/vit_deepfake";

pub const DEFAULT_AUDIO_MODEL: &str = "mo-thecreator/Deepfake-audio-detection";

/// Label order for the video model, whose config only carries LABEL_0/LABEL_1
pub const DEFAULT_VIDEO_MODEL_LABELS: &str = "real,fake";

/// Where the web tier renders a verdict
pub const DEFAULT_RESULT_VIEW_PATH: &str = "/analysis1_result";

pub const DEFAULT_FFMPEG_THREADS: usize = 1;

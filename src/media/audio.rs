//! Audio decoding for the audio classifier: mono, 16kHz, at most MAX_AUDIO_SECS.
//!
//! Clips longer than the limit are truncated, never padded. Decoding stops as
//! soon as enough source samples are buffered, so long uploads cost no more
//! than a short one.

use rubato::{FftFixedIn, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::constants::{AUDIO_SAMPLE_RATE, MAX_AUDIO_SECS};
use crate::error::{DetectionError, ErrContext, Result};

/// Mono PCM at AUDIO_SAMPLE_RATE; never empty
#[derive(Debug, Clone)]
pub struct Waveform {
    samples: Vec<f32>,
}

impl Waveform {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / AUDIO_SAMPLE_RATE as f32
    }

    /// Build from samples already at AUDIO_SAMPLE_RATE, applying the duration cap
    pub fn from_samples(mut samples: Vec<f32>) -> Result<Self> {
        samples.truncate(max_samples(AUDIO_SAMPLE_RATE));
        if samples.is_empty() {
            return Err(DetectionError::EmptyMedia("audio has no samples".into()));
        }
        Ok(Self { samples })
    }
}

fn max_samples(rate: usize) -> usize {
    rate * MAX_AUDIO_SECS
}

/// Decode an audio file into a capped 16kHz mono waveform
pub fn load_waveform(path: &Path) -> Result<Waveform> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .unsupported("Failed to probe audio file")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DetectionError::UnsupportedMediaType("no audio track found".into()))?;

    let codec_params = track.codec_params.clone();
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .unsupported("Failed to create audio decoder")?;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| DetectionError::UnsupportedMediaType("unknown sample rate".into()))?
        as usize;

    // One extra second of source audio absorbs resampler latency before truncation
    let wanted = sample_rate * (MAX_AUDIO_SECS + 1);
    let mut mono: Vec<f32> = Vec::with_capacity(wanted);

    while mono.len() < wanted {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DetectionError::UnsupportedMediaType(format!(
                "Error reading audio packet: {}",
                e
            ))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("[audio] Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(DetectionError::UnsupportedMediaType(format!(
                "Audio decode failed: {}",
                e
            ))),
        };

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        mono.extend(downmix(sample_buf.samples(), spec.channels.count().max(1)));
    }

    if mono.is_empty() {
        return Err(DetectionError::EmptyMedia("audio has no samples".into()));
    }

    let resampled = if sample_rate != AUDIO_SAMPLE_RATE {
        log::debug!(
            "[audio] Resampling from {}Hz to {}Hz ({} samples)",
            sample_rate,
            AUDIO_SAMPLE_RATE,
            mono.len()
        );
        resample(&mono, sample_rate, AUDIO_SAMPLE_RATE)?
    } else {
        mono
    };

    Waveform::from_samples(resampled)
}

/// Average interleaved channels into one
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(samples: &[f32], from_rate: usize, to_rate: usize) -> Result<Vec<f32>> {
    let mut resampler =
        FftFixedIn::<f32>::new(from_rate, to_rate, 1024, 2, 1).inference("Create resampler")?;

    let chunk_size = resampler.input_frames_next();
    let expected = samples.len() * to_rate / from_rate;
    let mut output = Vec::with_capacity(expected + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut frames_in = vec![chunk.to_vec()];
        // Last partial chunk is zero padded, then trimmed below
        frames_in[0].resize(chunk_size, 0.0);
        let frames_out = resampler.process(&frames_in, None).inference("Resample audio")?;
        output.extend(&frames_out[0]);
    }

    output.truncate(expected);
    Ok(output)
}

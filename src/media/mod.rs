//! Media ingestion: uploads are persisted to scoped temp files and decoded per modality.
//!
//! The modality always comes from the endpoint the caller invoked; file contents
//! are never sniffed to pick a decoder. A [`StoredMedia`] owns its temp file, so
//! the bytes are removed on every exit path once the request drops it.

pub mod audio;
pub mod frames;

use bytes::Bytes;
use image::{ImageReader, RgbImage};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;

use crate::error::{DetectionError, ErrContext, Result};

pub use audio::Waveform;
pub use frames::{Frame, FrameSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Image,
    Video,
    Audio,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Image, Modality::Video, Modality::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Video => "video",
            Modality::Audio => "audio",
        }
    }

    /// Temp file suffix when the upload's filename carries no extension
    pub fn default_suffix(&self) -> &'static str {
        match self {
            Modality::Image => ".jpg",
            Modality::Video => ".mp4",
            Modality::Audio => ".wav",
        }
    }

    /// Extension-based routing used by the web tier's upload form.
    /// Unknown extensions are treated as images.
    pub fn from_filename(filename: &str) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "mp4" | "mov" | "avi" | "mkv" | "webm" => Modality::Video,
            "wav" | "mp3" | "flac" | "ogg" | "m4a" => Modality::Audio,
            _ => Modality::Image,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(Modality::Image),
            "video" => Ok(Modality::Video),
            "audio" => Ok(Modality::Audio),
            other => Err(format!("unknown modality '{}'", other)),
        }
    }
}

/// Raw file upload as received over HTTP
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

/// An upload persisted to a temp file; deleted when dropped
#[derive(Debug)]
pub struct StoredMedia {
    pub modality: Modality,
    pub filename: String,
    file: NamedTempFile,
}

impl StoredMedia {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Decoded samples ready for classification
pub enum DecodedMedia {
    Image(RgbImage),
    Video(FrameSet),
    Audio(Waveform),
}

impl DecodedMedia {
    pub fn modality(&self) -> Modality {
        match self {
            DecodedMedia::Image(_) => Modality::Image,
            DecodedMedia::Video(_) => Modality::Video,
            DecodedMedia::Audio(_) => Modality::Audio,
        }
    }
}

/// Persist an upload to a scoped temp file.
/// Blocking: call from a blocking context.
pub fn store(modality: Modality, upload: Upload) -> Result<StoredMedia> {
    if upload.bytes.is_empty() {
        return Err(DetectionError::EmptyMedia(format!(
            "{} upload '{}' has no bytes",
            modality, upload.filename
        )));
    }

    let suffix = Path::new(&upload.filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_else(|| modality.default_suffix().to_string());

    let mut file = tempfile::Builder::new()
        .prefix("shield-")
        .suffix(&suffix)
        .tempfile()?;
    file.write_all(&upload.bytes)?;
    file.flush()?;

    log::debug!(
        "[ingest] Stored {} upload '{}' ({} bytes) at {:?}",
        modality,
        upload.filename,
        upload.bytes.len(),
        file.path()
    );

    Ok(StoredMedia {
        modality,
        filename: upload.filename,
        file,
    })
}

/// Decode a still image to RGB8, guessing the container from its contents
pub fn decode_image(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .unsupported("Could not decode image")?;
    Ok(img.to_rgb8())
}

//! Decoding of streamed PCM chunks.
//!
//! The service sends base64-encoded signed 16-bit little-endian PCM.  The
//! MIME type (`audio/l16;rate=48000;channels=2`) names the format; when it is
//! missing the configured default is assumed.
//!
//! ```
//! use prompt_dj::audio::{decode_chunk, PcmFormat};
//!
//! // two stereo frames: (0, 0) and (16384, -16384)
//! let b64 = "AAAAAABAAMA=";
//! let buf = decode_chunk(b64, Some("audio/l16;rate=48000;channels=2"), PcmFormat::default()).unwrap();
//! assert_eq!(buf.frames(), 2);
//! assert_eq!(buf.samples, vec![0.0, 0.0, 0.5, -0.5]);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Why a single chunk could not be decoded.  Never fatal to the session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("{len} bytes is not a whole number of {channels}-channel 16-bit frames")]
    Misaligned { len: usize, channels: u16 },

    #[error("empty audio chunk")]
    Empty,
}

// ---------------------------------------------------------------------------
// PcmFormat
// ---------------------------------------------------------------------------

/// Sample rate and channel count of interleaved PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl PcmFormat {
    /// Parse `audio/l16;rate=R;channels=C` (or `audio/pcm;…`).  Missing
    /// parameters fall back to `default`; a missing MIME type means
    /// `default` entirely.
    pub fn from_mime(mime: Option<&str>, default: PcmFormat) -> Result<Self, DecodeError> {
        let Some(mime) = mime.map(str::trim).filter(|m| !m.is_empty()) else {
            return Ok(default);
        };

        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default().to_ascii_lowercase();
        if essence != "audio/l16" && essence != "audio/pcm" {
            return Err(DecodeError::UnsupportedFormat(mime.to_string()));
        }

        let mut format = default;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let bad = || DecodeError::UnsupportedFormat(mime.to_string());
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => format.sample_rate = value.trim().parse().map_err(|_| bad())?,
                "channels" => format.channels = value.trim().parse().map_err(|_| bad())?,
                _ => {}
            }
        }

        if format.sample_rate == 0 || format.channels == 0 {
            return Err(DecodeError::UnsupportedFormat(mime.to_string()));
        }
        Ok(format)
    }
}

// ---------------------------------------------------------------------------
// PcmBuffer
// ---------------------------------------------------------------------------

/// Decoded interleaved `f32` audio in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, format: PcmFormat) -> Self {
        Self {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Number of multi-channel frames.
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Linear fade from silence over the first `frames` frames.
    pub fn fade_in(&mut self, frames: usize) {
        let ch = self.channels.max(1) as usize;
        let frames = frames.min(self.frames());
        if frames == 0 {
            return;
        }
        for (i, frame) in self.samples.chunks_exact_mut(ch).take(frames).enumerate() {
            let gain = i as f32 / frames as f32;
            frame.iter_mut().for_each(|s| *s *= gain);
        }
    }
}

// ---------------------------------------------------------------------------
// decode_chunk
// ---------------------------------------------------------------------------

/// Decode one base64 chunk of 16-bit little-endian PCM.
pub fn decode_chunk(
    data: &str,
    mime: Option<&str>,
    default: PcmFormat,
) -> Result<PcmBuffer, DecodeError> {
    let format = PcmFormat::from_mime(mime, default)?;
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let frame_bytes = 2 * format.channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            channels: format.channels,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
        .collect();

    Ok(PcmBuffer::new(samples, format))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Sample-rate and channel-layout conversion.
//!
//! The service streams 48 kHz stereo; the output device may run at another
//! rate or channel count.  Each decoded chunk is brought to the device format
//! before scheduling:
//!
//! 1. [`remap_channels`] — downmix, duplicate or pad interleaved channels.
//! 2. [`resample`] — linear interpolation per channel.
//!
//! Linear interpolation is cheap enough to run inline on the session task.

use super::decode::{PcmBuffer, PcmFormat};

// ---------------------------------------------------------------------------
// remap_channels
// ---------------------------------------------------------------------------

/// Convert interleaved audio from `from` channels to `to` channels.
///
/// * `to == 1` averages all input channels.
/// * `from == 1` copies the mono signal into every output channel.
/// * Otherwise the first `min(from, to)` channels are kept and any extra
///   output channels are silent.
///
/// ```rust
/// use prompt_dj::audio::remap_channels;
///
/// let stereo = vec![0.5_f32, -0.5, 0.25, 0.75];
/// assert_eq!(remap_channels(&stereo, 2, 1), vec![0.0, 0.5]);
/// assert_eq!(remap_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
/// ```
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return samples.to_vec();
    }

    let (from, to) = (from as usize, to as usize);
    let frames = samples.chunks_exact(from);

    if to == 1 {
        return frames
            .map(|frame| frame.iter().sum::<f32>() / from as f32)
            .collect();
    }

    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in frames {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            let keep = from.min(to);
            out.extend_from_slice(&frame[..keep]);
            out.extend(std::iter::repeat(0.0).take(to - keep));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample interleaved audio from `source_rate` to `target_rate` using linear
/// interpolation on each channel.
///
/// The output holds `ceil(frames * target_rate / source_rate)` frames.
pub fn resample(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || channels == 0 || source_rate == 0 || target_rate == 0 {
        return samples.to_vec();
    }

    let ch = channels as usize;
    let in_frames = samples.len() / ch;
    if in_frames == 0 {
        return Vec::new();
    }

    let ratio = f64::from(target_rate) / f64::from(source_rate);
    let out_frames = (in_frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(out_frames * ch);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        for c in 0..ch {
            let at = |f: usize| samples[f * ch + c];
            let sample = if idx + 1 < in_frames {
                at(idx) * (1.0 - frac) + at(idx + 1) * frac
            } else if idx < in_frames {
                at(idx)
            } else {
                0.0
            };
            output.push(sample);
        }
    }

    output
}

impl PcmBuffer {
    /// Convert to `target` (channels first, then rate).
    pub fn convert_to(self, target: PcmFormat) -> PcmBuffer {
        if self.format() == target {
            return self;
        }
        let remapped = remap_channels(&self.samples, self.channels, target.channels);
        let samples = resample(&remapped, target.channels, self.sample_rate, target.sample_rate);
        PcmBuffer::new(samples, target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

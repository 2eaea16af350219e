//! Scheduled audio output.
//!
//! [`Timeline`] is the single output graph of the process: decoded buffers are
//! placed at absolute times on its clock and mixed by the device callback.
//! The clock is the number of frames rendered so far, so `current_time` only
//! advances while the device is pulling audio.
//!
//! [`open_default_output`] wires a `Timeline` to the default cpal output
//! device.  The returned [`OutputStream`] is a RAII guard; dropping it stops
//! the hardware stream.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use thiserror::Error;

use super::decode::{PcmBuffer, PcmFormat};
use super::tap::AudioTap;

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// The output side seen by the session manager.
pub trait AudioOutput: Send + Sync {
    /// Output clock in seconds.
    fn current_time(&self) -> f64;

    /// Device sample rate and channel layout.
    fn format(&self) -> PcmFormat;

    /// Play `buffer` starting at `start` seconds on the output clock.
    fn schedule(&self, start: f64, buffer: PcmBuffer);

    /// Ramp the gain to zero over `fade_secs` and drop everything scheduled
    /// past the end of the ramp.
    fn clear(&self, fade_secs: f32);

    /// Ramp the gain back to one over `fade_secs`.
    fn resume(&self, fade_secs: f32);
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

struct Scheduled {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Scheduled {
    fn end_frame(&self, channels: usize) -> u64 {
        self.start_frame + (self.samples.len() / channels) as u64
    }
}

struct TimelineState {
    frame: u64,
    queue: VecDeque<Scheduled>,
    gain: f32,
    target: f32,
    /// Gain change per frame while ramping.
    step: f32,
}

/// Frame-accurate mixer of scheduled buffers.
pub struct Timeline {
    format: PcmFormat,
    state: Mutex<TimelineState>,
    tap: AudioTap,
}

impl Timeline {
    pub fn new(format: PcmFormat, tap: AudioTap) -> Self {
        Self {
            format,
            state: Mutex::new(TimelineState {
                frame: 0,
                queue: VecDeque::new(),
                gain: 1.0,
                target: 1.0,
                step: 0.0,
            }),
            tap,
        }
    }

    pub fn tap(&self) -> &AudioTap {
        &self.tap
    }

    /// Number of buffers still waiting to finish.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn secs_to_frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * f64::from(self.format.sample_rate)).round() as u64
    }

    fn ramp_to(state: &mut TimelineState, target: f32, frames: u64) {
        state.target = target;
        state.step = if frames == 0 {
            (target - state.gain).abs().max(f32::EPSILON)
        } else {
            (target - state.gain).abs() / frames as f32
        };
    }

    /// Fill `out` (interleaved, device layout) with the mix for the next
    /// `out.len() / channels` frames and advance the clock.
    pub fn render(&self, out: &mut [f32]) {
        let ch = self.format.channels.max(1) as usize;
        let frames = (out.len() / ch) as u64;
        out.fill(0.0);

        let mut state = self.state.lock();
        let block_start = state.frame;
        let block_end = block_start + frames;

        for item in &state.queue {
            let from = item.start_frame.max(block_start);
            let to = item.end_frame(ch).min(block_end);
            if from >= to {
                continue;
            }
            let src = ((from - item.start_frame) as usize) * ch;
            let dst = ((from - block_start) as usize) * ch;
            let n = ((to - from) as usize) * ch;
            for (o, s) in out[dst..dst + n].iter_mut().zip(&item.samples[src..src + n]) {
                *o += *s;
            }
        }
        state.queue.retain(|item| item.end_frame(ch) > block_end);

        for frame in out.chunks_exact_mut(ch) {
            if state.gain != state.target {
                state.gain = if state.gain < state.target {
                    (state.gain + state.step).min(state.target)
                } else {
                    (state.gain - state.step).max(state.target)
                };
            }
            let gain = state.gain;
            frame.iter_mut().for_each(|s| *s = (*s * gain).clamp(-1.0, 1.0));
        }

        state.frame = block_end;
        drop(state);

        self.tap.push(out, self.format.channels);
    }
}

/// Trim or extend (repeating the last frame) `samples` to exactly `frames`.
fn fit_frames(mut samples: Vec<f32>, ch: usize, frames: usize) -> Vec<f32> {
    let len = frames * ch;
    if samples.len() >= len {
        samples.truncate(len);
        return samples;
    }
    let last: Vec<f32> = samples[samples.len().saturating_sub(ch)..].to_vec();
    while samples.len() < len {
        samples.extend_from_slice(&last);
    }
    samples.truncate(len);
    samples
}

impl AudioOutput for Timeline {
    fn current_time(&self) -> f64 {
        self.state.lock().frame as f64 / f64::from(self.format.sample_rate)
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn schedule(&self, start: f64, buffer: PcmBuffer) {
        // Both ends are rounded on the device clock, so a chunk ending at `t`
        // and the next one starting at `t` share the boundary frame exactly.
        let start_frame = self.secs_to_frames(start);
        let end_frame = self.secs_to_frames(start + buffer.duration_secs());
        let buffer = buffer.convert_to(self.format);
        if buffer.samples.is_empty() || end_frame <= start_frame {
            return;
        }
        let ch = self.format.channels.max(1) as usize;
        let samples = fit_frames(buffer.samples, ch, (end_frame - start_frame) as usize);
        self.state.lock().queue.push_back(Scheduled {
            start_frame,
            samples,
        });
    }

    fn clear(&self, fade_secs: f32) {
        let ch = self.format.channels.max(1) as usize;
        let fade_frames = self.secs_to_frames(f64::from(fade_secs));
        let mut state = self.state.lock();
        let cut = state.frame + fade_frames;

        state.queue.retain(|item| item.start_frame < cut);
        for item in state.queue.iter_mut() {
            let keep = ((cut - item.start_frame) as usize) * ch;
            item.samples.truncate(keep);
        }
        Self::ramp_to(&mut state, 0.0, fade_frames);
    }

    fn resume(&self, fade_secs: f32) {
        let fade_frames = self.secs_to_frames(f64::from(fade_secs));
        Self::ramp_to(&mut self.state.lock(), 1.0, fade_frames);
    }
}

// ---------------------------------------------------------------------------
// OutputError / OutputStream
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported output sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Keeps the cpal output stream alive.
pub struct OutputStream {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// open_default_output
// ---------------------------------------------------------------------------

/// Open the default output device and start rendering `Timeline`.
///
/// `window_ms` sizes the analysis tap attached to the final mix.
pub fn open_default_output(window_ms: u32) -> Result<(Arc<Timeline>, OutputStream), OutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(OutputError::NoDevice)?;

    let supported = device.default_output_config()?;
    let sample_format = supported.sample_format();
    let format = PcmFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: cpal::StreamConfig = supported.into();

    log::info!(
        "output: {} @ {} Hz, {} ch, {:?}",
        device.name().unwrap_or_else(|_| "unknown device".into()),
        format.sample_rate,
        format.channels,
        sample_format
    );

    let timeline = Arc::new(Timeline::new(
        format,
        AudioTap::new(format.sample_rate, window_ms),
    ));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&timeline))?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&timeline))?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&timeline))?,
        other => return Err(OutputError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.play()?;

    Ok((timeline, OutputStream { _stream: stream }))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    timeline: Arc<Timeline>,
) -> Result<cpal::Stream, OutputError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            timeline.render(&mut scratch);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err: cpal::StreamError| {
            log::error!("output: cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

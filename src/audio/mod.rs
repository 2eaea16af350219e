//! Audio path: streamed chunk → decode → device format → scheduled timeline →
//! cpal output, with an analysis tap on the final mix.
//!
//! # Pipeline
//!
//! ```text
//! base64 L16 chunk → decode_chunk → PcmBuffer → convert_to(device format)
//!                 → Timeline::schedule → cpal callback (Timeline::render)
//!                                                  └→ AudioTap → AudioLevelAnalyser
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use prompt_dj::audio::{open_default_output, AudioOutput};
//!
//! let (timeline, _stream) = open_default_output(50).unwrap();
//! println!("output clock at {:.3}s", timeline.current_time());
//! // `_stream` keeps the device running; drop it to stop output.
//! ```

pub mod analyser;
pub mod decode;
pub mod output;
pub mod resample;
pub mod tap;

pub use analyser::{rms_level, AudioLevelAnalyser};
pub use decode::{decode_chunk, DecodeError, PcmBuffer, PcmFormat};
pub use output::{open_default_output, AudioOutput, OutputError, OutputStream, Timeline};
pub use resample::{remap_channels, resample};
pub use tap::{AudioTap, RingBuffer};

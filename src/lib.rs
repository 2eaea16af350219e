//! Prompt DJ — steer a realtime generated music stream with weighted style
//! prompts, from the console or a MIDI controller.

pub mod app;
pub mod audio;
pub mod config;
pub mod events;
pub mod midi;
pub mod prompt;
pub mod session;
pub mod throttle;

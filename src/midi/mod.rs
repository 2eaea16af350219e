//! MIDI control input.
//!
//! [`MidiDispatcher`] discovers inputs through a [`MidiBackend`] (the
//! production one is [`MidirBackend`]) and fans control-change values out to
//! listeners keyed by controller number.

pub mod backend;
pub mod dispatcher;

pub use backend::{MessageCallback, MidiBackend, MidiDevice, MidiError, MidirBackend};
pub use dispatcher::{ListenerId, MidiDispatcher};

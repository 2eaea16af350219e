//! JSON message shapes exchanged with the realtime music service.
//!
//! Outbound messages are externally tagged objects:
//!
//! ```text
//! {"setup":{"model":"models/lyria-realtime-exp"}}
//! {"clientContent":{"weightedPrompts":[{"text":"Sitar Synths","weight":1.0}]}}
//! {"playbackControl":"PLAY"}
//! ```
//!
//! Inbound messages carry any subset of `setupComplete`, `serverContent`,
//! `filteredPrompt` and `warning`; [`ServerMessage::into_events`] flattens
//! them into [`Inbound`] events in a fixed order.

use serde::{Deserialize, Serialize};

use crate::prompt::WeightedPrompt;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Session control intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackControl {
    Play,
    Pause,
    Stop,
}

/// A message sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup {
        model: String,
    },
    ClientContent {
        #[serde(rename = "weightedPrompts")]
        weighted_prompts: Vec<WeightedPrompt>,
    },
    PlaybackControl(PlaybackControl),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One encoded audio chunk as delivered by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunkPayload {
    /// Base64 PCM.
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub audio_chunks: Vec<AudioChunkPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredPromptPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub filtered_reason: String,
}

/// Raw inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub filtered_prompt: Option<FilteredPromptPayload>,
    #[serde(default)]
    pub warning: Option<String>,
}

/// Flattened inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SetupComplete,
    Audio(AudioChunkPayload),
    FilteredPrompt { text: String, reason: String },
    Warning(String),
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Split into events: setup, filtered notices, warnings, then audio.
    pub fn into_events(self) -> Vec<Inbound> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(Inbound::SetupComplete);
        }
        if let Some(fp) = self.filtered_prompt {
            events.push(Inbound::FilteredPrompt {
                text: fp.text,
                reason: fp.filtered_reason,
            });
        }
        if let Some(w) = self.warning {
            events.push(Inbound::Warning(w));
        }
        if let Some(content) = self.server_content {
            events.extend(content.audio_chunks.into_iter().map(Inbound::Audio));
        }
        events
    }
}

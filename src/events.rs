//! Notifications delivered to the UI collaborator.
//!
//! Every component that has something to tell the user (session, analyser,
//! MIDI) pushes a [`Notification`] onto the same unbounded channel, so the
//! UI needs one receive loop and one display path.

use tokio::sync::mpsc;

use crate::session::PlaybackState;

/// One event for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The session's playback state changed.
    PlaybackStateChanged(PlaybackState),
    /// The remote session rejected or muted a prompt.
    FilteredPrompt { text: String, reason: String },
    /// A user-visible failure.
    Error { message: String },
    /// New output loudness, in `[0, 1]`.
    AudioLevelChanged(f32),
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Notification::Error {
            message: message.into(),
        }
    }

    /// Text suitable for a toast; `None` for state/level updates that are
    /// rendered elsewhere.
    pub fn toast_text(&self) -> Option<String> {
        match self {
            Notification::FilteredPrompt { text, reason } => {
                Some(format!("\"{text}\" was filtered: {reason}"))
            }
            Notification::Error { message } => Some(message.clone()),
            Notification::PlaybackStateChanged(_) | Notification::AudioLevelChanged(_) => None,
        }
    }
}

/// Sending half of the notification channel.
pub type NotificationSender = mpsc::UnboundedSender<Notification>;
/// Receiving half of the notification channel.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Create the notification channel.
pub fn channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_text_only_for_user_facing_events() {
        assert_eq!(
            Notification::error("boom").toast_text().as_deref(),
            Some("boom")
        );
        let filtered = Notification::FilteredPrompt {
            text: "Sitar Synths".into(),
            reason: "policy".into(),
        };
        assert!(filtered.toast_text().unwrap().contains("Sitar Synths"));
        assert!(Notification::AudioLevelChanged(0.3).toast_text().is_none());
        assert!(Notification::PlaybackStateChanged(PlaybackState::Playing)
            .toast_text()
            .is_none());
    }
}

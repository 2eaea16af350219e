//! Playback state machine.
//!
//! ```text
//! Stopped ──play_pause──▶ Loading ──first scheduled audio──▶ Playing
//! Playing ──play_pause──▶ Paused  ──play_pause──▶ Loading (resume)
//! any state ──stop / teardown / connection loss──▶ Stopped
//! ```
//!
//! The session manager is the only writer.  The UI observes the value via a
//! `tokio::sync::watch` receiver (see [`SessionHandle::state`]).
//!
//! [`SessionHandle::state`]: crate::session::SessionHandle::state

use serde::{Deserialize, Serialize};

/// Current playback phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No session is open.
    #[default]
    Stopped,
    /// Connecting, or waiting for enough audio to start.
    Loading,
    /// Audio is being scheduled to the output.
    Playing,
    /// Session open, local scheduling suspended.
    Paused,
}

/// What a play/pause request leads to from a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayPauseAction {
    /// Open a new session.
    Connect,
    /// Resume the open session.
    Resume,
    /// Suspend local playback.
    Pause,
    /// A transition is already in flight.
    Ignore,
}

impl PlaybackState {
    /// Decide what `play_pause` means in this state.
    ///
    /// ```
    /// use prompt_dj::session::{PlaybackState, PlayPauseAction};
    ///
    /// assert_eq!(PlaybackState::Stopped.on_play_pause(), PlayPauseAction::Connect);
    /// assert_eq!(PlaybackState::Loading.on_play_pause(), PlayPauseAction::Ignore);
    /// ```
    pub fn on_play_pause(self) -> PlayPauseAction {
        match self {
            PlaybackState::Stopped => PlayPauseAction::Connect,
            PlaybackState::Paused => PlayPauseAction::Resume,
            PlaybackState::Playing => PlayPauseAction::Pause,
            PlaybackState::Loading => PlayPauseAction::Ignore,
        }
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Stopped, Loading)
                | (Loading, Playing)
                | (Playing, Paused)
                | (Paused, Loading)
                | (Loading | Playing | Paused, Stopped)
        )
    }

    /// Short label for status lines.
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlaybackState::*;

    #[test]
    fn default_is_stopped() {
        assert_eq!(PlaybackState::default(), Stopped);
    }

    #[test]
    fn play_pause_actions() {
        assert_eq!(Stopped.on_play_pause(), PlayPauseAction::Connect);
        assert_eq!(Loading.on_play_pause(), PlayPauseAction::Ignore);
        assert_eq!(Playing.on_play_pause(), PlayPauseAction::Pause);
        assert_eq!(Paused.on_play_pause(), PlayPauseAction::Resume);
    }

    #[test]
    fn playing_never_goes_straight_to_loading() {
        assert!(!Playing.can_transition_to(Loading));
        assert!(Paused.can_transition_to(Loading));
    }

    #[test]
    fn every_state_but_stopped_can_stop() {
        for s in [Loading, Playing, Paused] {
            assert!(s.can_transition_to(Stopped), "{s}");
        }
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn no_state_is_skipped() {
        assert!(!Stopped.can_transition_to(Playing));
        assert!(!Stopped.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(Playing));
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Loading).unwrap(), "\"loading\"");
    }
}

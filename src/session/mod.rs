//! Realtime generation session: state machine, gapless scheduling, wire
//! protocol, transport and the manager actor that ties them together.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prompt_dj::audio::open_default_output;
//! use prompt_dj::config::AppConfig;
//! use prompt_dj::events;
//! use prompt_dj::prompt::build_initial_prompts;
//! use prompt_dj::session::{LiveMusicConnector, SessionManager};
//!
//! # async fn example() {
//! let config = AppConfig::default();
//! let (timeline, _stream) = open_default_output(config.analyser.window_ms).unwrap();
//! let (tx, mut notifications) = events::channel();
//!
//! let manager = SessionManager::new(
//!     &config.session,
//!     &config.playback,
//!     Arc::new(LiveMusicConnector::new(config.session.clone())),
//!     timeline,
//!     tx,
//! );
//! let (session, _task) = manager.spawn();
//!
//! let prompts = build_initial_prompts(&mut rand::thread_rng());
//! session.set_weighted_prompts(&prompts).await.unwrap();
//! session.play_pause().await.unwrap();
//! while let Some(n) = notifications.recv().await {
//!     println!("{n:?}");
//! }
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod transport;

pub use error::SessionError;
pub use manager::{SessionCommand, SessionHandle, SessionManager};
pub use protocol::{ClientMessage, Inbound, PlaybackControl, ServerMessage};
pub use scheduler::{PlaybackScheduler, Slot};
pub use state::{PlayPauseAction, PlaybackState};
pub use transport::{Connector, LiveMusicConnector, Transport, WebSocketTransport};

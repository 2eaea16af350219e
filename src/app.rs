//! Console front end — the UI collaborator of the session.
//!
//! # Architecture
//!
//! [`Controller`] owns the prompt set and is the only place it is mutated.
//! Every input source submits a [`PromptUpdate`] instead of touching prompts
//! directly:
//!
//! * console commands (`w 3 1.5`) are applied inline;
//! * MIDI listeners run on the MIDI thread and push updates onto the
//!   controller's unbounded channel, which `main` drains into
//!   [`Controller::apply_update`].
//!
//! After each effective change the full snapshot goes to
//! [`SessionHandle::set_weighted_prompts`], which throttles it on the way out.
//!
//! # Commands
//!
//! | Input            | Effect |
//! |------------------|--------|
//! | `play` / `p`     | play / pause |
//! | `stop`           | tear the session down |
//! | `w <n> <weight>` | set prompt `n` to `weight` (0–2) |
//! | `reset`          | every weight back to 0 |
//! | `list` / `ls`    | show prompts |
//! | `midi`           | request MIDI access and list devices |
//! | `device <id>`    | select the active MIDI device |
//! | `help` / `?`     | show this table |
//! | `quit` / `q`     | exit |

use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::UiConfig;
use crate::events::{Notification, NotificationSender};
use crate::midi::MidiDispatcher;
use crate::prompt::{cc_value_to_weight, PromptSet, PromptUpdate, MAX_WEIGHT};
use crate::session::{PlaybackState, SessionError, SessionHandle};
use crate::throttle::Throttled;

const METER_WIDTH: usize = 24;

pub const HELP: &str = "\
commands:
  play | p          play / pause
  stop              stop the session
  w <n> <weight>    set prompt n to weight (0-2)
  reset             all weights to 0
  list | ls         show prompts
  midi              request MIDI access, list devices
  device <id>       select MIDI device
  help | ?          this text
  quit | q          exit";

// ---------------------------------------------------------------------------
// ConsoleCommand
// ---------------------------------------------------------------------------

/// One parsed line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    PlayPause,
    Stop,
    SetWeight { index: usize, weight: f32 },
    Reset,
    List,
    Midi,
    Device(String),
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a console line.  `Ok(None)` for blank input.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("play" | "p" | "pause", []) => ConsoleCommand::PlayPause,
            ("stop", []) => ConsoleCommand::Stop,
            ("reset", []) => ConsoleCommand::Reset,
            ("list" | "ls", []) => ConsoleCommand::List,
            ("midi", []) => ConsoleCommand::Midi,
            ("help" | "?", []) => ConsoleCommand::Help,
            ("quit" | "q" | "exit", []) => ConsoleCommand::Quit,
            ("device", [id]) => ConsoleCommand::Device((*id).to_string()),
            ("w" | "weight", [index, weight]) => {
                let index = index
                    .parse()
                    .map_err(|_| format!("not a prompt number: {index}"))?;
                let weight: f32 = weight
                    .parse()
                    .map_err(|_| format!("not a weight: {weight}"))?;
                if !weight.is_finite() {
                    return Err(format!("not a weight: {weight}"));
                }
                ConsoleCommand::SetWeight { index, weight }
            }
            _ => return Err(format!("unknown command: {}", line.trim())),
        };
        Ok(Some(command))
    }
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

/// Level meter line for `level` in `[0, 1]`.
pub fn render_meter(level: f32) -> String {
    let filled = (level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    format!(
        "level [{}{}] {:>3.0}%",
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled),
        level.clamp(0.0, 1.0) * 100.0
    )
}

fn state_icon(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "[]",
        PlaybackState::Loading => "..",
        PlaybackState::Playing => "|>",
        PlaybackState::Paused => "||",
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// What the console loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Owns the prompt set and translates user / MIDI input into session calls.
pub struct Controller {
    prompts: PromptSet,
    session: SessionHandle,
    /// Texts the service has filtered, shown next to the prompt.
    filtered: HashSet<String>,
    updates: mpsc::UnboundedSender<PromptUpdate>,
    events: NotificationSender,
    midi: Option<MidiDispatcher>,
    midi_error_shown: bool,
    meter: Throttled<fn(f32) -> String, f32, String>,
    last_meter: Option<String>,
}

impl Controller {
    /// Returns the controller and the receiving end for asynchronous
    /// [`PromptUpdate`]s (MIDI), which the caller feeds back into
    /// [`apply_update`](Self::apply_update).  Failures outside the session
    /// (MIDI access) are reported on `events`.
    pub fn new(
        prompts: PromptSet,
        session: SessionHandle,
        events: NotificationSender,
        ui: &UiConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PromptUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let controller = Self {
            prompts,
            session,
            filtered: HashSet::new(),
            updates,
            events,
            midi: None,
            midi_error_shown: false,
            meter: Throttled::new(
                Duration::from_millis(ui.level_redraw_ms),
                render_meter as fn(f32) -> String,
            ),
            last_meter: None,
        };
        (controller, rx)
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Push the current snapshot to the session.
    pub async fn sync_prompts(&self) {
        match self.session.set_weighted_prompts(&self.prompts).await {
            // already reported through the notification channel
            Ok(()) | Err(SessionError::NoActivePrompts) => {}
            Err(e) => log::error!("app: {e}"),
        }
    }

    /// Apply one update request and forward the snapshot if it changed.
    pub async fn apply_update(&mut self, update: PromptUpdate) -> bool {
        let changed = self.prompts.apply(update);
        if changed {
            self.sync_prompts().await;
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Run one console command, printing any output to `out`.
    pub async fn handle_command(&mut self, command: ConsoleCommand, out: &mut String) -> Flow {
        match command {
            ConsoleCommand::PlayPause => self.session_call(self.session.play_pause().await),
            ConsoleCommand::Stop => self.session_call(self.session.stop().await),
            ConsoleCommand::SetWeight { index, weight } => {
                let Some(id) = self.prompts.iter().nth(index).map(|p| p.id.clone()) else {
                    let _ = writeln!(out, "no prompt {index} (0-{})", self.prompts.len().saturating_sub(1));
                    return Flow::Continue;
                };
                if !(0.0..=MAX_WEIGHT).contains(&weight) {
                    let _ = writeln!(out, "weight clamped to 0-{MAX_WEIGHT}");
                }
                self.apply_update(PromptUpdate::SetWeight { id, weight }).await;
                self.render_prompts(out);
            }
            ConsoleCommand::Reset => {
                self.apply_update(PromptUpdate::ResetAll).await;
                self.render_prompts(out);
            }
            ConsoleCommand::List => self.render_prompts(out),
            ConsoleCommand::Midi => self.refresh_midi(out),
            ConsoleCommand::Device(id) => match &self.midi {
                Some(midi) if midi.devices().iter().any(|d| d.id == id) => {
                    midi.set_active_device(Some(id.clone()));
                    let _ = writeln!(out, "active MIDI device: {}", midi.device_name(&id));
                }
                Some(_) => {
                    let _ = writeln!(out, "unknown MIDI device {id:?}");
                }
                None => {
                    let _ = writeln!(out, "MIDI is not enabled; run `midi` first");
                }
            },
            ConsoleCommand::Help => {
                let _ = writeln!(out, "{HELP}");
            }
            ConsoleCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn session_call(&self, result: Result<(), SessionError>) {
        if let Err(e) = result {
            log::error!("app: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // MIDI
    // -----------------------------------------------------------------------

    /// Install `midi` and bind every prompt's CC number to its weight.
    pub fn attach_midi(&mut self, midi: MidiDispatcher) {
        for prompt in self.prompts.iter() {
            let id = prompt.id.clone();
            let updates = self.updates.clone();
            midi.on_control_change(prompt.cc, move |value| {
                let _ = updates.send(PromptUpdate::SetWeight {
                    id: id.clone(),
                    weight: cc_value_to_weight(value),
                });
            });
        }
        self.midi = Some(midi);
    }

    /// Request access (again) and list devices.  A failure is reported once,
    /// as an error notification.
    pub fn refresh_midi(&mut self, out: &mut String) {
        let Some(midi) = self.midi.as_mut() else {
            let _ = writeln!(out, "MIDI support is not available");
            return;
        };
        match midi.request_access() {
            Ok(ids) if ids.is_empty() => {
                let _ = writeln!(out, "no MIDI input devices found");
            }
            Ok(ids) => {
                let active = midi.active_device();
                for id in ids {
                    let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
                    let _ = writeln!(out, "{marker} {id}: {}", midi.device_name(&id));
                }
            }
            Err(e) => {
                if !self.midi_error_shown {
                    self.midi_error_shown = true;
                    let _ = self.events.send(Notification::error(e.to_string()));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Render a notification.  Returns the line to print, if any.
    pub fn handle_notification(&mut self, notification: Notification) -> Option<String> {
        let toast = notification.toast_text().map(|t| format!("! {t}"));
        match notification {
            Notification::PlaybackStateChanged(state) => {
                Some(format!("{} {state}", state_icon(state)))
            }
            Notification::FilteredPrompt { text, .. } => {
                self.filtered.insert(text);
                toast
            }
            Notification::Error { .. } => toast,
            Notification::AudioLevelChanged(level) => {
                let line = self.meter.call(Instant::now(), level).cloned();
                self.take_meter_line(line)
            }
        }
    }

    /// When a parked meter redraw becomes due.
    pub fn meter_deadline(&self) -> Option<Instant> {
        self.meter.deadline()
    }

    /// Apply a parked meter redraw.  Returns the line to print, if any.
    pub fn flush_meter(&mut self) -> Option<String> {
        let line = self.meter.flush(Instant::now()).cloned();
        self.take_meter_line(line)
    }

    fn take_meter_line(&mut self, line: Option<String>) -> Option<String> {
        let line = line?;
        if self.last_meter.as_ref() == Some(&line) {
            return None;
        }
        self.last_meter = Some(line.clone());
        Some(line)
    }

    /// Prompt table: index, text, weight bar, CC and filtered marker.
    pub fn render_prompts(&self, out: &mut String) {
        for (i, p) in self.prompts.iter().enumerate() {
            let bar = "=".repeat((p.weight() / MAX_WEIGHT * 10.0).round() as usize);
            let flag = if self.filtered.contains(&p.text) {
                " [filtered]"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "{i:>2} {:<18} {:<16} {:>4.2} {bar:<10} cc{}{flag}",
                p.text,
                p.native_text,
                p.weight(),
                p.cc
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

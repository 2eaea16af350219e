//! Streaming session manager — owns the one live generation session.
//!
//! [`SessionManager`] is an actor: it is spawned once per process and reacts to
//! four event sources inside a single `tokio::select!` loop, so the playback
//! state and the scheduling cursor are only ever touched from one place.
//!
//! ```text
//! SessionHandle ──SessionCommand──▶ ┐
//! connect task  ──Transport────────▶ │  SessionManager::run
//! Transport     ──ServerMessage────▶ │    ├─▶ AudioOutput::schedule
//! throttle deadline ───────────────▶ ┘    └─▶ Notification (state, error, filtered)
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! play_pause (Stopped) ─▶ Loading, spawn connect
//!   connect ok        ─▶ send prompts, send PLAY
//!   connect err       ─▶ error + Stopped
//!   first audio       ─▶ Playing
//! play_pause (Playing)─▶ send PAUSE, fade out, Paused
//! play_pause (Paused) ─▶ send PLAY, Loading ─▶ first audio ─▶ Playing
//! stop / transport loss ─▶ close transport, drop queued audio, Stopped
//! ```

use std::collections::HashSet;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::{decode_chunk, AudioOutput, PcmFormat};
use crate::config::{PlaybackConfig, SessionConfig};
use crate::events::{Notification, NotificationSender};
use crate::prompt::{PromptSet, WeightedPrompt};
use crate::throttle::Throttle;

use super::error::SessionError;
use super::protocol::{AudioChunkPayload, ClientMessage, Inbound, PlaybackControl, ServerMessage};
use super::scheduler::PlaybackScheduler;
use super::state::{PlayPauseAction, PlaybackState};
use super::transport::{Connector, Transport};

const COMMAND_QUEUE: usize = 64;

type ConnectResult = Result<Box<dyn Transport>, SessionError>;

// ---------------------------------------------------------------------------
// SessionCommand / SessionHandle
// ---------------------------------------------------------------------------

/// Requests accepted by the manager task.
#[derive(Debug)]
pub enum SessionCommand {
    SetWeightedPrompts(PromptSet),
    PlayPause,
    Stop,
    Shutdown,
}

/// Cheap, cloneable front door to a running [`SessionManager`].
///
/// All methods are fire-and-forget: they enqueue a request and return.
/// Outcomes arrive as [`Notification`]s and through [`SessionHandle::state`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<PlaybackState>,
    events: NotificationSender,
}

impl SessionHandle {
    /// Queue a new prompt snapshot.
    ///
    /// Every snapshot becomes the manager's latest, but one with no weight
    /// above zero is never sent to the remote session: the call returns
    /// [`SessionError::NoActivePrompts`], also surfaced as an error
    /// notification.
    pub async fn set_weighted_prompts(&self, prompts: &PromptSet) -> Result<(), SessionError> {
        self.send(SessionCommand::SetWeightedPrompts(prompts.clone()))
            .await?;
        if !prompts.has_active() {
            let _ = self
                .events
                .send(Notification::error(SessionError::NoActivePrompts.to_string()));
            return Err(SessionError::NoActivePrompts);
        }
        Ok(())
    }

    pub async fn play_pause(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::PlayPause).await
    }

    /// Tear down to `Stopped` from any state, cancelling an in-flight connect.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Stop).await
    }

    /// Tear down and end the manager task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// A receiver that wakes on every state change.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// A handle with no manager behind it; the test reads the raw commands.
    #[cfg(test)]
    pub(crate) fn detached(
        events: NotificationSender,
    ) -> (
        Self,
        mpsc::Receiver<SessionCommand>,
        watch::Sender<PlaybackState>,
    ) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(PlaybackState::Stopped);
        let handle = Self {
            commands: tx,
            state: state_rx,
            events,
        };
        (handle, rx, state_tx)
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// The session actor.  Build with [`SessionManager::new`], then either
/// [`spawn`](Self::spawn) it or drive [`run`](Self::run) yourself.
pub struct SessionManager {
    playback: PlaybackConfig,
    connector: Arc<dyn Connector>,
    output: Arc<dyn AudioOutput>,
    state: watch::Sender<PlaybackState>,
    events: NotificationSender,

    transport: Option<Box<dyn Transport>>,
    connecting: Option<JoinHandle<ConnectResult>>,

    /// Latest snapshot from the UI; sent on connect.
    prompts: Option<PromptSet>,
    /// Prompt texts the service has rejected.
    filtered: HashSet<String>,
    throttle: Throttle<PromptSet>,
    scheduler: PlaybackScheduler,
}

impl SessionManager {
    pub fn new(
        session: &SessionConfig,
        playback: &PlaybackConfig,
        connector: Arc<dyn Connector>,
        output: Arc<dyn AudioOutput>,
        events: NotificationSender,
    ) -> Self {
        let (state, _) = watch::channel(PlaybackState::Stopped);
        Self {
            playback: playback.clone(),
            connector,
            output,
            state,
            events,
            transport: None,
            connecting: None,
            prompts: None,
            filtered: HashSet::new(),
            throttle: Throttle::trailing(Duration::from_millis(session.prompt_throttle_ms)),
            scheduler: PlaybackScheduler::new(playback.start_delay_secs, playback.min_buffer_secs),
        }
    }

    /// Spawn the actor on the current runtime.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = SessionHandle {
            commands: tx,
            state: self.state.subscribe(),
            events: self.events.clone(),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until [`SessionCommand::Shutdown`] or until every handle is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            let deadline = self.throttle.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                result = connect_finished(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connected(result).await;
                }
                inbound = next_inbound(&mut self.transport) => {
                    self.on_inbound(inbound).await;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(snapshot) = self.throttle.poll(Instant::now()) {
                        self.send_prompts(&snapshot).await;
                    }
                }
            }
        }

        self.teardown().await;
        log::info!("session: manager shutting down");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetWeightedPrompts(snapshot) => {
                let active = snapshot.has_active();
                self.prompts = Some(snapshot.clone());
                if !active {
                    // reported by the handle; a parked update is stale now
                    self.throttle.cancel();
                    log::debug!("session: holding all-zero snapshot");
                    return;
                }
                if let Some(now_due) = self.throttle.submit(Instant::now(), snapshot) {
                    self.send_prompts(&now_due).await;
                }
            }
            SessionCommand::PlayPause => self.play_pause().await,
            SessionCommand::Stop => {
                if let Some(transport) = self.transport.as_mut() {
                    let _ = transport
                        .send(&ClientMessage::PlaybackControl(PlaybackControl::Stop))
                        .await;
                }
                self.teardown().await;
            }
            // handled by the loop
            SessionCommand::Shutdown => {}
        }
    }

    async fn play_pause(&mut self) {
        let current = self.current_state();
        match current.on_play_pause() {
            PlayPauseAction::Connect => {
                if self.playable_prompts().is_empty() {
                    self.notify_error(&SessionError::NoActivePrompts);
                    return;
                }
                // one session at a time
                self.teardown().await;
                self.set_state(PlaybackState::Loading);
                self.output.resume(self.playback.fade_secs);

                let connector = Arc::clone(&self.connector);
                self.connecting = Some(tokio::spawn(async move { connector.connect().await }));
            }
            PlayPauseAction::Resume => {
                if self.playable_prompts().is_empty() {
                    self.notify_error(&SessionError::NoActivePrompts);
                    return;
                }
                self.scheduler.reset();
                self.set_state(PlaybackState::Loading);
                self.output.resume(self.playback.fade_secs);
                if let Err(e) = self.send_control(PlaybackControl::Play).await {
                    self.fail(e).await;
                }
            }
            PlayPauseAction::Pause => {
                self.output.clear(self.playback.fade_secs);
                self.scheduler.reset();
                self.set_state(PlaybackState::Paused);
                if let Err(e) = self.send_control(PlaybackControl::Pause).await {
                    self.fail(e).await;
                }
            }
            PlayPauseAction::Ignore => {
                log::debug!("session: play/pause ignored while {current}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    async fn on_connected(&mut self, result: ConnectResult) {
        let mut transport = match result {
            Ok(transport) => transport,
            Err(e) => return self.fail(e).await,
        };

        if self.current_state() != PlaybackState::Loading {
            transport.close().await;
            return;
        }

        log::info!("session: connected");
        self.transport = Some(transport);

        // The latest snapshot supersedes anything still parked.
        self.throttle.cancel();
        if let Some(snapshot) = self.prompts.clone() {
            self.send_prompts(&snapshot).await;
            if self.transport.is_none() {
                return;
            }
        }
        if let Err(e) = self.send_control(PlaybackControl::Play).await {
            self.fail(e).await;
        }
    }

    async fn on_inbound(&mut self, inbound: Option<Result<ServerMessage, SessionError>>) {
        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(e)) => return self.fail(e).await,
            None => {
                return self
                    .fail(SessionError::Connection("connection closed".into()))
                    .await
            }
        };

        for event in message.into_events() {
            match event {
                Inbound::SetupComplete => log::debug!("session: late setupComplete"),
                Inbound::FilteredPrompt { text, reason } => {
                    log::info!("session: prompt {text:?} filtered: {reason}");
                    self.filtered.insert(text.clone());
                    let _ = self.events.send(Notification::FilteredPrompt { text, reason });
                }
                Inbound::Warning(warning) => log::warn!("session: server warning: {warning}"),
                Inbound::Audio(chunk) => self.on_audio(chunk),
            }
        }
    }

    fn on_audio(&mut self, chunk: AudioChunkPayload) {
        let state = self.current_state();
        if !matches!(state, PlaybackState::Loading | PlaybackState::Playing) {
            log::debug!("session: dropping audio chunk while {state}");
            return;
        }

        let default_format = PcmFormat {
            sample_rate: self.playback.sample_rate,
            channels: self.playback.channels,
        };
        let mut buffer = match decode_chunk(&chunk.data, chunk.mime_type.as_deref(), default_format)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("session: skipping undecodable chunk: {e}");
                return;
            }
        };

        let now = self.output.current_time();
        let slot = self.scheduler.schedule(now, buffer.duration_secs());
        if slot.underrun {
            log::debug!("session: buffer underrun, resuming at {:.3}s", slot.start);
            let seam =
                u64::from(self.playback.seam_fade_ms) * u64::from(buffer.sample_rate) / 1000;
            buffer.fade_in(seam as usize);
        }
        self.output.schedule(slot.start, buffer);

        if state == PlaybackState::Loading && self.scheduler.is_primed(now) {
            self.set_state(PlaybackState::Playing);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn playable_prompts(&self) -> Vec<WeightedPrompt> {
        self.prompts
            .as_ref()
            .map(|set| set.weighted_prompts(|text| self.filtered.contains(text)))
            .unwrap_or_default()
    }

    async fn send_prompts(&mut self, snapshot: &PromptSet) {
        let weighted = snapshot.weighted_prompts(|text| self.filtered.contains(text));
        if weighted.is_empty() {
            self.notify_error(&SessionError::NoActivePrompts);
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        log::debug!("session: sending {} weighted prompts", weighted.len());
        let message = ClientMessage::ClientContent {
            weighted_prompts: weighted,
        };
        if let Err(e) = transport.send(&message).await {
            self.fail(e).await;
        }
    }

    async fn send_control(&mut self, control: PlaybackControl) -> Result<(), SessionError> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(&ClientMessage::PlaybackControl(control)).await,
            None => Err(SessionError::Connection("no open session".into())),
        }
    }

    // -----------------------------------------------------------------------
    // State / teardown
    // -----------------------------------------------------------------------

    fn current_state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: PlaybackState) {
        let prev = self.current_state();
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            log::warn!("session: unexpected transition {prev} → {next}");
        }
        log::info!("session: {prev} → {next}");
        self.state.send_replace(next);
        let _ = self.events.send(Notification::PlaybackStateChanged(next));
    }

    fn notify_error(&self, error: &SessionError) {
        let _ = self.events.send(Notification::error(error.to_string()));
    }

    /// Surface `error` and tear down to `Stopped`.
    async fn fail(&mut self, error: SessionError) {
        log::error!("session: {error}");
        self.notify_error(&error);
        self.teardown().await;
    }

    /// Cancel any connect, close the transport, drop queued audio and reset
    /// the cursor.
    async fn teardown(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
            log::debug!("session: cancelled in-flight connect");
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.output.clear(self.playback.fade_secs);
        self.scheduler.reset();
        self.throttle.cancel();
        self.set_state(PlaybackState::Stopped);
    }
}

// ---------------------------------------------------------------------------
// select! helpers
// ---------------------------------------------------------------------------

async fn connect_finished(task: &mut Option<JoinHandle<ConnectResult>>) -> ConnectResult {
    match task.as_mut() {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Connection(format!("connect task failed: {e}"))),
        },
        None => pending().await,
    }
}

async fn next_inbound(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<ServerMessage, SessionError>> {
    match transport.as_mut() {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use parking_lot::Mutex;

    use super::*;
    use crate::audio::PcmBuffer;
    use crate::events::{self, NotificationReceiver};
    use crate::prompt::Prompt;

    // ---- Test doubles ------------------------------------------------------

    /// The service side of one mock connection.
    struct Peer {
        inbound: mpsc::UnboundedSender<Result<ServerMessage, SessionError>>,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
        closed: Arc<AtomicBool>,
    }

    impl Peer {
        fn sent(&mut self) -> Vec<ClientMessage> {
            let mut out = Vec::new();
            while let Ok(m) = self.outbound.try_recv() {
                out.push(m);
            }
            out
        }

        fn push(&self, json: &str) {
            self.inbound
                .send(Ok(ServerMessage::from_json(json).unwrap()))
                .unwrap();
        }
    }

    struct MockTransport {
        inbound: mpsc::UnboundedReceiver<Result<ServerMessage, SessionError>>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
            self.outbound
                .send(message.clone())
                .map_err(|_| SessionError::Connection("peer gone".into()))
        }

        async fn recv(&mut self) -> Option<Result<ServerMessage, SessionError>> {
            self.inbound.recv().await
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct MockConnector {
        connects: AtomicUsize,
        fail: bool,
        delay: Duration,
        peers: mpsc::UnboundedSender<Peer>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SessionError::Connection("refused".into()));
            }
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let _ = self.peers.send(Peer {
                inbound: in_tx,
                outbound: out_rx,
                closed: Arc::clone(&closed),
            });
            Ok(Box::new(MockTransport {
                inbound: in_rx,
                outbound: out_tx,
                closed,
            }))
        }
    }

    #[derive(Default)]
    struct MockOutput {
        now: Mutex<f64>,
        scheduled: Mutex<Vec<(f64, usize)>>,
        /// First two frames of every scheduled buffer.
        heads: Mutex<Vec<Vec<f32>>>,
        clears: AtomicUsize,
    }

    impl AudioOutput for MockOutput {
        fn current_time(&self) -> f64 {
            *self.now.lock()
        }
        fn format(&self) -> PcmFormat {
            PcmFormat::default()
        }
        fn schedule(&self, start: f64, buffer: PcmBuffer) {
            self.scheduled.lock().push((start, buffer.frames()));
            let head = buffer.samples.iter().take(2 * buffer.channels as usize);
            self.heads.lock().push(head.copied().collect());
        }
        fn clear(&self, _fade_secs: f32) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        fn resume(&self, _fade_secs: f32) {}
    }

    // ---- Harness -----------------------------------------------------------

    struct Harness {
        handle: SessionHandle,
        events: NotificationReceiver,
        peers: mpsc::UnboundedReceiver<Peer>,
        connector: Arc<MockConnector>,
        output: Arc<MockOutput>,
    }

    fn harness_with(fail: bool, delay: Duration) -> Harness {
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            connects: AtomicUsize::new(0),
            fail,
            delay,
            peers: peer_tx,
        });
        let output = Arc::new(MockOutput::default());
        let (tx, events) = events::channel();
        let manager = SessionManager::new(
            &SessionConfig::default(),
            &PlaybackConfig::default(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            tx,
        );
        let (handle, _task) = manager.spawn();
        Harness {
            handle,
            events,
            peers,
            connector,
            output,
        }
    }

    fn harness() -> Harness {
        harness_with(false, Duration::ZERO)
    }

    /// Sixteen prompts, all at 0 except `active` at weight 1.
    fn prompts(active: &[usize]) -> PromptSet {
        (0..16)
            .map(|i| {
                let w = if active.contains(&i) { 1.0 } else { 0.0 };
                Prompt::new(format!("prompt-{i}"), format!("Style {i}"), "", i as u8, "#fff")
                    .with_weight(w)
            })
            .collect()
    }

    fn audio_json(frames: usize) -> String {
        audio_json_with(frames, 0)
    }

    /// Stereo 48 kHz chunk holding `sample` in every slot.
    fn audio_json_with(frames: usize, sample: i16) -> String {
        let bytes: Vec<u8> = std::iter::repeat(sample.to_le_bytes())
            .take(frames * 2)
            .flatten()
            .collect();
        let data = STANDARD.encode(bytes);
        format!(
            r#"{{"serverContent":{{"audioChunks":[{{"data":"{data}","mimeType":"audio/l16;rate=48000;channels=2"}}]}}}}"#
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut NotificationReceiver) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn errors(notes: &[Notification]) -> Vec<String> {
        notes
            .iter()
            .filter_map(|n| match n {
                Notification::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Play with `active` prompts and return the connected peer.
    async fn start_playing(h: &mut Harness, active: &[usize]) -> Peer {
        h.handle.set_weighted_prompts(&prompts(active)).await.unwrap();
        h.handle.play_pause().await.unwrap();
        settle().await;
        let mut peer = h.peers.try_recv().expect("connected");
        peer.sent();
        peer.push(&audio_json(4_800));
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        drain(&mut h.events);
        peer
    }

    // ---- Validation / throttling -------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn all_zero_snapshot_is_rejected_and_not_sent() {
        let mut h = harness();
        let mut peer = start_playing(&mut h, &[0]).await;

        let err = h.handle.set_weighted_prompts(&prompts(&[])).await.unwrap_err();
        assert_eq!(err, SessionError::NoActivePrompts);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(peer.sent().is_empty());
        let notes = drain(&mut h.events);
        assert_eq!(
            errors(&notes),
            vec!["There needs to be at least one active prompt to play.".to_string()]
        );
        assert_eq!(h.handle.state(), PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_latest_snapshot() {
        let mut h = harness();
        let mut peer = start_playing(&mut h, &[0]).await;

        for i in 1..=10 {
            h.handle.set_weighted_prompts(&prompts(&[i])).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sent = peer.sent();
        assert_eq!(sent.len(), 1, "{sent:?}");
        assert_eq!(
            sent[0],
            ClientMessage::ClientContent {
                weighted_prompts: vec![WeightedPrompt {
                    text: "Style 10".into(),
                    weight: 1.0,
                }],
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sends_only_active_pairs_then_play() {
        let mut h = harness();
        h.handle
            .set_weighted_prompts(&prompts(&[2, 7, 11]))
            .await
            .unwrap();
        h.handle.play_pause().await.unwrap();
        settle().await;

        let mut peer = h.peers.try_recv().expect("connected");
        let sent = peer.sent();
        assert_eq!(sent.len(), 2, "{sent:?}");
        match &sent[0] {
            ClientMessage::ClientContent { weighted_prompts } => {
                let texts: Vec<&str> = weighted_prompts.iter().map(|p| p.text.as_str()).collect();
                assert_eq!(texts, vec!["Style 2", "Style 7", "Style 11"]);
                assert!(weighted_prompts.iter().all(|p| p.weight == 1.0));
            }
            other => panic!("expected prompts first, got {other:?}"),
        }
        assert_eq!(sent[1], ClientMessage::PlaybackControl(PlaybackControl::Play));
    }

    // ---- State machine -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn full_play_pause_cycle() {
        let mut h = harness();
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();
        assert_eq!(h.handle.state(), PlaybackState::Stopped);

        h.handle.play_pause().await.unwrap();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Loading);
        let mut peer = h.peers.try_recv().unwrap();
        peer.sent();

        peer.push(&audio_json(4_800));
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);

        h.handle.play_pause().await.unwrap();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Paused);
        assert_eq!(
            peer.sent(),
            vec![ClientMessage::PlaybackControl(PlaybackControl::Pause)]
        );
        assert!(h.output.clears.load(Ordering::SeqCst) >= 1);

        // chunks still in flight while paused are dropped
        let before = h.output.scheduled.lock().len();
        peer.push(&audio_json(480));
        settle().await;
        assert_eq!(h.output.scheduled.lock().len(), before);

        h.handle.play_pause().await.unwrap();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Loading);
        assert_eq!(
            peer.sent(),
            vec![ClientMessage::PlaybackControl(PlaybackControl::Play)]
        );

        peer.push(&audio_json(4_800));
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);

        let states: Vec<PlaybackState> = drain(&mut h.events)
            .into_iter()
            .filter_map(|n| match n {
                Notification::PlaybackStateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PlaybackState::Loading,
                PlaybackState::Playing,
                PlaybackState::Paused,
                PlaybackState::Loading,
                PlaybackState::Playing,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn double_play_pause_opens_one_connection() {
        let mut h = harness_with(false, Duration::from_millis(100));
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();

        h.handle.play_pause().await.unwrap();
        h.handle.play_pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
        assert!(h.peers.try_recv().is_ok());
        assert!(h.peers.try_recv().is_err());
        assert_eq!(h.handle.state(), PlaybackState::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_inflight_connect() {
        let mut h = harness_with(false, Duration::from_millis(100));
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();
        h.handle.play_pause().await.unwrap();
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Loading);

        h.handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
        assert!(h.peers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn play_without_active_prompts_stays_stopped() {
        let mut h = harness();
        h.handle.play_pause().await.unwrap();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
        assert_eq!(errors(&drain(&mut h.events)).len(), 1);
    }

    // ---- Failures ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connection_failure_forces_stopped() {
        let mut h = harness_with(true, Duration::ZERO);
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();
        h.handle.play_pause().await.unwrap();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        let notes = drain(&mut h.events);
        assert_eq!(errors(&notes), vec!["Connection error: refused".to_string()]);
        assert_eq!(
            notes.last(),
            Some(&Notification::PlaybackStateChanged(PlaybackState::Stopped))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_loss_surfaces_error_and_stops() {
        let mut h = harness();
        let peer = start_playing(&mut h, &[0]).await;
        let closed = Arc::clone(&peer.closed);
        let clears = h.output.clears.load(Ordering::SeqCst);

        drop(peer);
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        assert!(closed.load(Ordering::SeqCst));
        assert!(h.output.clears.load(Ordering::SeqCst) > clears);
        assert_eq!(errors(&drain(&mut h.events)).len(), 1);

        // caller-initiated retry opens a fresh session
        h.handle.play_pause().await.unwrap();
        settle().await;
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_chunk_is_skipped() {
        let mut h = harness();
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();
        h.handle.play_pause().await.unwrap();
        settle().await;
        let peer = h.peers.try_recv().unwrap();

        peer.push(r#"{"serverContent":{"audioChunks":[{"data":"%%% not audio %%%"}]}}"#);
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Loading);
        assert!(h.output.scheduled.lock().is_empty());

        peer.push(&audio_json(4_800));
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(h.output.scheduled.lock().len(), 1);
        assert!(errors(&drain(&mut h.events)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_prompt_is_reported_and_excluded() {
        let mut h = harness();
        let mut peer = start_playing(&mut h, &[0, 1]).await;

        peer.push(r#"{"filteredPrompt":{"text":"Style 1","filteredReason":"blocked"}}"#);
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(
            drain(&mut h.events),
            vec![Notification::FilteredPrompt {
                text: "Style 1".into(),
                reason: "blocked".into(),
            }]
        );

        h.handle.set_weighted_prompts(&prompts(&[0, 1])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            peer.sent(),
            vec![ClientMessage::ClientContent {
                weighted_prompts: vec![WeightedPrompt {
                    text: "Style 0".into(),
                    weight: 1.0,
                }],
            }]
        );
    }

    // ---- Scheduling --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn steady_state_chunks_are_contiguous() {
        let mut h = harness();
        *h.output.now.lock() = 1.0;
        let peer = start_playing(&mut h, &[0]).await;

        for _ in 0..3 {
            peer.push(&audio_json(4_800));
        }
        settle().await;

        let starts: Vec<f64> = h.output.scheduled.lock().iter().map(|(s, _)| *s).collect();
        let expected = [1.5, 1.6, 1.7, 1.8];
        assert_eq!(starts.len(), expected.len());
        for (got, want) in starts.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{starts:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_chunk_while_playing_keeps_playing() {
        let mut h = harness();
        let peer = start_playing(&mut h, &[0]).await;
        let before = h.output.scheduled.lock().len();

        peer.push(r#"{"serverContent":{"audioChunks":[{"data":"not*base64"}]}}"#);
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(h.output.scheduled.lock().len(), before);

        peer.push(&audio_json(4_800));
        settle().await;
        assert_eq!(h.handle.state(), PlaybackState::Playing);
        assert_eq!(h.output.scheduled.lock().len(), before + 1);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn underrun_holds_playing_and_fades_in_the_seam() {
        let mut h = harness();
        let peer = start_playing(&mut h, &[0]).await; // cursor at 0.6
        *h.output.now.lock() = 2.0;

        peer.push(&audio_json_with(4_800, 16_384));
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Playing);
        let (start, _) = *h.output.scheduled.lock().last().unwrap();
        assert!((start - 2.0).abs() < 1e-9, "{start}");

        let head = h.output.heads.lock().last().cloned().unwrap();
        assert_eq!(&head[..2], &[0.0, 0.0]);
        assert!(head[2] > 0.0 && head[2] < 0.5, "{head:?}");

        // back in steady state: the next chunk is contiguous and unfaded
        peer.push(&audio_json_with(4_800, 16_384));
        settle().await;
        let (start, _) = *h.output.scheduled.lock().last().unwrap();
        assert!((start - 2.1).abs() < 1e-9, "{start}");
        let head = h.output.heads.lock().last().cloned().unwrap();
        assert!((head[0] - 0.5).abs() < 1e-6, "{head:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn zeroed_snapshot_replaces_the_last_active_one() {
        let mut h = harness();
        h.handle.set_weighted_prompts(&prompts(&[0])).await.unwrap();
        let err = h.handle.set_weighted_prompts(&prompts(&[])).await.unwrap_err();
        assert_eq!(err, SessionError::NoActivePrompts);

        h.handle.play_pause().await.unwrap();
        settle().await;

        assert_eq!(h.handle.state(), PlaybackState::Stopped);
        assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
        assert!(h.peers.try_recv().is_err());
        // one for the rejected update, one for the refused play
        assert_eq!(errors(&drain(&mut h.events)).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zeroed_snapshot_cancels_a_parked_update() {
        let mut h = harness();
        let mut peer = start_playing(&mut h, &[0]).await;

        // both updates sit in the trailing window
        h.handle.set_weighted_prompts(&prompts(&[1])).await.unwrap();
        h.handle.set_weighted_prompts(&prompts(&[2])).await.unwrap();
        let _ = h.handle.set_weighted_prompts(&prompts(&[])).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(peer.sent().is_empty());
        assert_eq!(h.handle.state(), PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_task() {
        let (tx, _events) = events::channel();
        let (peer_tx, _peers) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            &SessionConfig::default(),
            &PlaybackConfig::default(),
            Arc::new(MockConnector {
                connects: AtomicUsize::new(0),
                fail: false,
                delay: Duration::ZERO,
                peers: peer_tx,
            }),
            Arc::new(MockOutput::default()),
            tx,
        );
        let (handle, task) = manager.spawn();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.play_pause().await, Err(SessionError::Closed));
    }
}

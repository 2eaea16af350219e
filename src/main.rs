//! Application entry point — Prompt DJ.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime.
//! 4. Open the cpal output device (falls back to a silent clock).
//! 5. Spawn the [`SessionManager`] with the live WebSocket connector.
//! 6. Build the initial prompt set and the console [`Controller`].
//! 7. Attach MIDI; access is requested at startup when `ui.show_midi` is set.
//! 8. Run the console loop until `quit` or end of input.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use prompt_dj::{
    app::{ConsoleCommand, Controller, Flow, HELP},
    audio::{open_default_output, AudioLevelAnalyser, AudioOutput, AudioTap, PcmFormat, Timeline},
    config::AppConfig,
    events,
    midi::{MidiDispatcher, MidirBackend},
    prompt::build_initial_prompts,
    session::{LiveMusicConnector, PlaybackState, SessionManager},
};

// ---------------------------------------------------------------------------
// Silent clock
// ---------------------------------------------------------------------------

/// Drive `timeline` in real time without a device, so sessions still run
/// (and can be tested) on machines without audio output.
fn spawn_silent_clock(timeline: Arc<Timeline>) {
    tokio::spawn(async move {
        let format = timeline.format();
        let frames = (format.sample_rate / 100).max(1) as usize;
        let mut block = vec![0.0_f32; frames * format.channels.max(1) as usize];
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        loop {
            ticker.tick().await;
            timeline.render(&mut block);
        }
    });
}

// ---------------------------------------------------------------------------
// Console loop
// ---------------------------------------------------------------------------

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // Output graph — exactly one per process.
    let (timeline, _stream) = match open_default_output(config.analyser.window_ms) {
        Ok((timeline, stream)) => (timeline, Some(stream)),
        Err(e) => {
            log::warn!("Audio output unavailable ({e}); playing to a silent clock");
            let format = PcmFormat {
                sample_rate: config.playback.sample_rate,
                channels: config.playback.channels,
            };
            let timeline = Arc::new(Timeline::new(
                format,
                AudioTap::new(format.sample_rate, config.analyser.window_ms),
            ));
            spawn_silent_clock(Arc::clone(&timeline));
            (timeline, None)
        }
    };

    let (events_tx, mut events_rx) = events::channel();

    // Session manager
    let manager = SessionManager::new(
        &config.session,
        &config.playback,
        Arc::new(LiveMusicConnector::new(config.session.clone())),
        Arc::clone(&timeline) as Arc<dyn AudioOutput>,
        events_tx.clone(),
    );
    let (session, session_task) = manager.spawn();
    let mut state_rx = session.subscribe();

    // Level analyser — runs only while playing.
    let mut analyser =
        AudioLevelAnalyser::new(timeline.tap().clone(), &config.analyser, events_tx.clone());

    // Prompts + controller
    let prompts = build_initial_prompts(&mut rand::thread_rng());
    let (mut controller, mut updates) =
        Controller::new(prompts, session.clone(), events_tx.clone(), &config.ui);
    controller.attach_midi(MidiDispatcher::new(Box::new(MidirBackend::new(
        config.midi.client_name.clone(),
    ))));

    let mut out = String::new();
    if config.ui.show_midi {
        controller.refresh_midi(&mut out);
        if let Some(id) = config.midi.preferred_device.clone() {
            controller
                .handle_command(ConsoleCommand::Device(id), &mut out)
                .await;
        }
    }
    controller.sync_prompts().await;

    println!("{HELP}\n");
    controller.render_prompts(&mut out);
    print!("{out}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let meter_deadline = controller.meter_deadline();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{e} (try `help`)");
                        continue;
                    }
                };
                let mut out = String::new();
                let flow = controller.handle_command(command, &mut out).await;
                print!("{out}");
                if flow == Flow::Quit {
                    break;
                }
            }
            Some(notification) = events_rx.recv() => {
                if let Some(text) = controller.handle_notification(notification) {
                    println!("{text}");
                }
            }
            Some(update) = updates.recv() => {
                controller.apply_update(update).await;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    log::error!("Session manager stopped unexpectedly");
                    break;
                }
                let state = *state_rx.borrow_and_update();
                if state == PlaybackState::Playing {
                    analyser.start();
                } else {
                    analyser.stop();
                }
            }
            _ = tokio::time::sleep_until(meter_deadline.unwrap_or_else(Instant::now)), if meter_deadline.is_some() => {
                if let Some(text) = controller.flush_meter() {
                    println!("{text}");
                }
            }
        }
    }

    analyser.stop();
    if let Err(e) = session.shutdown().await {
        log::debug!("shutdown: {e}");
    }
    session_task.await?;
    log::info!("Prompt DJ stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Prompt DJ starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(run(config))
}

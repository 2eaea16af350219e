//! Output loudness for reactive visuals.
//!
//! [`AudioLevelAnalyser`] polls the [`AudioTap`] at the display refresh rate,
//! reduces the window to a scalar in `[0, 1]` and emits
//! [`Notification::AudioLevelChanged`] only when that scalar changes.
//!
//! ```rust
//! use prompt_dj::audio::rms_level;
//!
//! assert_eq!(rms_level(&[]), 0.0);
//! assert_eq!(rms_level(&[0.0; 64]), 0.0);
//! // full-scale square wave saturates the meter
//! assert_eq!(rms_level(&[1.0, -1.0, 1.0, -1.0]), 1.0);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AnalyserConfig;
use crate::events::{Notification, NotificationSender};

use super::tap::AudioTap;

/// Levels are reported in 1/255 steps so sub-audible jitter does not count
/// as a change.
const LEVEL_STEPS: f32 = 255.0;

/// RMS of `window` scaled so a full-scale sine reads 1.0, clamped to `[0, 1]`.
pub fn rms_level(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let mean_sq = window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32;
    (mean_sq.sqrt() * std::f32::consts::SQRT_2).clamp(0.0, 1.0)
}

fn quantize(level: f32) -> f32 {
    (level * LEVEL_STEPS).round() / LEVEL_STEPS
}

/// Periodic loudness estimator.  At most one analysis loop runs per instance.
pub struct AudioLevelAnalyser {
    tap: AudioTap,
    period: Duration,
    events: NotificationSender,
    /// Last emitted level, as `f32` bits.
    level: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl AudioLevelAnalyser {
    pub fn new(tap: AudioTap, config: &AnalyserConfig, events: NotificationSender) -> Self {
        let hz = config.refresh_hz.max(1);
        Self {
            tap,
            period: Duration::from_secs_f64(1.0 / f64::from(hz)),
            events,
            level: Arc::new(AtomicU32::new(0.0_f32.to_bits())),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Last level emitted.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Begin the analysis loop.  A no-op while one is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let tap = self.tap.clone();
        let events = self.events.clone();
        let level = Arc::clone(&self.level);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::debug!("analyser: started ({:?} period)", self.period);
        self.task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let next = quantize(rms_level(&tap.window()));
                let prev = f32::from_bits(level.swap(next.to_bits(), Ordering::Relaxed));
                if next != prev && events.send(Notification::AudioLevelChanged(next)).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop the loop and report silence if the meter was not already at 0.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        log::debug!("analyser: stopped");

        let prev = f32::from_bits(self.level.swap(0.0_f32.to_bits(), Ordering::Relaxed));
        if prev != 0.0 {
            let _ = self.events.send(Notification::AudioLevelChanged(0.0));
        }
    }
}

impl Drop for AudioLevelAnalyser {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn analyser(tap: &AudioTap) -> (AudioLevelAnalyser, events::NotificationReceiver) {
        let (tx, rx) = events::channel();
        let config = AnalyserConfig {
            refresh_hz: 100,
            window_ms: 10,
        };
        (AudioLevelAnalyser::new(tap.clone(), &config, tx), rx)
    }

    fn levels(rx: &mut events::NotificationReceiver) -> Vec<f32> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            if let Notification::AudioLevelChanged(l) = n {
                out.push(l);
            }
        }
        out
    }

    #[test]
    fn rms_of_sine_is_about_one() {
        let sine: Vec<f32> = (0..4_800)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI / 48.0).sin())
            .collect();
        assert!((rms_level(&sine) - 1.0).abs() < 1e-3);
        assert!(rms_level(&[0.1; 32]) < 0.2);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_on_change() {
        let tap = AudioTap::new(1_000, 10);
        let (mut an, mut rx) = analyser(&tap);
        tap.push(&[0.5; 10], 1);

        an.start();
        tokio::time::sleep(Duration::from_millis(55)).await;

        let got = levels(&mut rx);
        assert_eq!(got.len(), 1, "{got:?}");
        assert_eq!(got[0], quantize(0.5 * std::f32::consts::SQRT_2));

        tap.push(&[0.0; 10], 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(levels(&mut rx), vec![0.0]);
        an.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_runs_one_loop_and_stop_silences() {
        let tap = AudioTap::new(1_000, 10);
        let (mut an, mut rx) = analyser(&tap);
        tap.push(&[0.25; 10], 1);

        an.start();
        an.start();
        assert!(an.is_running());
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(levels(&mut rx).len(), 1);
        assert!(an.level() > 0.0);

        an.stop();
        assert!(!an.is_running());
        assert_eq!(levels(&mut rx), vec![0.0]);

        // no loop left behind to notice new audio
        tap.push(&[0.9; 10], 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(levels(&mut rx).is_empty());

        // restartable
        an.start();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(levels(&mut rx).len(), 1);
        an.stop();
    }

    #[test]
    fn stop_without_start_is_silent() {
        let tap = AudioTap::new(1_000, 10);
        let (tx, mut rx) = events::channel();
        let mut an = AudioLevelAnalyser::new(tap, &AnalyserConfig::default(), tx);
        an.stop();
        assert!(rx.try_recv().is_err());
    }
}

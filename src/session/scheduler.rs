//! Gapless scheduling cursor.
//!
//! Each decoded chunk is placed at `max(cursor, now)` on the output clock and
//! the cursor advances by the chunk's duration, so consecutive chunks butt up
//! against each other exactly.  The very first chunk after a reset is pushed
//! `start_delay` into the future to build a jitter cushion.
//!
//! The cursor only moves forward.  Nothing that arrives late, twice or out of
//! order can rewind it.

/// Where a chunk landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    /// Start time on the output clock, in seconds.
    pub start: f64,
    /// The cursor had fallen behind the output clock (buffer ran dry), so
    /// this chunk starts a new seam.
    pub underrun: bool,
}

/// Running "next start time" cursor.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    cursor: Option<f64>,
    start_delay: f64,
    min_buffer: f64,
}

impl PlaybackScheduler {
    /// `start_delay`: lookahead applied to the first chunk.
    /// `min_buffer`: scheduled-ahead audio required before playback counts
    /// as started.
    pub fn new(start_delay: f64, min_buffer: f64) -> Self {
        Self {
            cursor: None,
            start_delay: start_delay.max(0.0),
            min_buffer: min_buffer.max(0.0),
        }
    }

    /// Place a chunk of `duration` seconds given the output clock `now`.
    pub fn schedule(&mut self, now: f64, duration: f64) -> Slot {
        let duration = duration.max(0.0);
        let slot = match self.cursor {
            None => Slot {
                start: now + self.start_delay,
                underrun: false,
            },
            Some(cursor) if cursor < now => Slot {
                start: now,
                underrun: true,
            },
            Some(cursor) => Slot {
                start: cursor,
                underrun: false,
            },
        };
        self.cursor = Some(slot.start + duration);
        slot
    }

    /// Seconds of audio scheduled beyond `now`.
    pub fn buffered_ahead(&self, now: f64) -> f64 {
        self.cursor.map_or(0.0, |c| (c - now).max(0.0))
    }

    /// Enough audio is queued to leave the loading state.
    pub fn is_primed(&self, now: f64) -> bool {
        self.cursor.is_some() && self.buffered_ahead(now) >= self.min_buffer
    }

    /// Next start time, or `None` before the first chunk.
    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    /// Forget the cursor; the next chunk gets the start delay again.
    pub fn reset(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn first_chunk_gets_start_delay() {
        let mut s = PlaybackScheduler::new(0.5, 0.5);
        let slot = s.schedule(10.0, 2.0);
        assert!((slot.start - 10.5).abs() < EPS);
        assert!(!slot.underrun);
        assert!((s.cursor().unwrap() - 12.5).abs() < EPS);
    }

    #[test]
    fn steady_state_chunks_are_contiguous() {
        let mut s = PlaybackScheduler::new(0.3, 0.3);
        let durations = [2.0, 1.5, 0.25, 2.0, 0.75];
        let mut now = 0.0;
        let mut prev: Option<(f64, f64)> = None;

        for d in durations {
            let slot = s.schedule(now, d);
            if let Some((ps, pd)) = prev {
                assert!(slot.start >= ps);
                assert!((slot.start - (ps + pd)).abs() < EPS);
            }
            assert!(!slot.underrun);
            prev = Some((slot.start, d));
            now += d * 0.5; // arrivals faster than real time
        }
    }

    #[test]
    fn underrun_restarts_at_now_without_rewinding() {
        let mut s = PlaybackScheduler::new(0.5, 0.5);
        s.schedule(0.0, 1.0); // cursor 1.5
        let slot = s.schedule(4.0, 1.0);
        assert!(slot.underrun);
        assert!((slot.start - 4.0).abs() < EPS);
        assert!((s.cursor().unwrap() - 5.0).abs() < EPS);
    }

    #[test]
    fn late_clock_reading_never_rewinds_cursor() {
        let mut s = PlaybackScheduler::new(0.5, 0.5);
        s.schedule(5.0, 1.0); // cursor 6.5
        // a stale clock reading from the past
        let slot = s.schedule(1.0, 1.0);
        assert!((slot.start - 6.5).abs() < EPS);
        assert!((s.cursor().unwrap() - 7.5).abs() < EPS);
    }

    #[test]
    fn primed_once_min_buffer_is_reached() {
        let mut s = PlaybackScheduler::new(0.0, 1.0);
        assert!(!s.is_primed(0.0));
        s.schedule(0.0, 0.4);
        assert!(!s.is_primed(0.0));
        s.schedule(0.0, 0.4);
        assert!(!s.is_primed(0.0));
        s.schedule(0.0, 0.4);
        assert!(s.is_primed(0.0));
        assert!((s.buffered_ahead(0.0) - 1.2).abs() < EPS);
    }

    #[test]
    fn reset_restores_start_delay() {
        let mut s = PlaybackScheduler::new(0.5, 0.5);
        s.schedule(0.0, 3.0);
        s.reset();
        assert!(s.cursor().is_none());
        assert_eq!(s.buffered_ahead(1.0), 0.0);
        let slot = s.schedule(1.0, 1.0);
        assert!((slot.start - 1.5).abs() < EPS);
    }
}

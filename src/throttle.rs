//! Rate limiting for bursty callers (knob drags, redraw triggers).
//!
//! [`Throttle`] is the bookkeeping core: it decides whether a submitted value
//! fires now or is parked as the pending trailing value.  It never sleeps on
//! its own; callers ask for [`Throttle::deadline`] and come back with
//! [`Throttle::poll`] once that instant has passed (typically from a
//! `tokio::select!` branch on `sleep_until`).
//!
//! [`Throttled`] wraps a function on top of a [`Throttle`] and caches the most
//! recent result so intermediate calls can still return something useful.
//!
//! Two firing disciplines are available:
//!
//! | Constructor              | First call in an idle period | Later calls in the window |
//! |--------------------------|------------------------------|---------------------------|
//! | [`Throttle::new`]        | fires immediately            | last one fires at window end |
//! | [`Throttle::trailing`]   | opens a window               | last one fires at window end |
//!
//! In both modes the final value submitted is always delivered eventually.
//!
//! ```
//! use std::time::Duration;
//! use prompt_dj::throttle::Throttle;
//! use tokio::time::Instant;
//!
//! let t0 = Instant::now();
//! let mut throttle = Throttle::new(Duration::from_millis(30));
//!
//! assert_eq!(throttle.submit(t0, 1), Some(1)); // leading edge
//! assert_eq!(throttle.submit(t0, 2), None);    // parked
//! assert_eq!(throttle.submit(t0, 3), None);    // replaces 2
//! assert_eq!(throttle.poll(t0 + Duration::from_millis(30)), Some(3));
//! ```

use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Collapses bursts of values to at most one delivery per interval.
#[derive(Debug)]
pub struct Throttle<A> {
    interval: Duration,
    leading: bool,
    /// When the current window opened (the last delivery, or the first
    /// submission of a trailing-only burst).
    window_start: Option<Instant>,
    pending: Option<A>,
}

impl<A> Throttle<A> {
    /// Leading + trailing throttle: an idle caller is served immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            leading: true,
            window_start: None,
            pending: None,
        }
    }

    /// Trailing-only throttle: every burst is delivered once, at the end of
    /// the window opened by its first value.
    pub fn trailing(interval: Duration) -> Self {
        Self {
            leading: false,
            ..Self::new(interval)
        }
    }

    /// Offer `value` at time `now`.
    ///
    /// Returns `Some(value)` when it should be delivered right away, `None`
    /// when it has been parked as the pending trailing value (replacing any
    /// earlier pending value).
    pub fn submit(&mut self, now: Instant, value: A) -> Option<A> {
        if self.leading && self.pending.is_none() && self.window_elapsed(now) {
            self.window_start = Some(now);
            return Some(value);
        }

        if !self.leading && self.pending.is_none() {
            self.window_start = Some(now);
        }
        self.pending = Some(value);
        None
    }

    /// Instant at which the pending value becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(match self.window_start {
            Some(start) => start + self.interval,
            None => Instant::now(),
        })
    }

    /// Take the pending value if its deadline has passed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<A> {
        let due = self.deadline()?;
        if now < due {
            return None;
        }
        self.window_start = Some(now);
        self.pending.take()
    }

    /// Returns `true` while a trailing value is waiting.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending value and forget the current window.
    pub fn cancel(&mut self) -> Option<A> {
        self.window_start = None;
        self.pending.take()
    }

    fn window_elapsed(&self, now: Instant) -> bool {
        match self.window_start {
            Some(start) => now.saturating_duration_since(start) >= self.interval,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Throttled
// ---------------------------------------------------------------------------

/// A function wrapped with a [`Throttle`].
///
/// `call` runs the function at most once per interval and otherwise returns
/// the last computed result.  Arguments submitted between runs are not lost:
/// the latest one is applied by [`Throttled::flush`] once the window ends.
pub struct Throttled<F, A, R> {
    throttle: Throttle<A>,
    func: F,
    last: Option<R>,
}

impl<F, A, R> Throttled<F, A, R>
where
    F: FnMut(A) -> R,
{
    /// Wrap `func` with a leading + trailing throttle of `interval`.
    pub fn new(interval: Duration, func: F) -> Self {
        Self {
            throttle: Throttle::new(interval),
            func,
            last: None,
        }
    }

    /// Invoke with `arg` at `now`; returns the most recent result, which is
    /// `None` only before the first run.
    pub fn call(&mut self, now: Instant, arg: A) -> Option<&R> {
        if let Some(arg) = self.throttle.submit(now, arg) {
            self.last = Some((self.func)(arg));
        }
        self.last.as_ref()
    }

    /// Apply the parked trailing argument if it is due at `now`.
    pub fn flush(&mut self, now: Instant) -> Option<&R> {
        if let Some(arg) = self.throttle.poll(now) {
            self.last = Some((self.func)(arg));
        }
        self.last.as_ref()
    }

    /// When the parked trailing argument becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// Most recent result without invoking anything.
    pub fn last(&self) -> Option<&R> {
        self.last.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! A smoother maps monotonic wall time to stream time.
//!
//! Latency snapshots arrive at irregular intervals and with jitter, but time
//! queries should advance smoothly between them. The smoother keeps a short
//! history of (system time, stream time) observations, estimates the current
//! playback rate from it, and extrapolates between observations. It can be
//! paused while the stream is not advancing (corked, suspended, underrun)
//! and resumed without the mapped time jumping.

use std::collections::VecDeque;

/// The default smoothing window and rate-adaptation parameters used by
/// streams.
pub(crate) const SMOOTHER_ADJUST_TIME: u64 = 1_000_000;
pub(crate) const SMOOTHER_HISTORY_TIME: u64 = 5_000_000;
pub(crate) const SMOOTHER_MIN_HISTORY: usize = 4;

/// A monotonic time smoother.
#[derive(Debug)]
pub struct Smoother {
    adjust_time: u64,
    history_time: u64,
    monotonic: bool,
    min_history: usize,

    time_offset: u64,
    history: VecDeque<(u64, u64)>,

    anchor_x: u64,
    anchor_y: u64,
    slope: f64,

    paused: bool,
    frozen_y: u64,
    last_returned: u64,
}

impl Smoother {
    /// Creates a smoother.
    ///
    /// `adjust_time` bounds how quickly the rate estimate follows new
    /// observations, `history_time` is the window observations are kept
    /// for, and `min_history` is the number of observations required before
    /// the rate deviates from realtime. With `monotonic` set, mapped time
    /// never runs backwards.
    pub fn new(adjust_time: u64, history_time: u64, monotonic: bool, min_history: usize) -> Self {
        Self {
            adjust_time: adjust_time.max(1),
            history_time,
            monotonic,
            min_history: min_history.max(2),

            time_offset: 0,
            history: VecDeque::new(),

            anchor_x: 0,
            anchor_y: 0,
            slope: 1.0,

            paused: false,
            frozen_y: 0,
            last_returned: 0,
        }
    }

    /// Sets the offset subtracted from every system time passed in. Usually
    /// the monotonic clock value at stream setup.
    pub fn set_time_offset(&mut self, offset: u64) {
        self.time_offset = offset;
    }

    fn translate(&self, x: u64) -> u64 {
        x.saturating_sub(self.time_offset)
    }

    fn project(&self, x: u64) -> u64 {
        if x <= self.anchor_x {
            return self.anchor_y;
        }

        let dy = (x - self.anchor_x) as f64 * self.slope;
        self.anchor_y.saturating_add(dy as u64)
    }

    /// Stops mapped time at its current value, as of system time `x`.
    pub fn pause(&mut self, x: u64) {
        if self.paused {
            return;
        }

        let x = self.translate(x);
        self.frozen_y = self.project(x);
        self.paused = true;
    }

    /// Resumes mapped time from where it was paused, as of system time `x`.
    pub fn resume(&mut self, x: u64) {
        if !self.paused {
            return;
        }

        let x = self.translate(x);
        self.anchor_x = x;
        self.anchor_y = self.frozen_y;
        self.paused = false;
        self.history.clear();
    }

    /// Feeds an observation: at system time `x`, the stream time was `y`.
    pub fn put(&mut self, x: u64, y: u64) {
        let x = self.translate(x);

        if self.paused {
            // The stream is not advancing; take the observation as the new
            // resume point.
            self.frozen_y = y;
            return;
        }

        let cutoff = x.saturating_sub(self.history_time);
        while let Some(&(hx, _)) = self.history.front() {
            if hx >= cutoff {
                break;
            }
            self.history.pop_front();
        }

        let previous = self.history.back().copied();
        self.history.push_back((x, y));

        if self.history.len() >= self.min_history {
            let (x0, y0) = self.history.front().copied().unwrap();
            if x > x0 {
                let estimate = (y as f64 - y0 as f64) / ((x - x0) as f64);
                let estimate = estimate.clamp(0.0, 4.0);

                // Bound the correction rate by how much time passed since
                // the last observation.
                let alpha = match previous {
                    Some((px, _)) => (((x - px) as f64) / self.adjust_time as f64).min(1.0),
                    None => 1.0,
                };
                self.slope += (estimate - self.slope) * alpha;
            }
        }

        self.anchor_x = x;
        self.anchor_y = y;
    }

    /// Returns the stream time estimate for system time `x`.
    pub fn get(&mut self, x: u64) -> u64 {
        let x = self.translate(x);

        let mut y = if self.paused {
            self.frozen_y
        } else {
            self.project(x)
        };

        if self.monotonic {
            y = y.max(self.last_returned);
            self.last_returned = y;
        }

        y
    }
}

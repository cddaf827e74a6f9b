//! Time-decayed estimate of how many bytes callers write before releasing a buffer.
//!
//! Each sample is weighted by the time elapsed since the previous one: after one `window`
//! (the half-life) has elapsed, the previous estimate contributes half of the new one. The
//! variance is tracked with the same weight so the pool can derive a spread around the mean.

use std::time::{Duration, Instant};

/// A point-in-time view of an [Estimator].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Usage {
    /// Smoothed number of bytes written before release.
    pub mean: f64,
    /// Smoothed standard deviation of the bytes written before release.
    pub stddev: f64,
    /// Number of samples folded into the estimate.
    pub samples: u64,
}

impl Usage {
    /// Returns `mean + margin * stddev`.
    pub fn upper(&self, margin: f64) -> f64 {
        self.mean + margin * self.stddev
    }

    /// Returns `mean - margin * stddev`.
    pub fn lower(&self, margin: f64) -> f64 {
        self.mean - margin * self.stddev
    }
}

/// Exponentially-weighted moving average (and variance) with a time-based half-life.
#[derive(Debug)]
pub(crate) struct Estimator {
    window: Duration,
    mean: f64,
    variance: f64,
    samples: u64,
    last: Option<Instant>,
}

impl Estimator {
    pub(crate) const fn new(window: Duration) -> Self {
        Self {
            window,
            mean: 0.0,
            variance: 0.0,
            samples: 0,
            last: None,
        }
    }

    /// Returns the weight given to a sample observed `elapsed` after the previous one.
    fn alpha(&self, elapsed: Duration) -> f64 {
        if self.window.is_zero() {
            return 1.0;
        }
        let halvings = elapsed.as_secs_f64() / self.window.as_secs_f64();
        1.0 - (-halvings).exp2()
    }

    /// Folds `value` observed at `now` into the estimate.
    ///
    /// The first sample sets the mean outright. Samples that do not advance the clock carry no
    /// weight (unless the window is zero, in which case the estimate tracks the latest sample).
    pub(crate) fn update_at(&mut self, value: f64, now: Instant) {
        self.samples += 1;
        let Some(last) = self.last else {
            self.mean = value;
            self.variance = 0.0;
            self.last = Some(now);
            return;
        };

        let alpha = self.alpha(now.saturating_duration_since(last));
        let delta = value - self.mean;
        self.mean += alpha * delta;
        self.variance = (1.0 - alpha) * (self.variance + alpha * delta * delta);
        if now > last {
            self.last = Some(now);
        }
    }

    pub(crate) fn update(&mut self, value: f64) {
        self.update_at(value, Instant::now());
    }

    pub(crate) fn usage(&self) -> Usage {
        Usage {
            mean: self.mean,
            stddev: self.variance.max(0.0).sqrt(),
            samples: self.samples,
        }
    }
}

// Adaptive frame-interval sleeping. OS sleep granularity is too coarse
// for sub-frame accuracy, so the estimator sleeps in 1ms primitives
// while it can prove (mean + stddev of observed primitive durations)
// that the budget allows it, then spins the monotonic clock for the
// residual. Ported from the technique described at
// https://blat-blatnik.github.io/computerBear/making-accurate-sleep-function/

use std::time::{Duration, Instant};

/// Recent whole-sleep durations kept for status reporting.
const SAMPLE_COUNT: usize = 20;

pub struct SleepEstimator {
    samples_ns: [u64; SAMPLE_COUNT],
    sample_len: usize,
    sample_next: usize,

    // Welford accumulator over the observed duration (in seconds) of a
    // single 1ms primitive sleep.
    mean: f64,
    m2: f64,
    n: u32,
}

impl Default for SleepEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepEstimator {
    pub fn new() -> Self {
        Self {
            samples_ns: [0; SAMPLE_COUNT],
            sample_len: 0,
            sample_next: 0,
            // Seed the estimate pessimistically at 5ms so the first
            // iterations lean on the spin loop rather than oversleeping.
            mean: 5e-3,
            m2: 0.0,
            n: 1,
        }
    }

    /// Sleeps for very close to `ms` milliseconds, recording the actual
    /// total duration for `average_ns`.
    pub fn sleep(&mut self, ms: u32) {
        let start = Instant::now();

        let mut remaining = ms as f64 / 1e3;
        while remaining > self.estimate() {
            let t0 = Instant::now();
            std::thread::sleep(Duration::from_millis(1));
            let observed = t0.elapsed().as_secs_f64();

            remaining -= observed;
            self.n += 1;
            let delta = observed - self.mean;
            self.mean += delta / self.n as f64;
            self.m2 += delta * (observed - self.mean);
        }

        // Spin out the residual budget for sub-millisecond accuracy.
        if remaining > 0.0 {
            let spin_start = Instant::now();
            let residual = Duration::from_secs_f64(remaining);
            while spin_start.elapsed() < residual {
                std::hint::spin_loop();
            }
        }

        self.record(start.elapsed().as_nanos() as u64);
    }

    /// Mean of the recorded whole-sleep durations, in nanoseconds.
    pub fn average_ns(&self) -> u64 {
        if self.sample_len == 0 {
            return 0;
        }
        let sum: u64 = self.samples_ns[..self.sample_len].iter().sum();
        sum / self.sample_len as u64
    }

    fn estimate(&self) -> f64 {
        let stddev = if self.n > 1 {
            (self.m2 / (self.n - 1) as f64).sqrt()
        } else {
            0.0
        };
        self.mean + stddev
    }

    fn record(&mut self, ns: u64) {
        self.samples_ns[self.sample_next] = ns;
        self.sample_next = (self.sample_next + 1) % SAMPLE_COUNT;
        self.sample_len = (self.sample_len + 1).min(SAMPLE_COUNT);
    }
}
